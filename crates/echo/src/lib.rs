//! Echo service demo: a two-method service, its typed stub, and the TCP plumbing that runs
//! one RPC engine per connection.

pub mod config;
pub mod connection;
pub mod error;
pub mod proto;
pub mod service;
pub mod stub;

pub use config::EchoConfig;
pub use error::{Error, Result};
pub use service::EchoService;
pub use stub::{EchoServer, EchoServerClient, EchoServerService};
