//! Interceptor-chained async RPC dispatch core.
//!
//! One [`Engine`] per connection correlates outbound calls with their replies, routes
//! inbound calls to installed handlers, runs both directions through an
//! [`InterceptorChain`] and enforces per-call deadlines. All of it is driven by a single
//! event loop:
//! * [`MainLoop`]: the tokio driver over any `AsyncRead`/`AsyncWrite` pair
//! * [`RpcClient`]: cloneable handle for initiating calls from anywhere
//! * [`ReplyHandle`]: single-use answer channel handed to handlers
//! * [`Service`]: registration interface implemented by service stubs
//!
//! Payloads are opaque bytes to the core; [`typed`] has the postcard helpers stubs use to
//! encode their messages.

#![warn(missing_docs)]

pub mod chain;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod mainloop;
pub mod panic;
pub mod registry;
pub mod reply;
pub mod service;
pub mod socket;
pub mod state;
pub mod timer;
pub mod trace;
pub mod transport;
pub mod typed;

pub use chain::{CallContext, ChainBuilder, Direction, FnInterceptor, Interceptor, InterceptorChain, Next, from_fn};
pub use codec::{Codec, CodecBoundary, EnvelopeCodec};
pub use config::RpcConfig;
pub use dispatch::{DispatchTable, HandlerRegistration};
pub use engine::Engine;
pub use envelope::{CorrelationId, CounterIdGen, EnvelopeKind, MethodId, RpcEnvelope};
pub use error::{Error, Result, RpcError};
pub use guard::LivenessGuard;
pub use mainloop::{MainLoop, TokioEngine};
pub use panic::ProtectedCall;
pub use registry::{CallRegistry, Completion, PendingCall, TimeoutNotice};
pub use reply::ReplyHandle;
pub use service::{Handler, Request, Service, handler};
pub use socket::{CallOptions, ProtocolFault, RpcClient};
pub use state::{ConnectionState, SharedState};
pub use timer::{DelayQueueTimers, ManualTimers, TimeoutSupervisor, TimerFacility};
pub use trace::Tracing;
pub use transport::{FrameQueue, Transport};
pub use typed::{TypedReply, typed_handler};
