//! Registration interface implemented by service stubs.

use std::sync::Arc;

use bytes::Bytes;

use crate::envelope::{CorrelationId, MethodId};
use crate::error::RpcError;
use crate::reply::ReplyHandle;

/// One decoded inbound call handed to a handler.
pub struct Request {
	/// Called method.
	pub method: MethodId,
	/// Caller-assigned call id.
	pub correlation_id: CorrelationId,
	/// Encoded request message.
	pub payload: Bytes,
	/// Answer channel; answer exactly once.
	pub reply: ReplyHandle,
}

/// Handler function for one method.
///
/// Returning `Err` is a handler fault: the engine fails the remote call with it unless the
/// handler already answered.
pub type Handler = Arc<dyn Fn(Request) -> Result<(), RpcError> + Send + Sync>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
	F: Fn(Request) -> Result<(), RpcError> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// A set of handlers installed together, with a hook for connection teardown.
///
/// Generated stubs implement this for each service; the core only sees method ids and
/// opaque payloads.
pub trait Service: Send + Sync + 'static {
	/// Service name for logs.
	fn name(&self) -> &str;

	/// Handlers to install, one per method.
	fn methods(self: Arc<Self>) -> Vec<(MethodId, Handler)>;

	/// Runs once on the connection's loop after the connection closed.
	fn on_close(&self) {}
}
