//! Protective call: turn panics and handler failures into [`RpcError`] values.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, warn};

use crate::chain::{CallContext, Interceptor, Next};
use crate::error::RpcError;

/// Catches faults raised anywhere below this unit.
///
/// Panics are converted into a failed [`RpcError`] so they never unwind into the event loop;
/// errors returned by inner units or the handler are logged and passed up unchanged. Place it
/// inside any liveness check and before the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectedCall;

impl Interceptor for ProtectedCall {
	fn name(&self) -> &'static str {
		"protected_call"
	}

	fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError> {
		let method = ctx.method().clone();
		let id = ctx.correlation_id();
		match catch_unwind(AssertUnwindSafe(|| next.run(ctx))) {
			Ok(Ok(())) => Ok(()),
			Ok(Err(err)) => {
				warn!(target: "rpc", %method, %id, reason = err.reason(), "rpc.call.failed");
				Err(err)
			}
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				error!(target: "rpc", %method, %id, panic = %message, "rpc.call.panicked");
				Err(RpcError::failed(format!("handler panicked: {message}")))
			}
		}
	}
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_owned()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic payload".to_owned()
	}
}
