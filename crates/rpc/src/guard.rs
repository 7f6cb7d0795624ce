//! Liveness guard: refuse traffic once the connection is going away.

use crate::chain::{CallContext, Interceptor, Next};
use crate::error::RpcError;
use crate::state::SharedState;

/// Short-circuits with `"connection closed"` unless the connection is established.
///
/// Obtain the state handle from [`Engine::state`](crate::Engine::state).
#[derive(Debug, Clone)]
pub struct LivenessGuard {
	state: SharedState,
}

impl LivenessGuard {
	/// Guards passes on the connection owning `state`.
	#[must_use]
	pub fn new(state: SharedState) -> Self {
		Self { state }
	}
}

impl Interceptor for LivenessGuard {
	fn name(&self) -> &'static str {
		"liveness_guard"
	}

	fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError> {
		if !self.state.is_established() {
			tracing::debug!(
				target: "rpc",
				method = %ctx.method(),
				id = %ctx.correlation_id(),
				state = ?self.state.get(),
				"rpc.guard.rejected"
			);
			return Err(RpcError::connection_closed());
		}
		next.run(ctx)
	}
}
