//! Logging interceptor.

use std::time::Instant;

use tracing::debug;

use crate::chain::{CallContext, Interceptor, Next};
use crate::error::RpcError;

/// Logs every envelope passing through, with the pass outcome and elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracing;

impl Interceptor for Tracing {
	fn name(&self) -> &'static str {
		"tracing"
	}

	fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError> {
		let direction = ctx.direction().as_str();
		let method = ctx.method().clone();
		let id = ctx.correlation_id();
		let request = ctx.envelope().is_request();
		let bytes = ctx.envelope().payload.len();
		let started = Instant::now();

		let result = next.run(ctx);

		debug!(
			target: "rpc",
			direction,
			%method,
			%id,
			request,
			bytes,
			ok = result.is_ok(),
			elapsed_us = started.elapsed().as_micros() as u64,
			"rpc.intercept"
		);
		result
	}
}
