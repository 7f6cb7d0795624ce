//! Handles that feed a connection's loop from anywhere.
//!
//! Handles never touch connection state directly: they enqueue [`LoopEvent`]s that the
//! owning loop processes in order, so every mutation and every callback happens on the
//! loop.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::envelope::{CorrelationId, MethodId};
use crate::error::{Error, Result, RpcError};
use crate::registry::{CompletionSlot, TimeoutNotice};
use crate::state::SharedState;

/// Work queued for the connection's loop.
pub(crate) enum LoopEvent {
	/// Start an outbound call.
	Call(OutgoingCall),
	/// Send a handler's answer.
	Reply {
		method: MethodId,
		correlation_id: CorrelationId,
		payload: Bytes,
		status: RpcError,
	},
	/// Every reply handle of a call was dropped without answering. `dispatched` tells
	/// whether the handler ran.
	Unanswered {
		method: MethodId,
		correlation_id: CorrelationId,
		dispatched: bool,
	},
	/// A handle detected protocol misuse.
	Fault(ProtocolFault),
}

pub(crate) struct OutgoingCall {
	pub(crate) method: MethodId,
	pub(crate) payload: Bytes,
	pub(crate) completion: CompletionSlot,
	pub(crate) options: CallOptions,
}

/// Handler contract violations, reported by the engine instead of being ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFault {
	/// A handler answered the same call twice.
	DoubleReply {
		/// Answered method.
		method: MethodId,
		/// Answered call.
		correlation_id: CorrelationId,
	},
	/// A handler released the call without answering.
	NoReply {
		/// Unanswered method.
		method: MethodId,
		/// Unanswered call.
		correlation_id: CorrelationId,
	},
}

/// Per-call options of [`RpcClient::invoke`].
#[derive(Default)]
pub struct CallOptions {
	pub(crate) timeout: Option<Duration>,
	pub(crate) on_timeout: Option<TimeoutNotice>,
}

impl CallOptions {
	/// Options with no deadline beyond the connection default.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Fails the call with `"timeout"` if no reply arrives within `timeout`.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Runs `notice` right before the completion of a timed-out call.
	#[must_use]
	pub fn on_timeout(mut self, notice: impl FnOnce() + Send + 'static) -> Self {
		self.on_timeout = Some(Box::new(notice));
		self
	}
}

/// Cloneable handle for initiating calls on one connection.
#[derive(Clone)]
pub struct RpcClient {
	tx: mpsc::UnboundedSender<LoopEvent>,
	state: SharedState,
}

impl RpcClient {
	pub(crate) fn new(tx: mpsc::UnboundedSender<LoopEvent>, state: SharedState) -> Self {
		Self { tx, state }
	}

	/// Starts a call with default options.
	///
	/// # Errors
	///
	/// See [`RpcClient::invoke`].
	pub fn call(
		&self,
		method: impl Into<MethodId>,
		request: Bytes,
		on_complete: impl FnOnce(Bytes, RpcError) + Send + 'static,
	) -> Result<()> {
		self.invoke(method, request, CallOptions::default(), on_complete)
	}

	/// Starts a call. Returns immediately; `on_complete` later runs exactly once on the
	/// connection's loop with the response or a failure. If the loop goes away before
	/// taking the call, it runs with `"connection closed"` where the engine is dropped.
	///
	/// # Errors
	///
	/// Returns [`Error::ConnectionClosed`] without ever running `on_complete` if the
	/// connection is already closing or closed.
	pub fn invoke(
		&self,
		method: impl Into<MethodId>,
		request: Bytes,
		options: CallOptions,
		on_complete: impl FnOnce(Bytes, RpcError) + Send + 'static,
	) -> Result<()> {
		if self.state.get().is_shutting_down() {
			return Err(Error::ConnectionClosed);
		}
		let call = OutgoingCall {
			method: method.into(),
			payload: request,
			completion: CompletionSlot::new(Box::new(on_complete)),
			options,
		};
		self.tx.send(LoopEvent::Call(call)).map_err(|rejected| {
			if let LoopEvent::Call(call) = rejected.0 {
				call.completion.disarm();
			}
			Error::ConnectionClosed
		})
	}

	/// Starts a call and waits for its outcome.
	///
	/// # Errors
	///
	/// Returns the failed [`RpcError`] of the call, or `"connection closed"` if it could not
	/// be started.
	pub async fn request(
		&self,
		method: impl Into<MethodId>,
		request: Bytes,
		options: CallOptions,
	) -> std::result::Result<Bytes, RpcError> {
		let (tx, rx) = oneshot::channel();
		self.invoke(method, request, options, move |payload, status| {
			let _: std::result::Result<_, _> = tx.send(status.into_result().map(|()| payload));
		})?;
		rx.await.unwrap_or_else(|_| Err(RpcError::connection_closed()))
	}

	/// Lifecycle state of the connection behind this handle.
	#[must_use]
	pub fn state(&self) -> &SharedState {
		&self.state
	}
}

#[cfg(test)]
mod tests;
