//! Single-use answer channel handed to handlers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::envelope::{CorrelationId, MethodId};
use crate::error::{Error, Result, RpcError};
use crate::socket::{LoopEvent, ProtocolFault};

struct ReplyInner {
	method: MethodId,
	correlation_id: CorrelationId,
	answered: AtomicBool,
	dispatched: AtomicBool,
	tx: mpsc::UnboundedSender<LoopEvent>,
}

impl Drop for ReplyInner {
	fn drop(&mut self) {
		if !*self.answered.get_mut() {
			let _: std::result::Result<_, _> = self.tx.send(LoopEvent::Unanswered {
				method: self.method.clone(),
				correlation_id: self.correlation_id,
				dispatched: *self.dispatched.get_mut(),
			});
		}
	}
}

/// Answer channel for one inbound call.
///
/// Clones share state, so a handler may move a clone into a task and answer later. Exactly
/// one of [`reply`](Self::reply) or [`error`](Self::error) must succeed: a second answer
/// returns [`Error::AlreadyReplied`] and is reported as [`ProtocolFault::DoubleReply`];
/// dropping every clone unanswered after the handler ran fails the remote call with
/// `"handler did not reply"` and reports [`ProtocolFault::NoReply`].
#[derive(Clone)]
pub struct ReplyHandle {
	inner: Arc<ReplyInner>,
}

impl ReplyHandle {
	pub(crate) fn new(method: MethodId, correlation_id: CorrelationId, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
		Self {
			inner: Arc::new(ReplyInner {
				method,
				correlation_id,
				answered: AtomicBool::new(false),
				dispatched: AtomicBool::new(false),
				tx,
			}),
		}
	}

	/// Answers the call successfully.
	///
	/// # Errors
	///
	/// [`Error::AlreadyReplied`] on a second answer, [`Error::ConnectionClosed`] if the
	/// connection's loop is gone.
	pub fn reply(&self, payload: impl Into<Bytes>) -> Result<()> {
		self.answer(payload.into(), RpcError::ok())
	}

	/// Fails the call.
	///
	/// # Errors
	///
	/// Same as [`ReplyHandle::reply`].
	pub fn error(&self, err: RpcError) -> Result<()> {
		self.answer(Bytes::new(), err)
	}

	/// Returns true once the call has been answered.
	#[must_use]
	pub fn is_answered(&self) -> bool {
		self.inner.answered.load(Ordering::Acquire)
	}

	/// Answered method.
	#[must_use]
	pub fn method(&self) -> &MethodId {
		&self.inner.method
	}

	/// Answered call.
	#[must_use]
	pub fn correlation_id(&self) -> CorrelationId {
		self.inner.correlation_id
	}

	fn answer(&self, payload: Bytes, status: RpcError) -> Result<()> {
		if self.inner.answered.swap(true, Ordering::AcqRel) {
			let _: std::result::Result<_, _> = self.inner.tx.send(LoopEvent::Fault(ProtocolFault::DoubleReply {
				method: self.inner.method.clone(),
				correlation_id: self.inner.correlation_id,
			}));
			return Err(Error::AlreadyReplied(self.inner.correlation_id));
		}
		self.send(payload, status)
	}

	/// Records that the handler was entered. Only then is an unanswered drop a
	/// [`ProtocolFault::NoReply`].
	pub(crate) fn mark_dispatched(&self) {
		self.inner.dispatched.store(true, Ordering::Release);
	}

	/// Fails the call on behalf of the engine unless the handler already answered.
	///
	/// Returns false if an answer was already sent.
	pub(crate) fn fail_unanswered(&self, err: RpcError) -> bool {
		if self.inner.answered.swap(true, Ordering::AcqRel) {
			return false;
		}
		let _: Result<()> = self.send(Bytes::new(), err);
		true
	}

	fn send(&self, payload: Bytes, status: RpcError) -> Result<()> {
		self.inner
			.tx
			.send(LoopEvent::Reply {
				method: self.inner.method.clone(),
				correlation_id: self.inner.correlation_id,
				payload,
				status,
			})
			.map_err(|_| Error::ConnectionClosed)
	}
}

impl fmt::Debug for ReplyHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReplyHandle")
			.field("method", &self.inner.method)
			.field("correlation_id", &self.inner.correlation_id)
			.field("answered", &self.is_answered())
			.finish()
	}
}
