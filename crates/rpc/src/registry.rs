//! In-flight outbound calls keyed by correlation id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::envelope::{CorrelationId, CounterIdGen, MethodId};
use crate::error::RpcError;

/// Completion callback of an outbound call. Receives the response payload (empty on
/// failure) and the call outcome.
pub type Completion = Box<dyn FnOnce(Bytes, RpcError) + Send>;

/// Extra notification fired just before the completion when a call times out.
pub type TimeoutNotice = Box<dyn FnOnce() + Send>;

/// Owner of a call's completion until it runs.
///
/// Dropped unrun, it completes the call with `"connection closed"`: a call accepted by a
/// handle still completes if the loop goes away before applying it.
pub(crate) struct CompletionSlot(Option<Completion>);

impl CompletionSlot {
	pub(crate) fn new(completion: Completion) -> Self {
		Self(Some(completion))
	}

	pub(crate) fn complete(mut self, payload: Bytes, status: RpcError) {
		if let Some(completion) = self.0.take() {
			completion(payload, status);
		}
	}

	/// Drops the completion without running it, for calls rejected synchronously.
	pub(crate) fn disarm(mut self) {
		self.0 = None;
	}
}

impl Drop for CompletionSlot {
	fn drop(&mut self) {
		if let Some(completion) = self.0.take() {
			tracing::debug!(target: "rpc", "rpc.call.completed_on_drop");
			completion(Bytes::new(), RpcError::connection_closed());
		}
	}
}

/// One outbound call awaiting its single completion.
///
/// The registry holds the only reference to the completion closure; removing the entry is
/// what makes a completion path the winning one.
pub struct PendingCall<K> {
	pub(crate) method: MethodId,
	pub(crate) completion: CompletionSlot,
	pub(crate) on_timeout: Option<TimeoutNotice>,
	pub(crate) timer: Option<K>,
	pub(crate) created_at: Instant,
}

impl<K> PendingCall<K> {
	pub(crate) fn new(method: MethodId, completion: CompletionSlot, on_timeout: Option<TimeoutNotice>) -> Self {
		Self {
			method,
			completion,
			on_timeout,
			timer: None,
			created_at: Instant::now(),
		}
	}

	/// Called method.
	#[must_use]
	pub fn method(&self) -> &MethodId {
		&self.method
	}

	/// Time since the call was initiated.
	#[must_use]
	pub fn age(&self) -> Duration {
		self.created_at.elapsed()
	}

	/// Returns true if a deadline timer is armed.
	#[must_use]
	pub fn has_timer(&self) -> bool {
		self.timer.is_some()
	}
}

/// Outstanding calls of one connection.
pub struct CallRegistry<K> {
	ids: CounterIdGen,
	pending: HashMap<CorrelationId, PendingCall<K>>,
}

impl<K> Default for CallRegistry<K> {
	fn default() -> Self {
		Self {
			ids: CounterIdGen::new(),
			pending: HashMap::new(),
		}
	}
}

impl<K> CallRegistry<K> {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a call under a freshly allocated correlation id.
	pub(crate) fn register(&mut self, call: PendingCall<K>) -> CorrelationId {
		let id = self.ids.next();
		assert!(self.pending.insert(id, call).is_none(), "correlation id reused");
		id
	}

	/// Attaches a deadline timer to a pending call. Returns the key back if the call is gone.
	pub(crate) fn set_timer(&mut self, id: CorrelationId, key: K) -> Option<K> {
		match self.pending.get_mut(&id) {
			Some(call) => {
				call.timer = Some(key);
				None
			}
			None => Some(key),
		}
	}

	/// Removes a call; the caller now owns its single completion.
	pub(crate) fn take(&mut self, id: CorrelationId) -> Option<PendingCall<K>> {
		self.pending.remove(&id)
	}

	/// Removes every call, for teardown.
	pub(crate) fn drain(&mut self) -> impl Iterator<Item = (CorrelationId, PendingCall<K>)> + '_ {
		self.pending.drain()
	}

	/// Looks up a pending call.
	#[must_use]
	pub fn get(&self, id: CorrelationId) -> Option<&PendingCall<K>> {
		self.pending.get(&id)
	}

	/// Returns true if `id` is still awaiting completion.
	#[must_use]
	pub fn contains(&self, id: CorrelationId) -> bool {
		self.pending.contains_key(&id)
	}

	/// Number of calls awaiting completion.
	#[must_use]
	pub fn len(&self) -> usize {
		self.pending.len()
	}

	/// Returns true if no call is in flight.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}
