//! Per-call deadline timers.
//!
//! The engine never sleeps. It arms timers through a [`TimerFacility`] owned by the event
//! loop; whoever drives the loop reports expiries back with
//! [`Engine::on_timer_expired`](crate::Engine::on_timer_expired).

use std::collections::{BTreeMap, HashMap};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::time::{DelayQueue, delay_queue};

use crate::envelope::CorrelationId;

/// Timer source provided by the transport's event loop.
pub trait TimerFacility {
	/// Cancellation handle for an armed timer.
	type Key;

	/// Arms a timer firing `after` from now for call `id`.
	fn arm(&mut self, id: CorrelationId, after: Duration) -> Self::Key;

	/// Disarms a timer that has not fired.
	fn cancel(&mut self, key: Self::Key);

	/// Polls for the next expired call id.
	///
	/// Facilities driven externally keep the default, which never yields.
	fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<CorrelationId>> {
		let _ = cx;
		Poll::Pending
	}
}

/// Schedules and cancels call deadlines on the owning loop's facility.
#[derive(Debug)]
pub struct TimeoutSupervisor<T> {
	timers: T,
	armed: usize,
}

impl<T: TimerFacility> TimeoutSupervisor<T> {
	/// Wraps a timer facility.
	#[must_use]
	pub fn new(timers: T) -> Self {
		Self { timers, armed: 0 }
	}

	/// Arms the deadline of call `id`.
	pub fn schedule(&mut self, id: CorrelationId, after: Duration) -> T::Key {
		self.armed += 1;
		tracing::trace!(target: "rpc", %id, after_ms = after.as_millis() as u64, "rpc.timer.armed");
		self.timers.arm(id, after)
	}

	/// Disarms a deadline that has not fired.
	pub fn cancel(&mut self, key: T::Key) {
		self.armed = self.armed.saturating_sub(1);
		self.timers.cancel(key);
	}

	/// Records that an armed deadline fired.
	pub(crate) fn fired(&mut self) {
		self.armed = self.armed.saturating_sub(1);
	}

	/// Number of deadlines armed and not yet fired or cancelled.
	#[must_use]
	pub const fn armed(&self) -> usize {
		self.armed
	}

	/// Polls the facility for an expired deadline.
	pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<CorrelationId>> {
		self.timers.poll_expired(cx)
	}

	/// The wrapped facility.
	#[must_use]
	pub fn timers(&self) -> &T {
		&self.timers
	}

	/// Mutable access to the wrapped facility.
	pub fn timers_mut(&mut self) -> &mut T {
		&mut self.timers
	}
}

/// Tokio timer facility backed by a [`DelayQueue`].
#[derive(Debug, Default)]
pub struct DelayQueueTimers {
	queue: DelayQueue<CorrelationId>,
}

impl DelayQueueTimers {
	/// Creates an empty queue.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of armed timers.
	#[must_use]
	pub fn len(&self) -> usize {
		self.queue.len()
	}

	/// Returns true if no timer is armed.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}
}

impl TimerFacility for DelayQueueTimers {
	type Key = delay_queue::Key;

	fn arm(&mut self, id: CorrelationId, after: Duration) -> Self::Key {
		self.queue.insert(id, after)
	}

	fn cancel(&mut self, key: Self::Key) {
		// Keys of already-expired entries are stale; removal is then a no-op.
		let _ = self.queue.try_remove(&key);
	}

	fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<CorrelationId>> {
		if self.queue.is_empty() {
			return Poll::Pending;
		}
		self.queue
			.poll_expired(cx)
			.map(|expired| expired.map(|entry| entry.into_inner()))
	}
}

/// Deterministic timer facility on a virtual clock.
///
/// Nothing fires until the owner advances the clock; useful for loops that carry their own
/// timer wheel and for reproducing timeout/reply races in a fixed order.
#[derive(Debug, Default)]
pub struct ManualTimers {
	now: Duration,
	next_key: u64,
	armed: HashMap<u64, (Duration, CorrelationId)>,
	cancelled: usize,
}

/// Handle of a [`ManualTimers`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManualKey(u64);

impl ManualTimers {
	/// Creates a facility at virtual time zero.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Moves the clock forward and returns the calls whose deadline passed, earliest first.
	pub fn advance(&mut self, by: Duration) -> Vec<CorrelationId> {
		self.now += by;
		let now = self.now;
		let mut due: BTreeMap<(Duration, u64), CorrelationId> = BTreeMap::new();
		self.armed.retain(|key, (deadline, id)| {
			if *deadline <= now {
				due.insert((*deadline, *key), *id);
				false
			} else {
				true
			}
		});
		due.into_values().collect()
	}

	/// Current virtual time.
	#[must_use]
	pub const fn now(&self) -> Duration {
		self.now
	}

	/// Number of timers armed and not yet fired or cancelled.
	#[must_use]
	pub fn armed(&self) -> usize {
		self.armed.len()
	}

	/// Number of timers cancelled before firing.
	#[must_use]
	pub const fn cancelled(&self) -> usize {
		self.cancelled
	}
}

impl TimerFacility for ManualTimers {
	type Key = ManualKey;

	fn arm(&mut self, id: CorrelationId, after: Duration) -> Self::Key {
		let key = self.next_key;
		self.next_key += 1;
		self.armed.insert(key, (self.now + after, id));
		ManualKey(key)
	}

	fn cancel(&mut self, key: Self::Key) {
		if self.armed.remove(&key.0).is_some() {
			self.cancelled += 1;
		}
	}
}
