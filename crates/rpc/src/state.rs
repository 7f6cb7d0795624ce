//! Connection lifecycle state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one connection: `Connecting → Established → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
	/// Transport is up, RPC state not built yet.
	Connecting = 0,
	/// Dispatch table, chains and registry exist; calls flow.
	Established = 1,
	/// Teardown in progress; no new calls are accepted.
	Closing = 2,
	/// All pending state has been resolved.
	Closed = 3,
}

impl ConnectionState {
	const fn from_u8(raw: u8) -> Self {
		match raw {
			0 => Self::Connecting,
			1 => Self::Established,
			2 => Self::Closing,
			_ => Self::Closed,
		}
	}

	/// Returns true once teardown has started.
	#[must_use]
	pub const fn is_shutting_down(self) -> bool {
		matches!(self, Self::Closing | Self::Closed)
	}
}

/// Lifecycle state readable from any handle of a connection.
///
/// Only the engine advances it; handles read it to fail fast after close.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
	pub(crate) fn new() -> Self {
		Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
	}

	/// Current state.
	#[must_use]
	pub fn get(&self) -> ConnectionState {
		ConnectionState::from_u8(self.0.load(Ordering::Acquire))
	}

	/// Returns true while calls flow.
	#[must_use]
	pub fn is_established(&self) -> bool {
		self.get() == ConnectionState::Established
	}

	/// Advances the state. Transitions never move backwards.
	pub(crate) fn advance(&self, next: ConnectionState) {
		let prev = ConnectionState::from_u8(self.0.fetch_max(next as u8, Ordering::AcqRel));
		if prev < next {
			tracing::debug!(target: "rpc", from = ?prev, to = ?next, "rpc.connection.state");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_only_moves_forward() {
		let state = SharedState::new();
		assert_eq!(state.get(), ConnectionState::Connecting);
		state.advance(ConnectionState::Closing);
		state.advance(ConnectionState::Established);
		assert_eq!(state.get(), ConnectionState::Closing);
		assert!(state.get().is_shutting_down());
		assert!(!state.is_established());
	}
}
