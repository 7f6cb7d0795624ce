//! Outbound side of the transport seam.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::Result;

/// Sink for encoded frames. Reads are pushed into the engine by the transport owner via
/// [`Engine::on_receive`](crate::Engine::on_receive).
pub trait Transport {
	/// Queues one encoded frame for the peer.
	///
	/// # Errors
	///
	/// Returns an error if the frame can no longer be delivered.
	fn send(&mut self, frame: Bytes) -> Result<()>;
}

/// In-memory frame queue, drained by the loop that owns the socket.
#[derive(Debug, Default)]
pub struct FrameQueue {
	frames: VecDeque<Bytes>,
}

impl FrameQueue {
	/// Creates an empty queue.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Removes the oldest queued frame.
	pub fn pop(&mut self) -> Option<Bytes> {
		self.frames.pop_front()
	}

	/// Removes every queued frame in send order.
	pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
		self.frames.drain(..)
	}

	/// Number of queued frames.
	#[must_use]
	pub fn len(&self) -> usize {
		self.frames.len()
	}

	/// Returns true if nothing is queued.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}
}

impl Transport for FrameQueue {
	fn send(&mut self, frame: Bytes) -> Result<()> {
		self.frames.push_back(frame);
		Ok(())
	}
}
