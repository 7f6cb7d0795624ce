//! Error types: the loop-level [`Error`] and the completion-level [`RpcError`] value.

use std::io;

use serde::{Deserialize, Serialize};

use crate::envelope::{CorrelationId, MethodId};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors raised at the core/transport boundary or by misuse of the API.
///
/// Failures of individual calls never surface as this type; they travel as [`RpcError`]
/// values through completion callbacks.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The connection is closing or closed.
	#[error("connection closed")]
	ConnectionClosed,
	/// The connection has not been established yet.
	#[error("connection is not established")]
	NotEstablished,
	/// Inbound bytes could not be decoded into an envelope.
	#[error("decode failed: {0}")]
	Decode(String),
	/// An envelope or payload could not be encoded.
	#[error("encode failed: {0}")]
	Encode(String),
	/// A frame exceeds the configured size limit.
	#[error("frame of {len} bytes exceeds the limit of {max} bytes")]
	FrameTooLarge {
		/// Announced or encoded frame length.
		len: usize,
		/// Configured maximum.
		max: usize,
	},
	/// A handler is already installed for this method on the connection.
	#[error("method `{0}` is already installed")]
	DuplicateMethod(MethodId),
	/// The call was already answered through its reply handle.
	#[error("call {0} was already replied to")]
	AlreadyReplied(CorrelationId),
	/// Input/output errors from the underlying transport.
	#[error("{0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// Returns true for faults caused by malformed inbound bytes.
	///
	/// The transport is expected to tear the connection down after one of these.
	#[must_use]
	pub const fn is_decode_fault(&self) -> bool {
		matches!(self, Self::Decode(_) | Self::FrameTooLarge { .. })
	}
}

/// Outcome of an RPC, delivered to every completion path.
///
/// `failed == false` with an empty reason signals success. This is a plain value: it is
/// serialized into response envelopes so remote failures reach the caller unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}")]
pub struct RpcError {
	failed: bool,
	reason: String,
}

impl RpcError {
	/// Reason used when no reply arrives before the deadline.
	pub const TIMEOUT: &'static str = "timeout";
	/// Reason used for calls force-completed at connection teardown.
	pub const CONNECTION_CLOSED: &'static str = "connection closed";
	/// Reason used when the peer has no handler for the method.
	pub const METHOD_NOT_FOUND: &'static str = "method not found";
	/// Reason used when a handler dropped its reply handle without answering.
	pub const NO_REPLY: &'static str = "handler did not reply";
	/// Reason used when an inbound interceptor stopped a call without answering it.
	pub const NOT_ANSWERED: &'static str = "call was not answered";

	/// The success value.
	#[must_use]
	pub const fn ok() -> Self {
		Self {
			failed: false,
			reason: String::new(),
		}
	}

	/// A failure with the given reason.
	#[must_use]
	pub fn failed(reason: impl Into<String>) -> Self {
		Self {
			failed: true,
			reason: reason.into(),
		}
	}

	/// Deadline expiry.
	#[must_use]
	pub fn timeout() -> Self {
		Self::failed(Self::TIMEOUT)
	}

	/// Connection teardown.
	#[must_use]
	pub fn connection_closed() -> Self {
		Self::failed(Self::CONNECTION_CLOSED)
	}

	/// Unknown method on the receiving side.
	#[must_use]
	pub fn method_not_found() -> Self {
		Self::failed(Self::METHOD_NOT_FOUND)
	}

	/// Handler never answered.
	#[must_use]
	pub fn no_reply() -> Self {
		Self::failed(Self::NO_REPLY)
	}

	/// Call stopped before its handler without an answer.
	#[must_use]
	pub fn not_answered() -> Self {
		Self::failed(Self::NOT_ANSWERED)
	}

	/// Returns true if this value describes a failure.
	#[must_use]
	pub const fn is_failed(&self) -> bool {
		self.failed
	}

	/// Human readable failure reason; empty on success.
	#[must_use]
	pub fn reason(&self) -> &str {
		&self.reason
	}

	/// Converts into a `Result`, mapping success to `Ok(())`.
	///
	/// # Errors
	///
	/// Returns `self` when it describes a failure.
	pub fn into_result(self) -> std::result::Result<(), Self> {
		if self.failed { Err(self) } else { Ok(()) }
	}
}

impl From<Error> for RpcError {
	fn from(err: Error) -> Self {
		Self::from(&err)
	}
}

impl From<&Error> for RpcError {
	fn from(err: &Error) -> Self {
		Self::failed(err.to_string())
	}
}
