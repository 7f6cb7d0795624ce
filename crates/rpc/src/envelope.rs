//! Decoded RPC envelopes and their identifiers.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Identifier of a remotely callable method, e.g. `"EchoServer.Echo"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(Cow<'static, str>);

impl MethodId {
	/// Creates a method id from a static string, usable in `const` items.
	#[must_use]
	pub const fn from_static(name: &'static str) -> Self {
		Self(Cow::Borrowed(name))
	}

	/// Returns the method name.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MethodId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&'static str> for MethodId {
	fn from(name: &'static str) -> Self {
		Self::from_static(name)
	}
}

impl From<String> for MethodId {
	fn from(name: String) -> Self {
		Self(Cow::Owned(name))
	}
}

/// Identifier pairing an outbound call with its eventual reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Counter-based correlation id generator, one per connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub u64);

impl CounterIdGen {
	/// Creates a new counter starting at 0.
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Generates the next unique ID and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> CorrelationId {
		let id = self.0;
		self.0 += 1;
		CorrelationId(id)
	}
}

/// Whether an envelope opens a call or answers one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
	/// A call travelling towards a handler.
	Request,
	/// An answer travelling back to the caller.
	Response,
}

/// One decoded RPC request or response, independent of wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEnvelope {
	/// Target (or answered) method.
	pub method: MethodId,
	/// Call identifier allocated by the caller.
	pub correlation_id: CorrelationId,
	/// Request or response.
	pub kind: EnvelopeKind,
	/// Opaque encoded message.
	pub payload: Bytes,
	/// Outcome carried by responses; always success on requests.
	pub status: RpcError,
}

impl RpcEnvelope {
	/// Builds a request envelope.
	#[must_use]
	pub fn request(method: MethodId, correlation_id: CorrelationId, payload: Bytes) -> Self {
		Self {
			method,
			correlation_id,
			kind: EnvelopeKind::Request,
			payload,
			status: RpcError::ok(),
		}
	}

	/// Builds a response envelope.
	#[must_use]
	pub fn response(method: MethodId, correlation_id: CorrelationId, payload: Bytes, status: RpcError) -> Self {
		Self {
			method,
			correlation_id,
			kind: EnvelopeKind::Response,
			payload,
			status,
		}
	}

	/// Returns true for requests.
	#[must_use]
	pub fn is_request(&self) -> bool {
		self.kind == EnvelopeKind::Request
	}
}
