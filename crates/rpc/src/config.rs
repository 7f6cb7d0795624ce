//! Per-connection engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default upper bound for a single frame, matching a 1 MiB receive buffer.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Tunables shared by every connection built from the same configuration.
///
/// Deserializable so binaries can load it from a TOML table:
///
/// ```toml
/// default_timeout_ms = 3000
/// max_frame_len = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
	/// Deadline applied to outbound calls that do not specify one. `None` waits forever.
	pub default_timeout_ms: Option<u64>,
	/// Largest accepted or produced frame body, in bytes.
	pub max_frame_len: usize,
}

impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			default_timeout_ms: None,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}
}

impl RpcConfig {
	/// Deadline for calls without an explicit timeout.
	#[must_use]
	pub fn default_timeout(&self) -> Option<Duration> {
		self.default_timeout_ms.map(Duration::from_millis)
	}

	/// Returns a copy with the given default deadline.
	#[must_use]
	pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
		self
	}
}
