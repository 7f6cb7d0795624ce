//! Demo configuration, loaded from an optional TOML file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tandem_rpc::RpcConfig;

/// Settings shared by the server and client modes.
///
/// ```toml
/// call_timeout_ms = 3000
/// ping_pong = false
///
/// [rpc]
/// max_frame_len = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EchoConfig {
	/// Engine settings for every connection.
	pub rpc: RpcConfig,
	/// Deadline of the initial `Echo` call made by client connections.
	pub call_timeout_ms: u64,
	/// Client connections also echo back every request the server sends them.
	pub ping_pong: bool,
}

impl Default for EchoConfig {
	fn default() -> Self {
		Self {
			rpc: RpcConfig::default(),
			call_timeout_ms: 3000,
			ping_pong: false,
		}
	}
}

impl EchoConfig {
	/// Reads and parses `path`.
	///
	/// # Errors
	///
	/// I/O errors reading the file and TOML errors parsing it.
	pub fn load(path: &Path) -> crate::Result<Self> {
		let text = std::fs::read_to_string(path)?;
		Ok(toml::from_str(&text)?)
	}

	/// Deadline of the client's echo call.
	#[must_use]
	pub fn call_timeout(&self) -> Duration {
		Duration::from_millis(self.call_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn partial_file_keeps_defaults() {
		let config: EchoConfig = toml::from_str("ping_pong = true\n[rpc]\ndefault_timeout_ms = 500\n").unwrap();
		assert!(config.ping_pong);
		assert_eq!(config.call_timeout(), Duration::from_secs(3));
		assert_eq!(config.rpc.default_timeout(), Some(Duration::from_millis(500)));
		assert_eq!(config.rpc.max_frame_len, RpcConfig::default().max_frame_len);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(toml::from_str::<EchoConfig>("timeout = 1\n").is_err());
	}
}
