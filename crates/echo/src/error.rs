//! Error types for the echo demo.

use std::io;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while configuring or running echo connections.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Engine setup or connection failure.
	#[error(transparent)]
	Rpc(#[from] tandem_rpc::Error),
	/// The configuration file could not be parsed.
	#[error("invalid config: {0}")]
	Config(#[from] toml::de::Error),
	/// Socket or file errors.
	#[error("{0}")]
	Io(#[from] io::Error),
}
