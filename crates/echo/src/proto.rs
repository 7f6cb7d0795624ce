//! Messages and method ids of the `EchoServer` service.

use serde::{Deserialize, Serialize};
use tandem_rpc::MethodId;

/// `EchoServer.Echo`
pub const ECHO: MethodId = MethodId::from_static("EchoServer.Echo");
/// `EchoServer.Login`
pub const LOGIN: MethodId = MethodId::from_static("EchoServer.Login");

/// Argument of `EchoServer.Echo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
	/// Text to echo.
	pub message: String,
}

/// Result of `EchoServer.Echo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
	/// Answer text.
	pub message: String,
}

/// Argument of `EchoServer.Login`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
	/// Name of the user logging in.
	pub user: String,
}

/// Empty result of `EchoServer.Login`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {}
