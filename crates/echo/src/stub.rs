//! Typed stub for the `EchoServer` service: the server-side trait with its [`Service`]
//! adapter, and the calling client.

use std::sync::Arc;

use tandem_rpc::{CallOptions, Handler, MethodId, RpcClient, RpcError, Service, TypedReply, typed_handler};

use crate::proto::{ECHO, EchoRequest, EchoResponse, LOGIN, LoginRequest, LoginResponse};

/// Server side of `EchoServer`.
///
/// Each method receives the decoded request and a reply handle that must be answered
/// exactly once, now or later from another task.
pub trait EchoServer: Send + Sync + 'static {
	/// `EchoServer.Echo`
	fn echo(&self, request: EchoRequest, reply: TypedReply<EchoResponse>) -> Result<(), RpcError>;

	/// `EchoServer.Login`
	fn login(&self, request: LoginRequest, reply: TypedReply<LoginResponse>) -> Result<(), RpcError>;

	/// Runs once after the connection serving this instance closed.
	fn on_close(&self) {}
}

/// Installs an [`EchoServer`] implementation on a connection.
pub struct EchoServerService<S> {
	inner: Arc<S>,
}

impl<S: EchoServer> EchoServerService<S> {
	/// Wraps an implementation for [`Engine::install_service`](tandem_rpc::Engine::install_service).
	#[must_use]
	pub fn new(inner: Arc<S>) -> Self {
		Self { inner }
	}

	/// The wrapped implementation.
	#[must_use]
	pub fn inner(&self) -> &Arc<S> {
		&self.inner
	}
}

impl<S: EchoServer> Service for EchoServerService<S> {
	fn name(&self) -> &str {
		"EchoServer"
	}

	fn methods(self: Arc<Self>) -> Vec<(MethodId, Handler)> {
		let echo = Arc::clone(&self.inner);
		let login = Arc::clone(&self.inner);
		vec![
			(ECHO, typed_handler(move |req, reply| echo.echo(req, reply))),
			(LOGIN, typed_handler(move |req, reply| login.login(req, reply))),
		]
	}

	fn on_close(&self) {
		self.inner.on_close();
	}
}

/// Calling side of `EchoServer`.
#[derive(Clone)]
pub struct EchoServerClient {
	rpc: RpcClient,
}

impl EchoServerClient {
	/// Stub over an untyped connection handle.
	#[must_use]
	pub fn new(rpc: RpcClient) -> Self {
		Self { rpc }
	}

	/// Calls `EchoServer.Echo`; `on_complete` runs on the connection's loop.
	///
	/// # Errors
	///
	/// [`tandem_rpc::Error::ConnectionClosed`] if the connection is going away, in which
	/// case `on_complete` never runs.
	pub fn echo(
		&self,
		request: &EchoRequest,
		options: CallOptions,
		on_complete: impl FnOnce(Result<EchoResponse, RpcError>) + Send + 'static,
	) -> tandem_rpc::Result<()> {
		self.rpc.invoke_typed(ECHO, request, options, on_complete)
	}

	/// Calls `EchoServer.Login`.
	///
	/// # Errors
	///
	/// Same as [`EchoServerClient::echo`].
	pub fn login(
		&self,
		request: &LoginRequest,
		options: CallOptions,
		on_complete: impl FnOnce(Result<LoginResponse, RpcError>) + Send + 'static,
	) -> tandem_rpc::Result<()> {
		self.rpc.invoke_typed(LOGIN, request, options, on_complete)
	}

	/// Calls `EchoServer.Echo` and waits for the response.
	///
	/// # Errors
	///
	/// The failed [`RpcError`] of the call.
	pub async fn echo_async(&self, request: &EchoRequest, options: CallOptions) -> Result<EchoResponse, RpcError> {
		self.rpc.request_typed(ECHO, request, options).await
	}

	/// The untyped connection handle.
	#[must_use]
	pub fn rpc(&self) -> &RpcClient {
		&self.rpc
	}
}
