//! The demo `EchoServer` implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tandem_rpc::{CallOptions, RpcError, TypedReply};
use tracing::{debug, info, warn};

use crate::proto::{EchoRequest, EchoResponse, LoginRequest, LoginResponse};
use crate::stub::{EchoServer, EchoServerClient};

/// Answers every echo with `"world"`, then optionally echoes the request back to the peer.
pub struct EchoService {
	peer: Option<EchoServerClient>,
	echoes: AtomicU64,
	callbacks: Arc<AtomicU64>,
}

impl EchoService {
	/// `peer` receives a copy of every echo request after it has been answered.
	#[must_use]
	pub fn new(peer: Option<EchoServerClient>) -> Self {
		Self {
			peer,
			echoes: AtomicU64::new(0),
			callbacks: Arc::default(),
		}
	}

	/// Echo requests answered so far.
	#[must_use]
	pub fn echoes(&self) -> u64 {
		self.echoes.load(Ordering::Relaxed)
	}

	/// Callbacks to the peer that completed successfully.
	#[must_use]
	pub fn callbacks(&self) -> u64 {
		self.callbacks.load(Ordering::Relaxed)
	}
}

impl EchoServer for EchoService {
	fn echo(&self, request: EchoRequest, reply: TypedReply<EchoResponse>) -> Result<(), RpcError> {
		self.echoes.fetch_add(1, Ordering::Relaxed);
		debug!(target: "echo", message = %request.message, id = %reply.correlation_id(), "echo.request");
		reply.reply(&EchoResponse {
			message: "world".to_owned(),
		})?;

		let Some(peer) = &self.peer else {
			return Ok(());
		};
		let callbacks = Arc::clone(&self.callbacks);
		let started = peer.echo(&request, CallOptions::new(), move |result| match result {
			Ok(response) => {
				callbacks.fetch_add(1, Ordering::Relaxed);
				debug!(target: "echo", message = %response.message, "echo.callback.done");
			}
			Err(err) => warn!(target: "echo", reason = err.reason(), "echo.callback.failed"),
		});
		if let Err(err) = started {
			debug!(target: "echo", error = %err, "echo.callback.skipped");
		}
		Ok(())
	}

	fn login(&self, request: LoginRequest, reply: TypedReply<LoginResponse>) -> Result<(), RpcError> {
		info!(target: "echo", user = %request.user, "echo.login");
		reply.reply(&LoginResponse {})?;
		Ok(())
	}

	fn on_close(&self) {
		info!(target: "echo", echoes = self.echoes(), "echo.session.closed");
	}
}
