//! One RPC engine per TCP connection, for both the server and the client side.

use std::net::SocketAddr;
use std::sync::Arc;

use tandem_rpc::{
	CallOptions, Engine, InterceptorChain, LivenessGuard, MainLoop, ProtectedCall, RpcConfig, TokioEngine, Tracing,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EchoConfig;
use crate::error::Result;
use crate::proto::EchoRequest;
use crate::service::EchoService;
use crate::stub::{EchoServerClient, EchoServerService};

/// An established connection with `EchoServer` installed.
pub struct EchoConnection {
	/// The connection's engine, ready for a [`MainLoop`].
	pub engine: TokioEngine,
	/// Stub calling the peer's `EchoServer`.
	pub client: EchoServerClient,
	/// The locally installed service.
	pub service: Arc<EchoService>,
}

/// Builds an established engine: panics and handler errors are contained on the way in,
/// outbound traffic is refused once the connection goes away and logged otherwise.
///
/// With `call_back`, the installed service echoes every request back to the peer after
/// answering it.
///
/// # Errors
///
/// Engine setup failures.
pub fn establish(config: &RpcConfig, call_back: bool) -> Result<EchoConnection> {
	let mut engine = Engine::tokio(config.clone());
	let inbound = InterceptorChain::builder().with(ProtectedCall).build();
	let outbound = InterceptorChain::builder()
		.with(LivenessGuard::new(engine.state()))
		.with(Tracing)
		.build();
	engine.establish(inbound, outbound)?;

	let client = EchoServerClient::new(engine.client());
	let service = Arc::new(EchoService::new(call_back.then(|| client.clone())));
	engine.install_service(Arc::new(EchoServerService::new(Arc::clone(&service))))?;
	Ok(EchoConnection {
		engine,
		client,
		service,
	})
}

/// Drives one connection until either side hangs up or `shutdown` fires.
///
/// # Errors
///
/// Transport and decode failures of the connection.
pub async fn drive(
	engine: TokioEngine,
	reader: impl AsyncRead + Unpin,
	writer: impl AsyncWrite + Unpin,
	shutdown: CancellationToken,
) -> Result<()> {
	MainLoop::new(engine).run_with_shutdown(reader, writer, shutdown).await?;
	Ok(())
}

/// Accepts connections on `listener` and serves `EchoServer` on each until `shutdown`.
///
/// # Errors
///
/// Never fails after binding; accept errors are logged and skipped.
pub async fn serve(listener: TcpListener, config: EchoConfig, shutdown: CancellationToken) -> Result<()> {
	let config = Arc::new(config);
	if let Ok(addr) = listener.local_addr() {
		info!(target: "echo", %addr, "echo.server.listening");
	}

	loop {
		tokio::select! {
			() = shutdown.cancelled() => {
				info!(target: "echo", "echo.server.shutdown");
				break;
			}
			res = listener.accept() => match res {
				Ok((stream, peer)) => {
					tokio::spawn(handle_connection(stream, peer, Arc::clone(&config), shutdown.child_token()));
				}
				Err(e) => error!(target: "echo", error = %e, "echo.server.accept_failed"),
			},
		}
	}

	Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, config: Arc<EchoConfig>, shutdown: CancellationToken) {
	info!(target: "echo", %peer, "echo.session.open");
	let _: std::io::Result<()> = stream.set_nodelay(true);

	let conn = match establish(&config.rpc, true) {
		Ok(conn) => conn,
		Err(e) => {
			error!(target: "echo", %peer, error = %e, "echo.session.setup_failed");
			return;
		}
	};
	let (reader, writer) = stream.into_split();
	if let Err(e) = drive(conn.engine, reader, writer, shutdown).await {
		error!(target: "echo", %peer, error = %e, "echo.session.error");
	}
	info!(target: "echo", %peer, echoes = conn.service.echoes(), "echo.session.closed");
}

/// Connects to `addr`, sends `Echo{"hello"}` and drives the connection until it ends.
///
/// Failures and the deadline of the first call are printed to stdout.
///
/// # Errors
///
/// Connect, transport and decode failures.
pub async fn run_client(addr: SocketAddr, config: Arc<EchoConfig>, shutdown: CancellationToken) -> Result<()> {
	let stream = TcpStream::connect(addr).await?;
	stream.set_nodelay(true)?;
	println!("connect success");

	let conn = establish(&config.rpc, config.ping_pong)?;
	let options = CallOptions::new()
		.timeout(config.call_timeout())
		.on_timeout(|| println!("timeout"));
	conn.client.echo(
		&EchoRequest {
			message: "hello".to_owned(),
		},
		options,
		|result| {
			if let Err(err) = result {
				println!("reason {}", err.reason());
			}
		},
	)?;

	let (reader, writer) = stream.into_split();
	let result = drive(conn.engine, reader, writer, shutdown).await;
	if let Err(e) = &result {
		warn!(target: "echo", %addr, error = %e, "echo.client.error");
	}
	result
}
