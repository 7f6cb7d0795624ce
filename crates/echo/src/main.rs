//! Echo demo binary.
//!
//! `server` accepts TCP connections and serves `EchoServer` on each, calling every client
//! back after answering it. `client` opens `num` connections from a single event loop
//! thread and sends `Echo{"hello"}` on each.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tandem_echo::EchoConfig;
use tandem_echo::connection::{run_client, serve};
use tokio::net::{TcpListener, lookup_host};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Echo demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tandem-echo")]
#[command(about = "Echo service demo over the tandem RPC core")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH", global = true)]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Serve `EchoServer` on every accepted connection
	Server {
		/// Address to listen on
		#[arg(short, long, default_value = "127.0.0.1:9999")]
		listen: SocketAddr,
	},
	/// Open connections to a server and send one echo on each
	Client {
		host: String,
		port: u16,
		/// Number of connections
		num: usize,
	},
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => EchoConfig::load(path)?,
		None => EchoConfig::default(),
	};

	// All connections, their callbacks and their timers share one thread.
	let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
	runtime.block_on(async move {
		let shutdown = CancellationToken::new();
		tokio::spawn({
			let shutdown = shutdown.clone();
			async move {
				if tokio::signal::ctrl_c().await.is_ok() {
					info!("interrupted");
					shutdown.cancel();
				}
			}
		});

		match args.command {
			Command::Server { listen } => {
				let listener = TcpListener::bind(listen).await?;
				serve(listener, config, shutdown).await?;
			}
			Command::Client { host, port, num } => {
				let addr = lookup_host((host.as_str(), port))
					.await?
					.next()
					.ok_or_else(|| format!("{host}:{port} did not resolve"))?;
				info!(%addr, num, "starting clients");
				let config = Arc::new(config);
				let mut clients = tokio::task::JoinSet::new();
				for _ in 0..num {
					clients.spawn(run_client(addr, Arc::clone(&config), shutdown.child_token()));
				}
				while let Some(joined) = clients.join_next().await {
					match joined {
						Ok(Ok(())) => {}
						Ok(Err(e)) => println!("connect failed: {e}"),
						Err(e) => error!(error = %e, "client task failed"),
					}
				}
			}
		}
		Ok::<(), Box<dyn std::error::Error>>(())
	})
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("tandem_echo=debug,echo=debug,rpc=debug,info")
		} else {
			EnvFilter::new("info")
		}
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
		.init();
}
