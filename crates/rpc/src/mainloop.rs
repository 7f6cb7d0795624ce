//! Tokio driver for one connection's [`Engine`].

use std::future::poll_fn;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::{Codec, EnvelopeCodec};
use crate::engine::{Engine, Wake};
use crate::error::{Error, Result};
use crate::timer::DelayQueueTimers;
use crate::transport::FrameQueue;

const READ_CHUNK: usize = 8 * 1024;

/// Defines getter methods for accessing the wrapped engine.
macro_rules! define_getters {
    (impl[$($generic:tt)*] $ty:ty, $field:ident : $field_ty:ty) => {
        impl<$($generic)*> $ty {
            /// Get a reference to the inner engine.
            #[must_use]
            pub fn get_ref(&self) -> &$field_ty {
                &self.$field
            }

            /// Get a mutable reference to the inner engine.
            #[must_use]
            pub fn get_mut(&mut self) -> &mut $field_ty {
                &mut self.$field
            }

            /// Consume self, returning the inner engine.
            #[must_use]
            pub fn into_inner(self) -> $field_ty {
                self.$field
            }
        }
    };
}

/// Connection engine driven by the tokio loop.
pub type TokioEngine<C = EnvelopeCodec> = Engine<C, FrameQueue, DelayQueueTimers>;

/// Single-task event loop for one connection.
///
/// Every engine mutation and every completion callback runs on the task polling
/// [`MainLoop::run`]; handles enqueue work from anywhere.
pub struct MainLoop<C = EnvelopeCodec> {
	/// The wrapped connection engine.
	engine: TokioEngine<C>,
}

define_getters!(impl[C] MainLoop<C>, engine: TokioEngine<C>);

impl<C: Codec> MainLoop<C> {
	/// Wraps an established engine.
	#[must_use]
	pub fn new(engine: TokioEngine<C>) -> Self {
		Self { engine }
	}

	/// Drives the connection until the peer hangs up.
	///
	/// # Errors
	///
	/// See [`MainLoop::run_with_shutdown`].
	pub async fn run(self, input: impl AsyncRead + Unpin, output: impl AsyncWrite + Unpin) -> Result<()> {
		self.run_with_shutdown(input, output, CancellationToken::new()).await
	}

	/// Drives the connection until the peer hangs up or `shutdown` is cancelled, then closes
	/// it: pending calls fail with `"connection closed"` and their callbacks run before this
	/// returns.
	///
	/// # Errors
	///
	/// - [`Error::NotEstablished`] if the engine was never established.
	/// - [`Error::Io`] when `input` or `output` fails.
	/// - [`Error::Decode`] and [`Error::FrameTooLarge`] when the peer sends malformed frames.
	pub async fn run_with_shutdown(
		mut self,
		mut input: impl AsyncRead + Unpin,
		mut output: impl AsyncWrite + Unpin,
		shutdown: CancellationToken,
	) -> Result<()> {
		if !self.engine.state().is_established() {
			return Err(Error::NotEstablished);
		}
		let mut buf = BytesMut::with_capacity(READ_CHUNK);

		let ret = loop {
			if let Err(err) = self.flush(&mut output).await {
				break Err(err);
			}
			buf.clear();

			let step = tokio::select! {
				biased;

				() = shutdown.cancelled() => {
					debug!(target: "rpc", "rpc.loop.shutdown");
					break Ok(());
				}

				wake = poll_fn(|cx| self.engine.poll_wake(cx)) => {
					match wake {
						Wake::Event(event) => self.engine.handle_event(event),
						Wake::Timer(id) => self.engine.on_timer_expired(id),
					}
					Ok(())
				}

				read = input.read_buf(&mut buf) => match read {
					Ok(0) => {
						info!(target: "rpc", "rpc.loop.eof");
						break Ok(());
					}
					Ok(_) => self.engine.on_receive(&buf),
					Err(err) => break Err(err.into()),
				},
			};

			if let Err(err) = step {
				error!(target: "rpc", error = %err, "rpc.loop.decode_fault");
				break Err(err);
			}
		};

		self.engine.close();
		let flushed = self.flush(&mut output).await;
		// The peer may already be gone.
		let _: Result<_, _> = output.shutdown().await;
		ret.and(flushed)
	}

	/// Applies queued events, runs deferred callbacks and writes every queued frame.
	async fn flush(&mut self, output: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
		self.engine.pump();
		let mut wrote = false;
		while let Some(frame) = self.engine.transport_mut().pop() {
			output.write_all(&frame).await?;
			wrote = true;
		}
		if wrote {
			output.flush().await?;
		}
		Ok(())
	}
}
