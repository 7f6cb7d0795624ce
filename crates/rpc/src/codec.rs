//! Boundary between raw connection bytes and decoded envelopes.
//!
//! The byte encoding itself belongs to a [`Codec`]: any tokio-util
//! [`Decoder`]/[`Encoder`] pair over [`RpcEnvelope`]. [`CodecBoundary`] only buffers
//! partial input and hands complete envelopes to the engine in arrival order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::envelope::RpcEnvelope;
use crate::error::{Error, Result};

/// Length prefix size of [`EnvelopeCodec`] frames.
const HEADER_LEN: usize = 4;

/// Wire codec consumed by the engine.
pub trait Codec: Decoder<Item = RpcEnvelope, Error = Error> + Encoder<RpcEnvelope, Error = Error> {}

impl<T> Codec for T where T: Decoder<Item = RpcEnvelope, Error = Error> + Encoder<RpcEnvelope, Error = Error> {}

/// Default codec: little-endian `u32` body length followed by a postcard body.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
	max_frame_len: usize,
}

impl EnvelopeCodec {
	/// Creates a codec rejecting bodies larger than `max_frame_len`.
	#[must_use]
	pub const fn new(max_frame_len: usize) -> Self {
		Self { max_frame_len }
	}

	/// Returns the configured body size limit.
	#[must_use]
	pub const fn max_frame_len(&self) -> usize {
		self.max_frame_len
	}
}

impl Default for EnvelopeCodec {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_FRAME_LEN)
	}
}

impl Decoder for EnvelopeCodec {
	type Item = RpcEnvelope;
	type Error = Error;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcEnvelope>> {
		if src.len() < HEADER_LEN {
			return Ok(None);
		}
		let mut header = &src[..HEADER_LEN];
		let len = header.get_u32_le() as usize;
		if len > self.max_frame_len {
			return Err(Error::FrameTooLarge {
				len,
				max: self.max_frame_len,
			});
		}
		if src.len() < HEADER_LEN + len {
			src.reserve(HEADER_LEN + len - src.len());
			return Ok(None);
		}

		src.advance(HEADER_LEN);
		let body = src.split_to(len);
		postcard::from_bytes(&body)
			.map(Some)
			.map_err(|e| Error::Decode(e.to_string()))
	}
}

impl Encoder<RpcEnvelope> for EnvelopeCodec {
	type Error = Error;

	fn encode(&mut self, item: RpcEnvelope, dst: &mut BytesMut) -> Result<()> {
		let body = postcard::to_allocvec(&item).map_err(|e| Error::Encode(e.to_string()))?;
		if body.len() > self.max_frame_len {
			return Err(Error::FrameTooLarge {
				len: body.len(),
				max: self.max_frame_len,
			});
		}
		let len = u32::try_from(body.len()).map_err(|_| Error::FrameTooLarge {
			len: body.len(),
			max: self.max_frame_len,
		})?;
		dst.reserve(HEADER_LEN + body.len());
		dst.put_u32_le(len);
		dst.extend_from_slice(&body);
		Ok(())
	}
}

/// Read/write buffers around a [`Codec`] for one connection.
#[derive(Debug)]
pub struct CodecBoundary<C> {
	codec: C,
	read_buf: BytesMut,
	write_buf: BytesMut,
}

impl<C: Codec> CodecBoundary<C> {
	/// Wraps a codec with empty buffers.
	#[must_use]
	pub fn new(codec: C) -> Self {
		Self {
			codec,
			read_buf: BytesMut::new(),
			write_buf: BytesMut::new(),
		}
	}

	/// Appends raw bytes received from the transport.
	pub fn feed(&mut self, bytes: &[u8]) {
		self.read_buf.extend_from_slice(bytes);
	}

	/// Decodes the next complete envelope, if one is buffered.
	///
	/// # Errors
	///
	/// Returns a decode fault for malformed input. The read buffer is discarded since
	/// frame boundaries can no longer be trusted.
	pub fn next_envelope(&mut self) -> Result<Option<RpcEnvelope>> {
		match self.codec.decode(&mut self.read_buf) {
			Ok(envelope) => Ok(envelope),
			Err(err) => {
				self.read_buf.clear();
				Err(err)
			}
		}
	}

	/// Encodes one envelope into a frame ready for the transport.
	///
	/// # Errors
	///
	/// Returns the codec's encode error.
	pub fn encode(&mut self, envelope: RpcEnvelope) -> Result<Bytes> {
		self.codec.encode(envelope, &mut self.write_buf)?;
		Ok(self.write_buf.split().freeze())
	}

	/// Number of received bytes not yet decoded.
	#[must_use]
	pub fn buffered(&self) -> usize {
		self.read_buf.len()
	}

	/// Returns the wrapped codec.
	#[must_use]
	pub fn codec(&self) -> &C {
		&self.codec
	}
}

#[cfg(test)]
mod tests;
