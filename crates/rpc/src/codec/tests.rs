use pretty_assertions::assert_eq;

use super::*;
use crate::envelope::{CorrelationId, MethodId};
use crate::error::RpcError;

fn echo_request() -> RpcEnvelope {
	RpcEnvelope::request(
		MethodId::from_static("EchoServer.Echo"),
		CorrelationId(7),
		Bytes::from_static(b"hello"),
	)
}

#[test]
fn partial_frames_wait_for_more_bytes() {
	let mut boundary = CodecBoundary::new(EnvelopeCodec::default());
	let frame = boundary.encode(echo_request()).unwrap();

	let (head, tail) = frame.split_at(frame.len() / 2);
	boundary.feed(head);
	assert!(boundary.next_envelope().unwrap().is_none());
	assert_eq!(boundary.buffered(), head.len());

	boundary.feed(tail);
	assert_eq!(boundary.next_envelope().unwrap(), Some(echo_request()));
	assert_eq!(boundary.buffered(), 0);
}

#[test]
fn back_to_back_frames_decode_in_arrival_order() {
	let mut boundary = CodecBoundary::new(EnvelopeCodec::default());
	let reply = RpcEnvelope::response(
		MethodId::from_static("EchoServer.Echo"),
		CorrelationId(7),
		Bytes::new(),
		RpcError::method_not_found(),
	);
	let mut wire = BytesMut::new();
	wire.extend_from_slice(&boundary.encode(echo_request()).unwrap());
	wire.extend_from_slice(&boundary.encode(reply.clone()).unwrap());

	boundary.feed(&wire);
	assert_eq!(boundary.next_envelope().unwrap(), Some(echo_request()));
	assert_eq!(boundary.next_envelope().unwrap(), Some(reply));
	assert_eq!(boundary.next_envelope().unwrap(), None);
}

#[test]
fn oversized_announcement_is_a_decode_fault() {
	let mut boundary = CodecBoundary::new(EnvelopeCodec::new(16));
	boundary.feed(&1024u32.to_le_bytes());

	let err = boundary.next_envelope().unwrap_err();
	assert!(err.is_decode_fault());
	assert!(matches!(err, Error::FrameTooLarge { len: 1024, max: 16 }));
	assert_eq!(boundary.buffered(), 0);
}

#[test]
fn garbage_body_is_a_decode_fault() {
	let mut boundary = CodecBoundary::new(EnvelopeCodec::default());
	let mut wire = BytesMut::new();
	wire.put_u32_le(3);
	wire.extend_from_slice(&[0xff, 0xff, 0xff]);
	boundary.feed(&wire);

	let err = boundary.next_envelope().unwrap_err();
	assert!(matches!(err, Error::Decode(_)), "unexpected error: {err}");
}

#[test]
fn encode_refuses_frames_over_the_limit() {
	let mut boundary = CodecBoundary::new(EnvelopeCodec::new(8));
	let err = boundary.encode(echo_request()).unwrap_err();
	assert!(matches!(err, Error::FrameTooLarge { max: 8, .. }));
}
