//! Typed message helpers used by service stubs.
//!
//! The engine moves opaque payload bytes; stubs encode their request and response messages
//! with postcard through these helpers.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::{CorrelationId, MethodId};
use crate::error::{Error, Result, RpcError};
use crate::reply::ReplyHandle;
use crate::service::{Handler, handler};
use crate::socket::{CallOptions, RpcClient};

/// Encodes a message into payload bytes.
///
/// # Errors
///
/// [`Error::Encode`] if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
	postcard::to_allocvec(message)
		.map(Bytes::from)
		.map_err(|e| Error::Encode(e.to_string()))
}

/// Decodes payload bytes into a message.
///
/// # Errors
///
/// [`Error::Decode`] if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
	postcard::from_bytes(payload).map_err(|e| Error::Decode(e.to_string()))
}

/// Reply handle answering with a typed response message.
pub struct TypedReply<Resp> {
	inner: ReplyHandle,
	_resp: PhantomData<fn(Resp)>,
}

impl<Resp> Clone for TypedReply<Resp> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			_resp: PhantomData,
		}
	}
}

impl<Resp: Serialize> TypedReply<Resp> {
	/// Wraps an untyped handle.
	#[must_use]
	pub fn new(inner: ReplyHandle) -> Self {
		Self {
			inner,
			_resp: PhantomData,
		}
	}

	/// Answers with `response`.
	///
	/// # Errors
	///
	/// Same as [`ReplyHandle::reply`]. An encoding failure answers the call with an error
	/// instead and is returned as well.
	pub fn reply(&self, response: &Resp) -> Result<()> {
		match encode(response) {
			Ok(payload) => self.inner.reply(payload),
			Err(err) => {
				self.inner.error(RpcError::from(&err))?;
				Err(err)
			}
		}
	}

	/// Fails the call.
	///
	/// # Errors
	///
	/// Same as [`ReplyHandle::error`].
	pub fn error(&self, err: RpcError) -> Result<()> {
		self.inner.error(err)
	}

	/// Answered call.
	#[must_use]
	pub fn correlation_id(&self) -> CorrelationId {
		self.inner.correlation_id()
	}

	/// The untyped handle.
	#[must_use]
	pub fn untyped(&self) -> &ReplyHandle {
		&self.inner
	}
}

/// Wraps a typed handler: the request is decoded before `f` runs and a malformed request
/// fails the call without reaching it.
pub fn typed_handler<Req, Resp, F>(f: F) -> Handler
where
	Req: DeserializeOwned + 'static,
	Resp: Serialize + 'static,
	F: Fn(Req, TypedReply<Resp>) -> Result<(), RpcError> + Send + Sync + 'static,
{
	handler(move |req| {
		let request: Req = decode(&req.payload).map_err(|err| RpcError::from(&err))?;
		f(request, TypedReply::new(req.reply))
	})
}

impl RpcClient {
	/// Starts a call with typed messages.
	///
	/// A response that does not decode as `Resp` completes the call with a failed
	/// [`RpcError`].
	///
	/// # Errors
	///
	/// [`Error::Encode`] if `request` cannot be encoded, otherwise see
	/// [`RpcClient::invoke`].
	pub fn invoke_typed<Req, Resp>(
		&self,
		method: impl Into<MethodId>,
		request: &Req,
		options: CallOptions,
		on_complete: impl FnOnce(std::result::Result<Resp, RpcError>) + Send + 'static,
	) -> Result<()>
	where
		Req: Serialize,
		Resp: DeserializeOwned + 'static,
	{
		let payload = encode(request)?;
		self.invoke(method, payload, options, move |payload, status| {
			on_complete(
				status
					.into_result()
					.and_then(|()| decode(&payload).map_err(|err| RpcError::from(&err))),
			);
		})
	}

	/// Starts a call with typed messages and waits for its outcome.
	///
	/// # Errors
	///
	/// The failed [`RpcError`] of the call, including encode and decode failures.
	pub async fn request_typed<Req, Resp>(
		&self,
		method: impl Into<MethodId>,
		request: &Req,
		options: CallOptions,
	) -> std::result::Result<Resp, RpcError>
	where
		Req: Serialize,
		Resp: DeserializeOwned,
	{
		let payload = encode(request).map_err(|err| RpcError::from(&err))?;
		let payload = self.request(method, payload, options).await?;
		decode(&payload).map_err(|err| RpcError::from(&err))
	}
}
