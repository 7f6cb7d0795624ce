//! Per-connection call engine.
//!
//! The engine owns every piece of RPC state of one connection: the call registry, the
//! dispatch table, both interceptor chains and the timeout supervisor. It is driven by a
//! single loop (see [`MainLoop`](crate::MainLoop) for the tokio one) and never blocks:
//!
//! * transport bytes enter through [`Engine::on_receive`];
//! * calls and replies queued by handles are applied by [`Engine::process_events`];
//! * deadline expiries enter through [`Engine::on_timer_expired`];
//! * completion callbacks and close hooks are deferred and run by [`Engine::run_deferred`],
//!   never nested inside the operation that produced them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::chain::{CallContext, Direction, InterceptorChain};
use crate::codec::{Codec, CodecBoundary, EnvelopeCodec};
use crate::config::RpcConfig;
use crate::dispatch::DispatchTable;
use crate::envelope::{CorrelationId, EnvelopeKind, MethodId, RpcEnvelope};
use crate::error::{Error, Result, RpcError};
use crate::registry::{CallRegistry, PendingCall};
use crate::reply::ReplyHandle;
use crate::service::{Handler, Request, Service};
use crate::socket::{LoopEvent, OutgoingCall, ProtocolFault, RpcClient};
use crate::state::{ConnectionState, SharedState};
use crate::timer::{DelayQueueTimers, ManualTimers, TimeoutSupervisor, TimerFacility};
use crate::transport::{FrameQueue, Transport};

type Deferred = Box<dyn FnOnce() + Send>;
type FaultHook = Box<dyn FnMut(&ProtocolFault) + Send>;

/// Something the loop should feed back into the engine.
pub(crate) enum Wake {
	Event(LoopEvent),
	Timer(CorrelationId),
}

/// RPC state machine of one connection.
pub struct Engine<C, T, M: TimerFacility> {
	config: RpcConfig,
	state: SharedState,
	boundary: CodecBoundary<C>,
	transport: T,
	timeouts: TimeoutSupervisor<M>,
	registry: CallRegistry<M::Key>,
	dispatch: Option<DispatchTable>,
	inbound: InterceptorChain,
	outbound: InterceptorChain,
	events_tx: mpsc::UnboundedSender<LoopEvent>,
	events_rx: mpsc::UnboundedReceiver<LoopEvent>,
	deferred: VecDeque<Deferred>,
	fault_hook: Option<FaultHook>,
	faults: usize,
}

impl Engine<EnvelopeCodec, FrameQueue, DelayQueueTimers> {
	/// Engine for the tokio [`MainLoop`](crate::MainLoop): default codec, queued frames,
	/// `DelayQueue` deadlines.
	#[must_use]
	pub fn tokio(config: RpcConfig) -> Self {
		let codec = EnvelopeCodec::new(config.max_frame_len);
		Self::new(codec, FrameQueue::new(), DelayQueueTimers::new(), config)
	}
}

impl<C, T> Engine<C, T, ManualTimers>
where
	C: Codec,
	T: Transport,
{
	/// Advances the virtual clock and expires every deadline that passed.
	///
	/// Returns the number of deadlines that fired.
	pub fn advance_time(&mut self, by: Duration) -> usize {
		let due = self.timeouts.timers_mut().advance(by);
		let fired = due.len();
		for id in due {
			self.on_timer_expired(id);
		}
		fired
	}
}

impl<C, T, M> Engine<C, T, M>
where
	C: Codec,
	T: Transport,
	M: TimerFacility,
{
	/// Creates an engine in [`ConnectionState::Connecting`].
	#[must_use]
	pub fn new(codec: C, transport: T, timers: M, config: RpcConfig) -> Self {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Self {
			config,
			state: SharedState::new(),
			boundary: CodecBoundary::new(codec),
			transport,
			timeouts: TimeoutSupervisor::new(timers),
			registry: CallRegistry::new(),
			dispatch: None,
			inbound: InterceptorChain::empty(),
			outbound: InterceptorChain::empty(),
			events_tx,
			events_rx,
			deferred: VecDeque::new(),
			fault_hook: None,
			faults: 0,
		}
	}

	/// Builds the per-connection RPC state and starts accepting traffic.
	///
	/// `inbound` becomes the default chain in front of handlers, `outbound` runs for every
	/// call and reply leaving the connection.
	///
	/// # Errors
	///
	/// [`Error::ConnectionClosed`] if the connection already went past `Connecting`.
	pub fn establish(&mut self, inbound: InterceptorChain, outbound: InterceptorChain) -> Result<()> {
		if self.state.get() != ConnectionState::Connecting {
			return Err(Error::ConnectionClosed);
		}
		debug!(target: "rpc", inbound = ?inbound, outbound = ?outbound, "rpc.connection.establish");
		self.inbound = inbound;
		self.outbound = outbound;
		self.dispatch = Some(DispatchTable::new());
		self.state.advance(ConnectionState::Established);
		Ok(())
	}

	/// Handle for initiating calls on this connection.
	#[must_use]
	pub fn client(&self) -> RpcClient {
		RpcClient::new(self.events_tx.clone(), self.state.clone())
	}

	/// Shared lifecycle state, e.g. for a [`LivenessGuard`](crate::LivenessGuard).
	#[must_use]
	pub fn state(&self) -> SharedState {
		self.state.clone()
	}

	/// Installs every method of `service` behind the connection's inbound chain.
	///
	/// # Errors
	///
	/// See [`Engine::install_service_with`].
	pub fn install_service<S: Service>(&mut self, service: Arc<S>) -> Result<()> {
		let chain = self.inbound.clone();
		self.install_service_with(service, chain)
	}

	/// Installs every method of `service` behind a dedicated inbound chain.
	///
	/// # Errors
	///
	/// [`Error::NotEstablished`] before [`Engine::establish`] or after close, and
	/// [`Error::DuplicateMethod`] if any method is already installed.
	pub fn install_service_with<S: Service>(&mut self, service: Arc<S>, inbound: InterceptorChain) -> Result<()> {
		self.dispatch_mut()?.install_service(service, inbound)
	}

	/// Installs a standalone handler behind the connection's inbound chain.
	///
	/// The handler gets no close hook; use [`Engine::install_with_close`] or a [`Service`]
	/// to be notified of teardown.
	///
	/// # Errors
	///
	/// Same as [`Engine::install_service_with`].
	pub fn install(&mut self, method: impl Into<MethodId>, handler: Handler) -> Result<()> {
		let chain = self.inbound.clone();
		self.dispatch_mut()?.install(method.into(), handler, chain)
	}

	/// Installs a standalone handler whose `on_close` runs once on the loop after the
	/// connection closed.
	///
	/// # Errors
	///
	/// Same as [`Engine::install_service_with`].
	pub fn install_with_close(
		&mut self,
		method: impl Into<MethodId>,
		handler: Handler,
		on_close: impl Fn() + Send + Sync + 'static,
	) -> Result<()> {
		let chain = self.inbound.clone();
		self.dispatch_mut()?.install_with_close(method.into(), handler, chain, on_close)
	}

	/// Removes the handler of `method`. Returns false if none was installed.
	pub fn uninstall(&mut self, method: &MethodId) -> bool {
		self.dispatch.as_mut().is_some_and(|table| table.uninstall(method))
	}

	/// The dispatch table, while established.
	#[must_use]
	pub fn dispatch_table(&self) -> Option<&DispatchTable> {
		self.dispatch.as_ref()
	}

	fn dispatch_mut(&mut self) -> Result<&mut DispatchTable> {
		self.dispatch.as_mut().ok_or(Error::NotEstablished)
	}

	/// Registers a hook receiving every detected [`ProtocolFault`].
	pub fn on_fault(&mut self, hook: impl FnMut(&ProtocolFault) + Send + 'static) {
		self.fault_hook = Some(Box::new(hook));
	}

	/// Number of protocol faults detected so far.
	#[must_use]
	pub const fn fault_count(&self) -> usize {
		self.faults
	}

	/// Number of outbound calls awaiting completion.
	#[must_use]
	pub fn pending_calls(&self) -> usize {
		self.registry.len()
	}

	/// Outbound call registry.
	#[must_use]
	pub fn registry(&self) -> &CallRegistry<M::Key> {
		&self.registry
	}

	/// Timeout supervisor.
	#[must_use]
	pub fn timeouts(&self) -> &TimeoutSupervisor<M> {
		&self.timeouts
	}

	/// Mutable access to the timer facility.
	pub fn timers_mut(&mut self) -> &mut M {
		self.timeouts.timers_mut()
	}

	/// The transport.
	#[must_use]
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Mutable access to the transport, e.g. to drain queued frames.
	pub fn transport_mut(&mut self) -> &mut T {
		&mut self.transport
	}

	/// Configuration of this connection.
	#[must_use]
	pub fn config(&self) -> &RpcConfig {
		&self.config
	}

	/// Feeds raw transport bytes, dispatching every complete envelope in arrival order.
	///
	/// # Errors
	///
	/// Returns a decode fault for malformed input; the transport should tear the
	/// connection down. Envelopes decoded before the fault have been dispatched.
	pub fn on_receive(&mut self, bytes: &[u8]) -> Result<()> {
		if self.state.get().is_shutting_down() {
			trace!(target: "rpc", len = bytes.len(), "rpc.receive.after_close");
			return Ok(());
		}
		self.boundary.feed(bytes);
		while let Some(envelope) = self.boundary.next_envelope()? {
			self.on_envelope(envelope);
		}
		Ok(())
	}

	fn on_envelope(&mut self, envelope: RpcEnvelope) {
		match envelope.kind {
			EnvelopeKind::Request => self.dispatch_request(envelope),
			EnvelopeKind::Response => self.on_reply(envelope),
		}
	}

	/// Matches a reply to its pending call. Unknown ids are dropped silently: a reply may
	/// legitimately lose the race against its deadline.
	fn on_reply(&mut self, envelope: RpcEnvelope) {
		let id = envelope.correlation_id;
		let Some(call) = self.registry.take(id) else {
			trace!(target: "rpc", %id, method = %envelope.method, "rpc.reply.unmatched");
			return;
		};
		self.finish(id, call, envelope.payload, envelope.status);
	}

	fn finish(&mut self, id: CorrelationId, mut call: PendingCall<M::Key>, payload: Bytes, status: RpcError) {
		if let Some(key) = call.timer.take() {
			self.timeouts.cancel(key);
		}
		trace!(
			target: "rpc",
			%id,
			method = %call.method,
			failed = status.is_failed(),
			elapsed_us = call.age().as_micros() as u64,
			"rpc.call.completed"
		);
		let completion = call.completion;
		self.deferred.push_back(Box::new(move || completion.complete(payload, status)));
	}

	fn dispatch_request(&mut self, envelope: RpcEnvelope) {
		let method = envelope.method.clone();
		let id = envelope.correlation_id;
		let registration = self.dispatch.as_ref().and_then(|table| table.lookup(&method)).cloned();
		let Some(registration) = registration else {
			warn!(target: "rpc", %method, %id, "rpc.dispatch.method_not_found");
			self.send_reply(method, id, Bytes::new(), RpcError::method_not_found());
			return;
		};

		let reply = ReplyHandle::new(method, id, self.events_tx.clone());
		let handler = registration.handler;
		let mut ctx = CallContext::new(envelope, Direction::Inbound).with_reply(reply.clone());
		let result = registration.chain.run(&mut ctx, &mut |ctx| {
			reply.mark_dispatched();
			handler(Request {
				method: ctx.method().clone(),
				correlation_id: ctx.correlation_id(),
				payload: ctx.envelope().payload.clone(),
				reply: reply.clone(),
			})
		});

		if !ctx.reached_terminal() {
			debug!(
				target: "rpc",
				%id,
				at = ?ctx.short_circuited_at(),
				answered = reply.is_answered(),
				"rpc.dispatch.held_by_interceptor"
			);
		}
		if let Err(err) = result
			&& !reply.fail_unanswered(err.clone())
		{
			warn!(target: "rpc", %id, reason = err.reason(), "rpc.dispatch.fault_after_reply");
		}
	}

	/// Sends a handler's answer through the outbound chain.
	///
	/// An answer that cannot leave (oversized frame, rejected by an outbound unit) is
	/// replaced by an empty error reply carrying the send failure, so the remote caller
	/// still completes.
	fn send_reply(&mut self, method: MethodId, id: CorrelationId, payload: Bytes, status: RpcError) {
		if !self.state.is_established() {
			debug!(target: "rpc", %method, %id, "rpc.reply.dropped_after_close");
			return;
		}
		let envelope = RpcEnvelope::response(method.clone(), id, payload, status);
		let Err(err) = self.transmit_outbound(envelope) else {
			return;
		};
		warn!(target: "rpc", %method, %id, reason = err.reason(), "rpc.reply.not_sent");

		let fallback = RpcEnvelope::response(method.clone(), id, Bytes::new(), err);
		if let Err(err) = self.transmit_outbound(fallback) {
			error!(target: "rpc", %method, %id, reason = err.reason(), "rpc.reply.lost");
		}
	}

	fn transmit_outbound(&mut self, envelope: RpcEnvelope) -> Result<(), RpcError> {
		let chain = self.outbound.clone();
		let mut ctx = CallContext::new(envelope, Direction::Outbound);
		chain.run(&mut ctx, &mut |ctx| transmit(&mut self.boundary, &mut self.transport, ctx))
	}

	fn start_call(&mut self, call: OutgoingCall) {
		let OutgoingCall {
			method,
			payload,
			completion,
			options,
		} = call;
		if !self.state.is_established() {
			self.deferred
				.push_back(Box::new(move || completion.complete(Bytes::new(), RpcError::connection_closed())));
			return;
		}

		let id = self.registry.register(PendingCall::new(method.clone(), completion, options.on_timeout));
		let envelope = RpcEnvelope::request(method, id, payload);
		let chain = self.outbound.clone();
		let mut ctx = CallContext::new(envelope, Direction::Outbound);
		let sent = chain.run(&mut ctx, &mut |ctx| transmit(&mut self.boundary, &mut self.transport, ctx));

		match sent {
			Ok(()) => {
				if !ctx.reached_terminal() {
					debug!(target: "rpc", %id, at = ?ctx.short_circuited_at(), "rpc.call.held_by_interceptor");
				}
				if let Some(after) = options.timeout.or_else(|| self.config.default_timeout()) {
					let key = self.timeouts.schedule(id, after);
					if let Some(key) = self.registry.set_timer(id, key) {
						self.timeouts.cancel(key);
					}
				}
			}
			Err(err) => {
				if let Some(call) = self.registry.take(id) {
					self.finish(id, call, Bytes::new(), err);
				}
			}
		}
	}

	/// Expires the deadline of call `id`. A no-op if the call already completed.
	pub fn on_timer_expired(&mut self, id: CorrelationId) {
		self.timeouts.fired();
		let Some(mut call) = self.registry.take(id) else {
			trace!(target: "rpc", %id, "rpc.timer.stale");
			return;
		};
		// The timer fired, so its key is spent.
		call.timer = None;
		warn!(target: "rpc", %id, method = %call.method, "rpc.call.timeout");
		if let Some(notice) = call.on_timeout.take() {
			self.deferred.push_back(notice);
		}
		self.finish(id, call, Bytes::new(), RpcError::timeout());
	}

	/// Applies one queued loop event.
	pub(crate) fn handle_event(&mut self, event: LoopEvent) {
		match event {
			LoopEvent::Call(call) => self.start_call(call),
			LoopEvent::Reply {
				method,
				correlation_id,
				payload,
				status,
			} => self.send_reply(method, correlation_id, payload, status),
			LoopEvent::Unanswered {
				method,
				correlation_id,
				dispatched,
			} => {
				if self.state.get().is_shutting_down() {
					trace!(target: "rpc", id = %correlation_id, "rpc.reply.released_after_close");
					return;
				}
				let status = if dispatched {
					self.report_fault(ProtocolFault::NoReply {
						method: method.clone(),
						correlation_id,
					});
					RpcError::no_reply()
				} else {
					debug!(target: "rpc", %method, id = %correlation_id, "rpc.reply.released_by_interceptor");
					RpcError::not_answered()
				};
				self.send_reply(method, correlation_id, Bytes::new(), status);
			}
			LoopEvent::Fault(fault) => self.report_fault(fault),
		}
	}

	fn report_fault(&mut self, fault: ProtocolFault) {
		self.faults += 1;
		error!(target: "rpc", ?fault, "rpc.protocol_fault");
		if let Some(hook) = self.fault_hook.as_mut() {
			hook(&fault);
		}
	}

	/// Applies every queued call and reply in enqueue order. Returns the number applied.
	///
	/// Events stay queued while the connection is still `Connecting`.
	pub fn process_events(&mut self) -> usize {
		if self.state.get() == ConnectionState::Connecting {
			return 0;
		}
		let mut applied = 0;
		while let Ok(event) = self.events_rx.try_recv() {
			self.handle_event(event);
			applied += 1;
		}
		applied
	}

	/// Runs deferred completions and hooks. Returns the number run.
	pub fn run_deferred(&mut self) -> usize {
		let mut ran = 0;
		while let Some(job) = self.deferred.pop_front() {
			job();
			ran += 1;
		}
		ran
	}

	/// Alternates [`process_events`](Self::process_events) and
	/// [`run_deferred`](Self::run_deferred) until both are idle.
	pub fn pump(&mut self) -> usize {
		let mut total = 0;
		loop {
			let step = self.process_events() + self.run_deferred();
			if step == 0 {
				return total;
			}
			total += step;
		}
	}

	/// Waits for the next queued event or expired deadline.
	pub(crate) fn poll_wake(&mut self, cx: &mut Context<'_>) -> Poll<Wake> {
		if let Poll::Ready(Some(id)) = self.timeouts.poll_expired(cx) {
			return Poll::Ready(Wake::Timer(id));
		}
		if self.state.get() == ConnectionState::Connecting {
			return Poll::Pending;
		}
		match self.events_rx.poll_recv(cx) {
			Poll::Ready(Some(event)) => Poll::Ready(Wake::Event(event)),
			// The engine holds a sender, so the channel never closes while it lives.
			Poll::Ready(None) | Poll::Pending => Poll::Pending,
		}
	}

	/// Tears the connection down.
	///
	/// Every pending call is force-completed with `"connection closed"`, every deadline is
	/// cancelled, calls still queued are failed the same way, service close hooks are queued
	/// and the dispatch table is released. The state is resolved before this returns; the
	/// callbacks run on the next [`run_deferred`](Self::run_deferred).
	pub fn close(&mut self) {
		if self.state.get().is_shutting_down() {
			return;
		}
		self.state.advance(ConnectionState::Closing);
		info!(target: "rpc", pending = self.registry.len(), "rpc.connection.closing");

		let pending: Vec<_> = self.registry.drain().collect();
		for (id, call) in pending {
			self.finish(id, call, Bytes::new(), RpcError::connection_closed());
		}

		while let Ok(event) = self.events_rx.try_recv() {
			match event {
				LoopEvent::Call(call) => {
					let completion = call.completion;
					self.deferred
						.push_back(Box::new(move || completion.complete(Bytes::new(), RpcError::connection_closed())));
				}
				LoopEvent::Fault(fault) => self.report_fault(fault),
				LoopEvent::Reply { correlation_id, .. } | LoopEvent::Unanswered { correlation_id, .. } => {
					trace!(target: "rpc", id = %correlation_id, "rpc.reply.dropped_after_close");
				}
			}
		}

		if let Some(table) = self.dispatch.take() {
			for service in table.into_services() {
				debug!(target: "rpc", service = service.name(), "rpc.service.close");
				self.deferred.push_back(Box::new(move || service.on_close()));
			}
		}

		self.state.advance(ConnectionState::Closed);
	}
}

/// Outbound terminal action: encode and hand the frame to the transport.
fn transmit<C: Codec, T: Transport>(
	boundary: &mut CodecBoundary<C>,
	transport: &mut T,
	ctx: &mut CallContext,
) -> Result<(), RpcError> {
	let frame = boundary.encode(ctx.envelope().clone())?;
	transport.send(frame)?;
	Ok(())
}

#[cfg(test)]
mod tests;
