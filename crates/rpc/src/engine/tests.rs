use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::chain::{Interceptor, Next, from_fn};
use crate::guard::LivenessGuard;
use crate::panic::ProtectedCall;
use crate::service::handler;
use crate::socket::CallOptions;

type TestEngine = Engine<EnvelopeCodec, FrameQueue, ManualTimers>;

/// Outcomes recorded by completion callbacks.
#[derive(Clone, Default)]
struct Outcomes(Arc<Mutex<Vec<(Bytes, RpcError)>>>);

impl Outcomes {
	fn callback(&self) -> impl FnOnce(Bytes, RpcError) + Send + 'static {
		let outcomes = self.0.clone();
		move |payload, status| outcomes.lock().unwrap().push((payload, status))
	}

	fn take(&self) -> Vec<(Bytes, RpcError)> {
		std::mem::take(&mut *self.0.lock().unwrap())
	}
}

fn engine() -> TestEngine {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	engine
		.establish(
			InterceptorChain::builder().with(ProtectedCall).build(),
			InterceptorChain::empty(),
		)
		.unwrap();
	engine
}

/// Decodes every frame the engine queued for its peer.
fn sent(engine: &mut TestEngine) -> Vec<RpcEnvelope> {
	let mut peer = CodecBoundary::new(EnvelopeCodec::default());
	let frames: Vec<Bytes> = engine.transport_mut().drain().collect();
	for frame in &frames {
		peer.feed(frame);
	}
	std::iter::from_fn(|| peer.next_envelope().unwrap()).collect()
}

fn wire(envelope: RpcEnvelope) -> Bytes {
	CodecBoundary::new(EnvelopeCodec::default()).encode(envelope).unwrap()
}

fn request(method: &'static str, id: u64, payload: &'static [u8]) -> Bytes {
	wire(RpcEnvelope::request(
		MethodId::from_static(method),
		CorrelationId(id),
		Bytes::from_static(payload),
	))
}

fn response(id: u64, payload: &'static [u8]) -> Bytes {
	wire(RpcEnvelope::response(
		MethodId::from_static("Test.Call"),
		CorrelationId(id),
		Bytes::from_static(payload),
		RpcError::ok(),
	))
}

#[test]
fn reply_completes_pending_call_once() {
	let mut engine = engine();
	let outcomes = Outcomes::default();
	engine
		.client()
		.invoke(
			"Test.Call",
			Bytes::from_static(b"ping"),
			CallOptions::new().timeout(Duration::from_secs(3)),
			outcomes.callback(),
		)
		.unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert!(out[0].is_request());
	assert_eq!(out[0].correlation_id, CorrelationId(0));
	assert_eq!(engine.timers_mut().armed(), 1);

	engine.on_receive(&response(0, b"pong")).unwrap();
	engine.on_receive(&response(0, b"again")).unwrap();
	engine.pump();

	assert_eq!(outcomes.take(), vec![(Bytes::from_static(b"pong"), RpcError::ok())]);
	assert_eq!(engine.timers_mut().armed(), 0);
	assert_eq!(engine.timers_mut().cancelled(), 1);
	assert_eq!(engine.pending_calls(), 0);
}

#[test]
fn completions_are_deferred_to_the_loop() {
	let mut engine = engine();
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	engine.process_events();
	engine.on_receive(&response(0, b"")).unwrap();

	assert!(outcomes.take().is_empty());
	assert_eq!(engine.run_deferred(), 1);
	assert_eq!(outcomes.take().len(), 1);
}

#[test]
fn unknown_reply_is_dropped_without_side_effects() {
	let mut engine = engine();
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	engine.pump();
	sent(&mut engine);

	engine.on_receive(&response(42, b"stray")).unwrap();
	assert_eq!(engine.pump(), 0);

	assert!(outcomes.take().is_empty());
	assert_eq!(engine.pending_calls(), 1);
	assert!(engine.transport().is_empty());
	assert_eq!(engine.fault_count(), 0);
}

#[test]
fn timeout_fails_call_and_fires_notice_first() {
	let mut engine = engine();
	let order = Arc::new(Mutex::new(Vec::new()));
	let (on_timeout, on_complete) = (Arc::clone(&order), Arc::clone(&order));
	engine
		.client()
		.invoke(
			"Test.Call",
			Bytes::new(),
			CallOptions::new()
				.timeout(Duration::from_millis(100))
				.on_timeout(move || on_timeout.lock().unwrap().push("notice".to_owned())),
			move |_, status| on_complete.lock().unwrap().push(status.reason().to_owned()),
		)
		.unwrap();
	engine.pump();

	assert_eq!(engine.advance_time(Duration::from_millis(99)), 0);
	assert_eq!(engine.advance_time(Duration::from_millis(1)), 1);
	engine.pump();
	assert_eq!(*order.lock().unwrap(), vec!["notice".to_owned(), "timeout".to_owned()]);

	engine.on_receive(&response(0, b"late")).unwrap();
	engine.pump();
	assert_eq!(order.lock().unwrap().len(), 2);
}

#[test]
fn default_timeout_applies_when_call_has_none() {
	let mut engine = Engine::new(
		EnvelopeCodec::default(),
		FrameQueue::new(),
		ManualTimers::new(),
		RpcConfig::default().with_default_timeout(Duration::from_secs(1)),
	);
	engine.establish(InterceptorChain::empty(), InterceptorChain::empty()).unwrap();
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	engine.pump();
	engine.advance_time(Duration::from_secs(1));
	engine.pump();

	assert_eq!(outcomes.take(), vec![(Bytes::new(), RpcError::timeout())]);
}

#[test]
fn unknown_method_is_answered_with_error() {
	let mut engine = engine();
	engine.on_receive(&request("Nope.Missing", 5, b"")).unwrap();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].kind, EnvelopeKind::Response);
	assert_eq!(out[0].correlation_id, CorrelationId(5));
	assert_eq!(out[0].status, RpcError::method_not_found());
	assert!(engine.state().is_established());
}

#[test]
fn handler_panic_becomes_error_reply_and_connection_survives() {
	let mut engine = engine();
	engine
		.install(
			"Test.Boom",
			handler(|req| {
				if req.payload.as_ref() == b"boom" {
					panic!("handler exploded");
				}
				req.reply.reply(req.payload).map_err(RpcError::from)
			}),
		)
		.unwrap();

	engine.on_receive(&request("Test.Boom", 1, b"boom")).unwrap();
	engine.on_receive(&request("Test.Boom", 2, b"fine")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 2);
	assert_eq!(out[0].correlation_id, CorrelationId(1));
	assert!(out[0].status.is_failed());
	assert!(out[0].status.reason().contains("handler exploded"));
	assert_eq!(out[1].correlation_id, CorrelationId(2));
	assert_eq!(out[1].status, RpcError::ok());
	assert_eq!(out[1].payload, Bytes::from_static(b"fine"));
	assert_eq!(engine.fault_count(), 0);
}

#[test]
fn handler_error_is_sent_back() {
	let mut engine = engine();
	engine
		.install("Test.Reject", handler(|_| Err(RpcError::failed("rejected"))))
		.unwrap();
	engine.on_receive(&request("Test.Reject", 9, b"")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].status, RpcError::failed("rejected"));
}

#[test]
fn double_reply_is_reported_and_sent_once() {
	let mut engine = engine();
	let faults = Arc::new(Mutex::new(Vec::new()));
	let seen = Arc::clone(&faults);
	engine.on_fault(move |fault| seen.lock().unwrap().push(fault.clone()));
	engine
		.install(
			"Test.Twice",
			handler(|req| {
				req.reply.reply(Bytes::from_static(b"one")).map_err(RpcError::from)?;
				req.reply.reply(Bytes::from_static(b"two")).map_err(RpcError::from)
			}),
		)
		.unwrap();

	engine.on_receive(&request("Test.Twice", 3, b"")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].payload, Bytes::from_static(b"one"));
	assert_eq!(
		*faults.lock().unwrap(),
		vec![ProtocolFault::DoubleReply {
			method: MethodId::from_static("Test.Twice"),
			correlation_id: CorrelationId(3),
		}]
	);
	assert_eq!(engine.fault_count(), 1);
}

#[test]
fn missing_reply_is_reported_and_answered() {
	let mut engine = engine();
	engine.install("Test.Silent", handler(|_| Ok(()))).unwrap();
	engine.on_receive(&request("Test.Silent", 8, b"")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].status, RpcError::no_reply());
	assert_eq!(engine.fault_count(), 1);
}

#[test]
fn deferred_reply_from_stored_handle() {
	let mut engine = engine();
	let parked = Arc::new(Mutex::new(None));
	let slot = Arc::clone(&parked);
	engine
		.install(
			"Test.Later",
			handler(move |req| {
				*slot.lock().unwrap() = Some(req.reply);
				Ok(())
			}),
		)
		.unwrap();
	engine.on_receive(&request("Test.Later", 4, b"")).unwrap();
	engine.pump();
	assert!(sent(&mut engine).is_empty());

	let reply = parked.lock().unwrap().take().unwrap();
	reply.reply(Bytes::from_static(b"done")).unwrap();
	drop(reply);
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].payload, Bytes::from_static(b"done"));
	assert_eq!(engine.fault_count(), 0);
}

#[test]
fn close_fails_every_pending_call_and_cancels_timers() {
	let mut engine = engine();
	let outcomes = Outcomes::default();
	let client = engine.client();
	for _ in 0..3 {
		client
			.invoke(
				"Test.Call",
				Bytes::new(),
				CallOptions::new().timeout(Duration::from_secs(1)),
				outcomes.callback(),
			)
			.unwrap();
	}
	engine.pump();
	assert_eq!(engine.timers_mut().armed(), 3);

	engine.close();
	assert_eq!(engine.state().get(), ConnectionState::Closed);
	assert_eq!(engine.pending_calls(), 0);
	assert_eq!(engine.timers_mut().armed(), 0);
	assert_eq!(engine.timers_mut().cancelled(), 3);
	assert!(outcomes.take().is_empty(), "callbacks run on the loop, not inside close");

	engine.pump();
	let outcomes = outcomes.take();
	assert_eq!(outcomes.len(), 3);
	assert!(outcomes.iter().all(|(_, status)| *status == RpcError::connection_closed()));

	assert_eq!(engine.advance_time(Duration::from_secs(5)), 0);
	assert!(matches!(
		client.call("Test.Call", Bytes::new(), |_, _| {}),
		Err(Error::ConnectionClosed)
	));
}

#[test]
fn calls_queued_before_close_are_failed() {
	let mut engine = engine();
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	engine.close();
	engine.pump();

	assert_eq!(outcomes.take(), vec![(Bytes::new(), RpcError::connection_closed())]);
	assert!(engine.transport().is_empty());
}

#[test]
fn close_runs_service_hooks_once() {
	struct Hooked(Arc<AtomicUsize>);

	impl Service for Hooked {
		fn name(&self) -> &str {
			"hooked"
		}

		fn methods(self: Arc<Self>) -> Vec<(MethodId, Handler)> {
			vec![
				(MethodId::from_static("Hooked.A"), handler(|_| Ok(()))),
				(MethodId::from_static("Hooked.B"), handler(|_| Ok(()))),
			]
		}

		fn on_close(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	let mut engine = engine();
	let closes = Arc::new(AtomicUsize::new(0));
	engine.install_service(Arc::new(Hooked(Arc::clone(&closes)))).unwrap();
	engine.close();
	engine.close();
	assert_eq!(closes.load(Ordering::SeqCst), 0);
	engine.pump();
	assert_eq!(closes.load(Ordering::SeqCst), 1);
	assert!(engine.dispatch_table().is_none());
	assert!(matches!(
		engine.install("Late.Method", handler(|_| Ok(()))),
		Err(Error::NotEstablished)
	));
}

#[test]
fn duplicate_install_on_connection_fails() {
	let mut engine = engine();
	engine.install("Test.Once", handler(|_| Ok(()))).unwrap();
	assert!(matches!(
		engine.install("Test.Once", handler(|_| Ok(()))),
		Err(Error::DuplicateMethod(_))
	));
	assert!(engine.uninstall(&MethodId::from_static("Test.Once")));
	engine.install("Test.Once", handler(|_| Ok(()))).unwrap();
}

#[test]
fn outbound_rejection_completes_call_with_its_error() {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	engine
		.establish(
			InterceptorChain::empty(),
			InterceptorChain::builder()
				.with(from_fn("deny", |_, _| Err(RpcError::failed("denied"))))
				.build(),
		)
		.unwrap();
	let outcomes = Outcomes::default();
	engine
		.client()
		.invoke(
			"Test.Call",
			Bytes::new(),
			CallOptions::new().timeout(Duration::from_secs(1)),
			outcomes.callback(),
		)
		.unwrap();
	engine.pump();

	assert_eq!(outcomes.take(), vec![(Bytes::new(), RpcError::failed("denied"))]);
	assert!(engine.transport().is_empty());
	assert_eq!(engine.timers_mut().armed(), 0);
}

#[test]
fn liveness_guard_passes_while_established() {
	struct Counting(Arc<AtomicUsize>);

	impl Interceptor for Counting {
		fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError> {
			self.0.fetch_add(1, Ordering::SeqCst);
			next.run(ctx)
		}
	}

	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	let passes = Arc::new(AtomicUsize::new(0));
	let outbound = InterceptorChain::builder()
		.with(LivenessGuard::new(engine.state()))
		.with(Counting(Arc::clone(&passes)))
		.build();
	engine.establish(InterceptorChain::empty(), outbound).unwrap();

	engine.client().call("Test.Call", Bytes::new(), |_, _| {}).unwrap();
	engine.pump();
	assert_eq!(passes.load(Ordering::SeqCst), 1);
	assert_eq!(sent(&mut engine).len(), 1);
}

#[test]
fn malformed_bytes_surface_as_decode_fault() {
	let mut engine = engine();
	let err = engine.on_receive(&[1, 0, 0, 0, 0xff]).unwrap_err();
	assert!(err.is_decode_fault());
}

#[test]
fn events_wait_until_established() {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	assert_eq!(engine.pump(), 0);
	assert!(engine.transport().is_empty());

	engine.establish(InterceptorChain::empty(), InterceptorChain::empty()).unwrap();
	engine.pump();
	assert_eq!(sent(&mut engine).len(), 1);
	assert!(matches!(
		engine.establish(InterceptorChain::empty(), InterceptorChain::empty()),
		Err(Error::ConnectionClosed)
	));
}

#[test]
fn rejected_reply_is_replaced_by_error_reply() {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	let size_cap = from_fn("size_cap", |ctx, next| {
		if ctx.envelope().payload.len() > 3 {
			return Err(RpcError::failed("payload too large"));
		}
		next.run(ctx)
	});
	engine
		.establish(InterceptorChain::empty(), InterceptorChain::builder().with(size_cap).build())
		.unwrap();
	engine
		.install(
			"Test.Large",
			handler(|req| req.reply.reply(Bytes::from_static(b"too long")).map_err(RpcError::from)),
		)
		.unwrap();

	engine.on_receive(&request("Test.Large", 6, b"")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].correlation_id, CorrelationId(6));
	assert!(out[0].payload.is_empty());
	assert_eq!(out[0].status, RpcError::failed("payload too large"));
}

#[test]
fn inbound_unit_answers_from_cache_without_handler() {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	let cache = from_fn("cache", |ctx, next| {
		if ctx.envelope().payload.as_ref() == b"cached" {
			let reply = ctx.reply().ok_or_else(|| RpcError::failed("no reply handle"))?;
			return reply.reply(Bytes::from_static(b"hit")).map_err(RpcError::from);
		}
		next.run(ctx)
	});
	engine
		.establish(InterceptorChain::builder().with(cache).build(), InterceptorChain::empty())
		.unwrap();
	let handled = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&handled);
	engine
		.install(
			"Test.Lookup",
			handler(move |req| {
				counter.fetch_add(1, Ordering::SeqCst);
				req.reply.reply(Bytes::from_static(b"miss")).map_err(RpcError::from)
			}),
		)
		.unwrap();

	engine.on_receive(&request("Test.Lookup", 1, b"cached")).unwrap();
	engine.on_receive(&request("Test.Lookup", 2, b"other")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 2);
	assert_eq!(out[0].correlation_id, CorrelationId(1));
	assert_eq!(out[0].payload, Bytes::from_static(b"hit"));
	assert_eq!(out[0].status, RpcError::ok());
	assert_eq!(out[1].payload, Bytes::from_static(b"miss"));
	assert_eq!(handled.load(Ordering::SeqCst), 1);
	assert_eq!(engine.fault_count(), 0);
}

#[test]
fn silent_inbound_unit_fails_call_without_fault() {
	let mut engine = Engine::new(EnvelopeCodec::default(), FrameQueue::new(), ManualTimers::new(), RpcConfig::default());
	engine
		.establish(
			InterceptorChain::builder().with(from_fn("drop_all", |_, _| Ok(()))).build(),
			InterceptorChain::empty(),
		)
		.unwrap();
	engine
		.install("Test.Call", handler(|_| panic!("handler must not run")))
		.unwrap();

	engine.on_receive(&request("Test.Call", 3, b"")).unwrap();
	engine.pump();

	let out = sent(&mut engine);
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].status, RpcError::not_answered());
	assert_eq!(engine.fault_count(), 0);
}

#[test]
fn call_left_in_queue_completes_when_engine_is_dropped() {
	let engine = engine();
	let outcomes = Outcomes::default();
	engine.client().call("Test.Call", Bytes::new(), outcomes.callback()).unwrap();
	drop(engine);

	assert_eq!(outcomes.take(), vec![(Bytes::new(), RpcError::connection_closed())]);
}

#[test]
fn standalone_handler_close_hook_runs_once() {
	let mut engine = engine();
	let closes = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&closes);
	engine
		.install_with_close("Test.Hooked", handler(|_| Ok(())), move || {
			counter.fetch_add(1, Ordering::SeqCst);
		})
		.unwrap();
	engine.close();
	engine.pump();
	engine.close();
	engine.pump();
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}
