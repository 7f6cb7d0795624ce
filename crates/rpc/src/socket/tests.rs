use super::*;
use crate::state::ConnectionState;

fn client_with_state(state: ConnectionState) -> (RpcClient, mpsc::UnboundedReceiver<LoopEvent>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let shared = SharedState::new();
	shared.advance(state);
	(RpcClient::new(tx, shared), rx)
}

#[test]
fn closed_connection_rejects_calls() {
	let (client, _rx) = client_with_state(ConnectionState::Closed);
	let result = client.call("Test.Call", Bytes::new(), |_, _| panic!("completion must not run"));
	assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[test]
fn stopped_loop_rejects_calls() {
	let (client, rx) = client_with_state(ConnectionState::Established);
	drop(rx);
	let result = client.call("Test.Call", Bytes::new(), |_, _| panic!("completion must not run"));
	assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[test]
fn calls_are_queued_in_initiation_order() {
	let (client, mut rx) = client_with_state(ConnectionState::Connecting);
	client.call("Test.First", Bytes::new(), |_, _| {}).unwrap();
	client
		.invoke(
			"Test.Second",
			Bytes::new(),
			CallOptions::new().timeout(Duration::from_secs(1)),
			|_, _| {},
		)
		.unwrap();

	let methods: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
		.map(|event| match event {
			LoopEvent::Call(call) => (call.method.to_string(), call.options.timeout),
			_ => panic!("expected a call event"),
		})
		.collect();
	assert_eq!(
		methods,
		vec![
			("Test.First".to_owned(), None),
			("Test.Second".to_owned(), Some(Duration::from_secs(1))),
		]
	);
}

#[tokio::test]
async fn request_on_closed_connection_fails_fast() {
	let (client, _rx) = client_with_state(ConnectionState::Closing);
	let result = client.request("Test.Call", Bytes::new(), CallOptions::new()).await;
	assert_eq!(result, Err(RpcError::connection_closed()));
}
