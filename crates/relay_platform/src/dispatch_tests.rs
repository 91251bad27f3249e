#![forbid(unsafe_code)]

use std::time::Duration;

use proptest::prelude::*;
use tokio::time::timeout;

use crate::dispatch::{MessageBuffer, MessageDispatcher};

fn drain<T>(buffer: &MessageBuffer<T>) -> Vec<T> {
	std::iter::from_fn(|| buffer.consume_message()).collect()
}

#[test]
fn single_consumer_sees_dispatch_order() {
	let dispatcher = MessageDispatcher::new(0);
	let buffer = dispatcher.register();

	for i in 0..100 {
		dispatcher.dispatch(i);
	}

	assert_eq!(drain(&buffer), (0..100).collect::<Vec<_>>());
	assert!(buffer.empty());
	assert_eq!(buffer.consume_message(), None);
}

#[test]
fn consumers_are_independent() {
	let dispatcher = MessageDispatcher::new(0);
	let a = dispatcher.register();
	let b = dispatcher.register();

	for s in ["m1", "m2", "m3"] {
		dispatcher.dispatch(s.to_string());
	}

	assert_eq!(drain(&a), vec!["m1", "m2", "m3"]);
	assert!(a.empty());
	assert_eq!(b.len(), 3);
	assert_eq!(drain(&b), vec!["m1", "m2", "m3"]);
}

#[test]
fn late_registration_gets_no_history() {
	let dispatcher = MessageDispatcher::new(0);
	let early = dispatcher.register();
	dispatcher.dispatch(1);

	let late = dispatcher.register();
	dispatcher.dispatch(2);

	assert_eq!(drain(&early), vec![1, 2]);
	assert_eq!(drain(&late), vec![2]);
}

#[test]
fn clear_discards_only_own_buffer() {
	let dispatcher = MessageDispatcher::new(0);
	let a = dispatcher.register();
	let b = dispatcher.register();

	dispatcher.dispatch(1);
	dispatcher.dispatch(2);
	a.clear();
	dispatcher.dispatch(3);

	assert_eq!(drain(&a), vec![3]);
	assert_eq!(drain(&b), vec![1, 2, 3]);
}

#[test]
fn dropped_consumers_are_pruned() {
	let dispatcher = MessageDispatcher::new(0);
	let kept = dispatcher.register();
	let gone = dispatcher.register();
	assert_eq!(dispatcher.consumer_count(), 2);

	drop(gone);
	dispatcher.dispatch(7);

	assert_eq!(dispatcher.consumer_count(), 1);
	assert_eq!(drain(&kept), vec![7]);
}

#[test]
fn bounded_buffer_drops_oldest() {
	let dispatcher = MessageDispatcher::new(3);
	let buffer = dispatcher.register();

	for i in 0..5 {
		dispatcher.dispatch(i);
	}

	assert_eq!(buffer.dropped(), 2);
	assert_eq!(drain(&buffer), vec![2, 3, 4]);
}

#[tokio::test]
async fn recv_wakes_on_dispatch() {
	let dispatcher = std::sync::Arc::new(MessageDispatcher::new(16));
	let mut buffer = dispatcher.register();

	let producer = {
		let dispatcher = std::sync::Arc::clone(&dispatcher);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			dispatcher.dispatch("hello".to_string());
		})
	};

	let got = timeout(Duration::from_secs(2), buffer.recv())
		.await
		.expect("recv timed out");
	assert_eq!(got, "hello");
	producer.await.expect("producer task");
}

#[tokio::test]
async fn recv_returns_buffered_message_immediately() {
	let dispatcher = MessageDispatcher::new(16);
	let mut buffer = dispatcher.register();
	dispatcher.dispatch(1);
	dispatcher.dispatch(2);

	assert_eq!(timeout(Duration::from_millis(100), buffer.recv()).await.ok(), Some(1));
	assert_eq!(timeout(Duration::from_millis(100), buffer.recv()).await.ok(), Some(2));
	assert!(timeout(Duration::from_millis(50), buffer.recv()).await.is_err());
}

proptest! {
	#[test]
	fn every_consumer_gets_every_message_in_order(msgs in proptest::collection::vec(any::<u32>(), 0..64)) {
		let dispatcher = MessageDispatcher::new(0);
		let a = dispatcher.register();
		let b = dispatcher.register();

		for m in &msgs {
			dispatcher.dispatch(*m);
		}

		prop_assert_eq!(drain(&a), msgs.clone());
		prop_assert_eq!(drain(&b), msgs);
	}
}
