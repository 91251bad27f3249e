#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::connection::{CloseReason, Session, SessionAction};
use crate::twitch::eventsub::{EventSubConfig, EventSubSession};
use crate::twitch::subscriptions::{ApiResponse, Subscription, SubscriptionApi};

struct CountingApi {
	calls: AtomicUsize,
}

#[async_trait]
impl SubscriptionApi for CountingApi {
	async fn create_subscription(&self, _body: &Value) -> anyhow::Result<ApiResponse> {
		let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(ApiResponse {
			status: 202,
			body: json!({"data": [{"id": format!("sub-{n}")}]}),
		})
	}
}

fn session() -> EventSubSession {
	EventSubSession::new(&EventSubConfig::new(), Arc::new(CountingApi { calls: AtomicUsize::new(0) }))
}

fn frame(id: &str, message_type: &str, payload: Value) -> String {
	json!({
		"metadata": {
			"message_id": id,
			"message_type": message_type,
			"message_timestamp": Utc::now().to_rfc3339(),
		},
		"payload": payload,
	})
	.to_string()
}

fn welcome(id: &str, session_id: &str) -> String {
	frame(id, "session_welcome", json!({"session": {"id": session_id, "keepalive_timeout_seconds": 10}}))
}

fn revocation(id: &str, sub_id: &str) -> String {
	frame(
		id,
		"revocation",
		json!({"subscription": {
			"id": sub_id,
			"status": "authorization_revoked",
			"type": "channel.follow",
			"version": "2",
			"condition": {"broadcaster_user_id": "1"},
		}}),
	)
}

async fn subscribe_three(s: &EventSubSession) -> Vec<String> {
	let mut ids = Vec::new();
	for b in ["1", "2", "3"] {
		let pending = s
			.registry()
			.add(Subscription::new("channel.follow", "2", json!({"broadcaster_user_id": b})), "sess-1");
		let id = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap();
		ids.push(id);
	}
	ids
}

#[test]
fn welcome_records_session_id() {
	let s = session();
	assert_eq!(s.session_id(), None);
	assert!(s.handle_frame(&welcome("m1", "sess-1")).is_empty());
	assert_eq!(s.session_id().as_deref(), Some("sess-1"));
}

#[test]
fn notifications_reach_every_consumer() {
	let s = session();
	let a = s.events().register();
	let b = s.events().register();

	s.handle_frame(&frame(
		"m1",
		"notification",
		json!({"subscription": {"id": "sub-1", "type": "stream.online"}, "event": {"broadcaster_user_login": "x"}}),
	));

	for buffer in [&a, &b] {
		let event = buffer.consume_message().unwrap();
		assert_eq!(event.id, "sub-1");
		assert_eq!(event.r#type, "stream.online");
		assert_eq!(event.data["broadcaster_user_login"], "x");
	}
}

#[test]
fn replayed_frames_are_dropped() {
	let s = session();
	let buffer = s.events().register();
	let raw = frame("dup", "notification", json!({"subscription": {"id": "s", "type": "t"}, "event": {}}));

	s.handle_frame(&raw);
	s.handle_frame(&raw);

	assert_eq!(buffer.len(), 1);
}

#[test]
fn reconnect_for_current_session_migrates() {
	let s = session();
	s.handle_frame(&welcome("m1", "sess-1"));

	let stale = frame("m2", "session_reconnect", json!({"session": {"id": "other", "reconnect_url": "wss://a/ws"}}));
	assert!(s.handle_frame(&stale).is_empty());

	let current = frame("m3", "session_reconnect", json!({"session": {"id": "sess-1", "reconnect_url": "wss://b/ws"}}));
	assert_eq!(
		s.handle_frame(&current),
		vec![SessionAction::Reconnect {
			url: Some("wss://b/ws".to_string())
		}]
	);
}

#[tokio::test]
async fn revocation_removes_exactly_the_revoked_subscription() {
	let s = session();
	let ids = subscribe_three(&s).await;

	s.handle_frame(&revocation("m1", &ids[1]));

	assert_eq!(s.registry().active_count(), 2);
	assert!(s.registry().is_active(&ids[0]));
	assert!(!s.registry().is_active(&ids[1]));
	assert!(s.registry().is_active(&ids[2]));
}

#[tokio::test]
async fn close_clears_subscriptions_except_when_migrating() {
	let s = session();
	s.handle_frame(&welcome("m1", "sess-1"));
	subscribe_three(&s).await;

	s.on_close(CloseReason::Migrating);
	assert_eq!(s.session_id(), None);
	assert_eq!(s.registry().active_count(), 3);

	s.on_close(CloseReason::ConnectFailed);
	assert_eq!(s.registry().active_count(), 0);
}
