#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// HTTP status Helix returns for an accepted subscription.
const STATUS_ACCEPTED: u16 = 202;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
	pub status: u16,
	pub body: Value,
}

/// Server side of subscription registration.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
	async fn create_subscription(&self, body: &Value) -> anyhow::Result<ApiResponse>;
}

/// An EventSub subscription request: `type`, `version` and `condition`.
///
/// Two requests are the same subscription when their content is equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
	pub r#type: String,
	pub version: String,
	pub condition: Value,
}

impl Subscription {
	pub fn new(r#type: impl Into<String>, version: impl Into<String>, condition: Value) -> Self {
		Self {
			r#type: r#type.into(),
			version: version.into(),
			condition,
		}
	}

	/// Content key. `serde_json` object keys are sorted, so equal content gives equal keys.
	pub fn key(&self) -> String {
		json!({
			"type": self.r#type,
			"version": self.version,
			"condition": self.condition,
		})
		.to_string()
	}

	/// Helix request body bound to a websocket session.
	pub fn request_body(&self, session_id: &str) -> Value {
		json!({
			"type": self.r#type,
			"version": self.version,
			"condition": self.condition,
			"transport": {
				"method": "websocket",
				"session_id": session_id,
			},
		})
	}
}

/// Resolves to the server-assigned id, or `None` if registration failed.
pub type PendingSubscription = Shared<BoxFuture<'static, Option<String>>>;

pub(crate) fn resolved(id: Option<String>) -> PendingSubscription {
	futures::future::ready(id).boxed().shared()
}

#[derive(Debug, Clone)]
struct ActiveSubscription {
	id: String,
	subscription: Subscription,
}

#[derive(Default)]
struct RegistryState {
	/// Bumped by `clear_all`; registrations started under an older generation are ignored.
	generation: u64,
	active: HashMap<String, ActiveSubscription>,
	pending: HashMap<String, PendingSubscription>,
}

/// Active and in-flight EventSub subscriptions of one session.
pub struct SubscriptionRegistry {
	api: Arc<dyn SubscriptionApi>,
	state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
	pub fn new(api: Arc<dyn SubscriptionApi>) -> Self {
		Self {
			api,
			state: Arc::new(Mutex::new(RegistryState::default())),
		}
	}

	/// Register `subscription` for `session_id` unless an equal one is active or in flight.
	///
	/// The network call runs on a spawned task, so it completes even if the
	/// returned future is dropped. Must be called from within a tokio runtime.
	pub fn add(&self, subscription: Subscription, session_id: &str) -> PendingSubscription {
		let key = subscription.key();
		let mut state = self.state.lock();

		if let Some(active) = state.active.get(&key) {
			return resolved(Some(active.id.clone()));
		}
		if let Some(pending) = state.pending.get(&key) {
			return pending.clone();
		}

		let runtime = match tokio::runtime::Handle::try_current() {
			Ok(rt) => rt,
			Err(_) => {
				warn!(kind = %subscription.r#type, "subscription requested outside of a tokio runtime");
				return resolved(None);
			}
		};

		let generation = state.generation;
		let body = subscription.request_body(session_id);
		let api = Arc::clone(&self.api);
		let shared_state = Arc::clone(&self.state);
		let task_key = key.clone();

		let handle = runtime.spawn(async move {
			let id = match api.create_subscription(&body).await {
				Ok(resp) => accepted_id(&resp, &subscription),
				Err(e) => {
					warn!(kind = %subscription.r#type, error = ?e, "eventsub subscription request failed");
					None
				}
			};

			let mut state = shared_state.lock();
			if state.generation != generation {
				debug!(kind = %subscription.r#type, "discarding subscription result from a previous session");
				return None;
			}
			state.pending.remove(&task_key);
			let id = id?;
			info!(id = %id, kind = %subscription.r#type, version = %subscription.version, "eventsub subscription active");
			state.active.insert(
				task_key,
				ActiveSubscription {
					id: id.clone(),
					subscription,
				},
			);
			Some(id)
		});

		let pending = async move { handle.await.ok().flatten() }.boxed().shared();
		state.pending.insert(key, pending.clone());
		pending
	}

	pub fn is_active(&self, id: &str) -> bool {
		self.state.lock().active.values().any(|a| a.id == id)
	}

	pub fn active_count(&self) -> usize {
		self.state.lock().active.len()
	}

	/// Active subscriptions with their ids.
	pub fn active(&self) -> Vec<(String, Subscription)> {
		self.state
			.lock()
			.active
			.values()
			.map(|a| (a.id.clone(), a.subscription.clone()))
			.collect()
	}

	/// Drop the active entry with server id `id`. Returns whether one was removed.
	pub fn remove(&self, id: &str) -> bool {
		let mut state = self.state.lock();
		let before = state.active.len();
		state.active.retain(|_, a| a.id != id);
		state.active.len() != before
	}

	/// Forget everything, including in-flight registrations.
	pub fn clear_all(&self) {
		let mut state = self.state.lock();
		state.generation = state.generation.wrapping_add(1);
		state.active.clear();
		state.pending.clear();
	}
}

fn accepted_id(resp: &ApiResponse, subscription: &Subscription) -> Option<String> {
	if resp.status != STATUS_ACCEPTED {
		warn!(
			status = resp.status,
			kind = %subscription.r#type,
			body = %resp.body,
			"eventsub subscription rejected"
		);
		return None;
	}

	let id = resp
		.body
		.pointer("/data/0/id")
		.and_then(Value::as_str)
		.filter(|id| !id.is_empty());
	if id.is_none() {
		warn!(kind = %subscription.r#type, body = %resp.body, "eventsub subscription response without id");
	}
	id.map(str::to_string)
}
