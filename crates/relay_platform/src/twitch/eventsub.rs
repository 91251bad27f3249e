#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_domain::{ConnectionState, TwitchToken};
use relay_protocol::{DEFAULT_DEDUPE_WINDOW, EnvelopeDecoder, EnvelopeError, Event, Revocation, SessionMessage};
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, ConnectionConfig, DEFAULT_RECONNECT_DELAY, Session, SessionAction};
use crate::dispatch::{DEFAULT_BUFFER_CAPACITY, MessageBuffer, MessageDispatcher};
use crate::twitch::helix::{DEFAULT_HELIX_BASE_URL, HelixClient};
use crate::twitch::subscriptions::{PendingSubscription, Subscription, SubscriptionApi, SubscriptionRegistry, resolved};

pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

#[derive(Debug, Clone)]
pub struct EventSubConfig {
	pub url: String,
	pub helix_base_url: String,
	pub reconnect_delay: Duration,
	/// Drop frames whose timestamp is outside the accepted window.
	pub verify_timestamps: bool,
	pub dedupe_window: usize,
	pub buffer_capacity: usize,
}

impl EventSubConfig {
	pub fn new() -> Self {
		Self {
			url: DEFAULT_EVENTSUB_URL.to_string(),
			helix_base_url: DEFAULT_HELIX_BASE_URL.to_string(),
			reconnect_delay: DEFAULT_RECONNECT_DELAY,
			verify_timestamps: true,
			dedupe_window: DEFAULT_DEDUPE_WINDOW,
			buffer_capacity: DEFAULT_BUFFER_CAPACITY,
		}
	}
}

impl Default for EventSubConfig {
	fn default() -> Self {
		Self::new()
	}
}

pub(crate) struct EventSubSession {
	decoder: Mutex<EnvelopeDecoder>,
	session_id: Mutex<Option<String>>,
	registry: SubscriptionRegistry,
	events: MessageDispatcher<Event>,
}

impl EventSubSession {
	pub(crate) fn new(config: &EventSubConfig, api: Arc<dyn SubscriptionApi>) -> Self {
		Self {
			decoder: Mutex::new(EnvelopeDecoder::new(config.dedupe_window, config.verify_timestamps)),
			session_id: Mutex::new(None),
			registry: SubscriptionRegistry::new(api),
			events: MessageDispatcher::new(config.buffer_capacity),
		}
	}

	pub(crate) fn session_id(&self) -> Option<String> {
		self.session_id.lock().clone()
	}

	pub(crate) fn registry(&self) -> &SubscriptionRegistry {
		&self.registry
	}

	pub(crate) fn events(&self) -> &MessageDispatcher<Event> {
		&self.events
	}

	fn handle_message(&self, msg: SessionMessage) -> Vec<SessionAction> {
		match msg {
			SessionMessage::Welcome {
				session_id,
				keepalive_timeout_seconds,
			} => {
				info!(session_id = %session_id, ?keepalive_timeout_seconds, "twitch eventsub connected");
				*self.session_id.lock() = Some(session_id);
			}
			SessionMessage::Keepalive => {}
			SessionMessage::Notification(event) => {
				debug!(id = %event.id, kind = %event.r#type, "twitch eventsub notification");
				self.events.dispatch(event);
			}
			SessionMessage::Reconnect {
				session_id,
				reconnect_url,
			} => {
				let current = self.session_id.lock().clone();
				if current.as_deref() != Some(session_id.as_str()) {
					debug!(session_id = %session_id, "ignoring twitch eventsub session_reconnect with unknown session id");
					return Vec::new();
				}
				info!(url = %reconnect_url, "twitch eventsub session_reconnect; migrating");
				return vec![SessionAction::Reconnect {
					url: Some(reconnect_url),
				}];
			}
			SessionMessage::Revocation(revocation) => self.handle_revocation(revocation),
		}
		Vec::new()
	}

	fn handle_revocation(&self, r: Revocation) {
		info!(
			id = %r.id,
			status = %r.status,
			kind = %r.r#type,
			version = %r.version,
			condition = %r.condition,
			"twitch eventsub subscription revoked"
		);
		self.registry.remove(&r.id);
	}
}

impl Session for EventSubSession {
	fn on_open(&self) -> Vec<SessionAction> {
		debug!("twitch eventsub socket opened; waiting for session_welcome");
		Vec::new()
	}

	fn handle_frame(&self, frame: &str) -> Vec<SessionAction> {
		let decoded = self.decoder.lock().decode(frame);
		match decoded {
			Ok(msg) => self.handle_message(msg),
			Err(e) if e.is_replay() => {
				debug!(error = %e, "discarding twitch eventsub frame");
				Vec::new()
			}
			Err(EnvelopeError::UnknownType(kind)) => {
				debug!(kind = %kind, "ignoring twitch eventsub message of unknown type");
				Vec::new()
			}
			Err(e) => {
				warn!(error = %e, "invalid twitch eventsub frame");
				Vec::new()
			}
		}
	}

	fn on_close(&self, reason: CloseReason) {
		*self.session_id.lock() = None;
		// The server carries subscriptions over to the migrated session only.
		if reason != CloseReason::Migrating {
			self.registry.clear_all();
		}
		info!(?reason, "twitch eventsub connection closed");
	}
}

/// Twitch EventSub websocket with its subscription bookkeeping.
pub struct EventSubConnection {
	conn: Connection<EventSubSession>,
}

impl EventSubConnection {
	/// Connection registering subscriptions through Helix with `token`.
	pub fn new(token: &TwitchToken, config: EventSubConfig) -> anyhow::Result<Self> {
		let helix = HelixClient::new(&config.helix_base_url, token)?;
		Ok(Self::with_api(config, Arc::new(helix)))
	}

	pub fn with_api(config: EventSubConfig, api: Arc<dyn SubscriptionApi>) -> Self {
		let session = EventSubSession::new(&config, api);
		let conn_cfg = ConnectionConfig::new(config.url).with_reconnect_delay(config.reconnect_delay);
		Self {
			conn: Connection::new(conn_cfg, session),
		}
	}

	pub fn connect(&self) {
		self.conn.connect();
	}

	pub async fn disconnect(&self) {
		self.conn.disconnect().await;
	}

	pub fn state(&self) -> ConnectionState {
		self.conn.state()
	}

	pub fn is_connected(&self) -> bool {
		self.conn.is_connected()
	}

	pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
		self.conn.subscribe_state()
	}

	/// Current EventSub session id, once `session_welcome` was received.
	pub fn session_id(&self) -> Option<String> {
		self.conn.session().session_id()
	}

	/// Buffer receiving every notification from now on. Connects if needed.
	pub fn register_for_events(&self) -> MessageBuffer<Event> {
		self.connect();
		self.conn.session().events().register()
	}

	/// Register `subscription` on the current session.
	///
	/// Resolves to `None` while no session is established yet or when the
	/// server rejects the request; callers retry on their next evaluation.
	pub fn add_subscription(&self, subscription: Subscription) -> PendingSubscription {
		self.connect();
		let Some(session_id) = self.session_id() else {
			debug!(kind = %subscription.r#type, "twitch eventsub session not ready; subscription deferred");
			return resolved(None);
		};
		self.conn.session().registry().add(subscription, &session_id)
	}

	pub fn is_subscription_active(&self, id: &str) -> bool {
		self.conn.session().registry().is_active(id)
	}

	pub fn active_subscription_count(&self) -> usize {
		self.conn.session().registry().active_count()
	}

	pub fn active_subscriptions(&self) -> Vec<(String, Subscription)> {
		self.conn.session().registry().active()
	}
}
