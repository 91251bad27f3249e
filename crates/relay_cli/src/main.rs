#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use relay_domain::{CHAT_SCOPES, TwitchToken};
use relay_platform::{
	ChatConfig, ChatConnection, ChatMessagePattern, EventSubConfig, EventSubConnection, Subscription, TextMatch,
	TwitchConnections, validate_user_token,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::RelayConfig;

/// How often missing EventSub subscriptions are retried.
const SUBSCRIBE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
	config_path: Option<PathBuf>,
	channel: Option<String>,
	filter: Option<String>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: relay [--config path] [--channel name] [--filter regex]\n\
\n\
Options:\n\
\t--config   Config file (default: ~/.relay/config.toml)\n\
\t--channel  Chat channel to join (overrides config)\n\
\t--filter   Only log chat lines whose text matches the regex\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut args = Args {
		config_path: None,
		channel: None,
		filter: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		let mut value = |name: &str| {
			let v = it.next().unwrap_or_else(|| usage_and_exit());
			if v.trim().is_empty() {
				eprintln!("{name} must be non-empty");
				usage_and_exit();
			}
			v
		};
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => args.config_path = Some(PathBuf::from(value("--config"))),
			"--channel" => args.channel = Some(value("--channel")),
			"--filter" => args.filter = Some(value("--filter")),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,relay_platform=debug".to_string());
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

/// Resolve the identity behind the configured access token.
async fn resolve_token(cfg: &RelayConfig) -> anyhow::Result<TwitchToken> {
	let access_token = cfg
		.twitch
		.access_token
		.clone()
		.context("no twitch access token configured")?;

	if cfg.twitch.validate_token {
		let validation = validate_user_token(access_token.expose())
			.await
			.context("validate twitch access token")?;
		info!(
			login = %validation.login,
			user_id = %validation.user_id,
			expires_in = validation.expires_in,
			scopes = ?validation.scopes,
			"twitch token validated"
		);
		return Ok(validation.into_token(access_token));
	}

	let scopes = if cfg.twitch.scopes.is_empty() {
		CHAT_SCOPES.iter().map(|s| s.to_string()).collect()
	} else {
		cfg.twitch.scopes.clone()
	};
	Ok(TwitchToken::new(
		cfg.twitch.login.clone().unwrap_or_default(),
		cfg.twitch.user_id.clone().unwrap_or_default(),
		access_token,
	)
	.with_client_id(cfg.twitch.client_id.clone().unwrap_or_default())
	.with_scopes(scopes))
}

fn chat_config(cfg: &RelayConfig) -> ChatConfig {
	let mut chat = ChatConfig::new();
	if let Some(url) = cfg.chat.url.clone() {
		chat.url = url;
	}
	if let Some(delay) = cfg.twitch.reconnect_delay {
		chat.reconnect_delay = delay;
	}
	if let Some(capacity) = cfg.chat.buffer_capacity {
		chat.buffer_capacity = capacity;
	}
	chat
}

fn eventsub_config(cfg: &RelayConfig) -> EventSubConfig {
	let mut eventsub = EventSubConfig::new();
	if let Some(url) = cfg.eventsub.url.clone() {
		eventsub.url = url;
	}
	if let Some(url) = cfg.eventsub.helix_base_url.clone() {
		eventsub.helix_base_url = url;
	}
	if let Some(delay) = cfg.twitch.reconnect_delay {
		eventsub.reconnect_delay = delay;
	}
	if let Some(verify) = cfg.eventsub.verify_timestamps {
		eventsub.verify_timestamps = verify;
	}
	if let Some(window) = cfg.eventsub.dedupe_window {
		eventsub.dedupe_window = window;
	}
	if let Some(capacity) = cfg.eventsub.buffer_capacity {
		eventsub.buffer_capacity = capacity;
	}
	eventsub
}

fn spawn_chat_logger(chat: Arc<ChatConnection>, pattern: ChatMessagePattern) -> JoinHandle<()> {
	let mut messages = chat.register_for_messages();
	let mut whispers = chat.register_for_whispers();
	tokio::spawn(async move {
		loop {
			tokio::select! {
				msg = messages.recv() => {
					if msg.command.command != "PRIVMSG" {
						debug!(command = %msg.command.command, user = %msg.source.nick, "chat membership");
						continue;
					}
					if !pattern.matches(&msg) {
						continue;
					}
					info!(
						channel = %chat.channel(),
						user = %msg.display_name().unwrap_or(&msg.source.nick),
						text = %msg.message,
						"chat"
					);
				}
				msg = whispers.recv() => {
					info!(user = %msg.source.nick, text = %msg.message, "whisper");
				}
			}
		}
	})
}

/// Log every EventSub notification.
fn spawn_eventsub_logger(eventsub: &EventSubConnection) -> JoinHandle<()> {
	let mut events = eventsub.register_for_events();
	tokio::spawn(async move {
		loop {
			let event = events.recv().await;
			info!(kind = %event.r#type, subscription_id = %event.id, data = %event.data, "event");
		}
	})
}

/// Keep re-adding subscriptions that are not active.
///
/// Runs apart from the event logger so Helix round-trips never delay logging.
fn spawn_subscriber(
	eventsub: Arc<EventSubConnection>,
	subscriptions: Vec<Subscription>,
	interval: Duration,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut retry = tokio::time::interval(interval);
		let mut ids: Vec<Option<String>> = vec![None; subscriptions.len()];
		loop {
			retry.tick().await;
			for (sub, id) in subscriptions.iter().zip(ids.iter_mut()) {
				if id.as_deref().is_some_and(|id| eventsub.is_subscription_active(id)) {
					continue;
				}
				*id = eventsub.add_subscription(sub.clone()).await;
				if id.is_none() {
					debug!(kind = %sub.r#type, "subscription not active yet");
				}
			}
		}
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut cfg = crate::config::load_relay_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded relay config (toml + env overrides)");

	if let Some(channel) = args.channel {
		cfg.chat.channel = Some(channel);
	}
	if let Some(filter) = args.filter {
		cfg.chat.filter = Some(filter);
	}

	let token = resolve_token(&cfg).await?;
	let connections = TwitchConnections::new(chat_config(&cfg), eventsub_config(&cfg));
	let mut tasks: Vec<JoinHandle<()>> = Vec::new();

	let chat = match cfg.chat.channel.as_deref() {
		Some(channel) => {
			let chat = connections
				.chat(&token, channel)
				.with_context(|| format!("cannot open chat for {channel} (check token scopes)"))?;
			let text = cfg
				.chat
				.filter
				.as_deref()
				.map(|f| TextMatch::regex(f, true))
				.transpose()?;
			tasks.push(spawn_chat_logger(Arc::clone(&chat), ChatMessagePattern::new(text)));
			info!(channel = %chat.channel(), "chat logging started");
			Some(chat)
		}
		None => None,
	};

	let eventsub = if cfg.eventsub.subscriptions.is_empty() {
		None
	} else {
		let eventsub = connections
			.event_sub(&token)
			.context("cannot open eventsub connection")?;
		let subscriptions = cfg
			.eventsub
			.subscriptions
			.iter()
			.map(|s| Subscription::new(s.r#type.clone(), s.version.clone(), s.condition.clone()))
			.collect();
		tasks.push(spawn_eventsub_logger(&eventsub));
		tasks.push(spawn_subscriber(
			Arc::clone(&eventsub),
			subscriptions,
			SUBSCRIBE_RETRY_INTERVAL,
		));
		info!(count = cfg.eventsub.subscriptions.len(), "eventsub logging started");
		Some(eventsub)
	};

	if chat.is_none() && eventsub.is_none() {
		warn!("nothing to do: configure a chat channel or eventsub subscriptions");
		return Ok(());
	}

	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
	info!("shutting down");

	for task in tasks {
		task.abort();
	}
	if let Some(chat) = chat {
		chat.disconnect().await;
	}
	if let Some(eventsub) = eventsub {
		eventsub.disconnect().await;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;
	use futures_util::SinkExt;
	use relay_platform::{ApiResponse, SubscriptionApi};
	use serde_json::{Value, json};
	use tokio::net::TcpListener;
	use tokio::sync::Semaphore;
	use tokio::time::{sleep, timeout};
	use tungstenite::Message;

	use super::*;

	const WAIT: Duration = Duration::from_secs(5);

	/// Rejects the first request, then holds every later one until released.
	struct GatedApi {
		calls: AtomicUsize,
		gate: Semaphore,
	}

	#[async_trait]
	impl SubscriptionApi for GatedApi {
		async fn create_subscription(&self, body: &Value) -> anyhow::Result<ApiResponse> {
			if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
				return Ok(ApiResponse {
					status: 500,
					body: json!({"error": "try again"}),
				});
			}
			let _permit = self.gate.acquire().await?;
			Ok(ApiResponse {
				status: 202,
				body: json!({"data": [{"id": format!("id-{}", body["type"].as_str().unwrap_or_default())}]}),
			})
		}
	}

	fn envelope(id: &str, message_type: &str, payload: Value) -> String {
		json!({
			"metadata": {
				"message_id": id,
				"message_type": message_type,
				"message_timestamp": "2024-01-01T00:00:00Z",
			},
			"payload": payload,
		})
		.to_string()
	}

	async fn eventually(mut check: impl FnMut() -> bool) {
		timeout(WAIT, async {
			while !check() {
				sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("condition never held");
	}

	#[tokio::test]
	async fn subscriber_retries_without_holding_up_events() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("ws://{}", listener.local_addr().unwrap());
		let api = Arc::new(GatedApi {
			calls: AtomicUsize::new(0),
			gate: Semaphore::new(0),
		});
		let config = EventSubConfig {
			url,
			reconnect_delay: Duration::from_secs(3600),
			verify_timestamps: false,
			..EventSubConfig::new()
		};
		let eventsub = Arc::new(EventSubConnection::with_api(config, api.clone()));
		let mut events = eventsub.register_for_events();

		let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
		let mut server = tokio_tungstenite::accept_async(stream).await.unwrap();
		server
			.send(Message::text(envelope(
				"m1",
				"session_welcome",
				json!({"session": {"id": "s1", "keepalive_timeout_seconds": 10}}),
			)))
			.await
			.unwrap();
		eventually(|| eventsub.session_id().is_some()).await;

		let follow = Subscription::new("channel.follow", "2", json!({"broadcaster_user_id": "1"}));
		let subscriber = spawn_subscriber(Arc::clone(&eventsub), vec![follow], Duration::from_millis(20));

		// First attempt is rejected; the retry is parked inside the API.
		eventually(|| api.calls.load(Ordering::SeqCst) >= 2).await;
		assert_eq!(eventsub.active_subscription_count(), 0);

		server
			.send(Message::text(envelope(
				"m2",
				"notification",
				json!({"subscription": {"id": "id-channel.follow", "type": "channel.follow"}, "event": {}}),
			)))
			.await
			.unwrap();
		let event = timeout(WAIT, events.recv()).await.expect("event delayed by registration");
		assert_eq!(event.r#type, "channel.follow");

		api.gate.add_permits(1);
		eventually(|| eventsub.is_subscription_active("id-channel.follow")).await;
		sleep(Duration::from_millis(100)).await;
		assert_eq!(api.calls.load(Ordering::SeqCst), 2);

		subscriber.abort();
		eventsub.disconnect().await;
	}
}
