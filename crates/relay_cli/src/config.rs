#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use relay_domain::SecretString;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// Default config path: `~/.relay/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".relay").join("config.toml"))
}

/// Load the config from TOML at `path` (missing file means defaults) and env overrides.
pub fn load_relay_config_from_path(path: &Path) -> anyhow::Result<RelayConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = RelayConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
	pub twitch: TwitchSettings,
	pub chat: ChatSettings,
	pub eventsub: EventSubSettings,
}

/// Credentials.
#[derive(Debug, Clone, Default)]
pub struct TwitchSettings {
	pub access_token: Option<SecretString>,
	pub client_id: Option<String>,
	pub login: Option<String>,
	pub user_id: Option<String>,
	/// Only used when `validate_token` is off; validation reports the real scopes.
	pub scopes: Vec<String>,
	/// Ask Twitch for login, user id and scopes instead of trusting the config.
	pub validate_token: bool,
	pub reconnect_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatSettings {
	pub channel: Option<String>,
	pub url: Option<String>,
	/// Only log chat lines whose text matches this regex.
	pub filter: Option<String>,
	pub buffer_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct EventSubSettings {
	pub url: Option<String>,
	pub helix_base_url: Option<String>,
	pub verify_timestamps: Option<bool>,
	pub dedupe_window: Option<usize>,
	pub buffer_capacity: Option<usize>,
	pub subscriptions: Vec<SubscriptionSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
	pub r#type: String,
	pub version: String,
	pub condition: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	chat: FileChatSettings,

	#[serde(default)]
	eventsub: FileEventSubSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	access_token: Option<String>,
	client_id: Option<String>,
	login: Option<String>,
	user_id: Option<String>,
	#[serde(default)]
	scopes: Vec<String>,
	validate_token: Option<bool>,
	reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	channel: Option<String>,
	url: Option<String>,
	filter: Option<String>,
	buffer_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileEventSubSettings {
	url: Option<String>,
	helix_base_url: Option<String>,
	verify_timestamps: Option<bool>,
	dedupe_window: Option<usize>,
	buffer_capacity: Option<usize>,

	#[serde(default)]
	subscriptions: Vec<FileSubscription>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileSubscription {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default = "default_subscription_version")]
	version: String,
	#[serde(default)]
	condition: Value,
}

fn default_subscription_version() -> String {
	"1".to_string()
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl RelayConfig {
	fn from_file(file: FileConfig) -> Self {
		let twitch = TwitchSettings {
			access_token: non_empty(file.twitch.access_token).map(SecretString::new),
			client_id: non_empty(file.twitch.client_id),
			login: non_empty(file.twitch.login),
			user_id: non_empty(file.twitch.user_id),
			scopes: file.twitch.scopes,
			validate_token: file.twitch.validate_token.unwrap_or(true),
			reconnect_delay: file.twitch.reconnect_delay_ms.map(Duration::from_millis),
		};

		let chat = ChatSettings {
			channel: non_empty(file.chat.channel),
			url: non_empty(file.chat.url),
			filter: non_empty(file.chat.filter),
			buffer_capacity: file.chat.buffer_capacity,
		};

		let subscriptions = file
			.eventsub
			.subscriptions
			.into_iter()
			.filter(|s| !s.kind.trim().is_empty())
			.map(|s| SubscriptionSettings {
				r#type: s.kind.trim().to_string(),
				version: s.version,
				condition: if s.condition.is_null() {
					Value::Object(Default::default())
				} else {
					s.condition
				},
			})
			.collect();

		let eventsub = EventSubSettings {
			url: non_empty(file.eventsub.url),
			helix_base_url: non_empty(file.eventsub.helix_base_url),
			verify_timestamps: file.eventsub.verify_timestamps,
			dedupe_window: file.eventsub.dedupe_window.filter(|v| *v > 0),
			buffer_capacity: file.eventsub.buffer_capacity,
			subscriptions,
		};

		Self { twitch, chat, eventsub }
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => parse_toml(&s).map(Some),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn apply_env_overrides(cfg: &mut RelayConfig, var: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| non_empty(var(key));

	if let Some(v) = text("RELAY_TWITCH_TOKEN") {
		cfg.twitch.access_token = Some(SecretString::new(v));
		info!("twitch config: access_token overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_CLIENT_ID") {
		cfg.twitch.client_id = Some(v);
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_LOGIN") {
		cfg.twitch.login = Some(v);
		info!("twitch config: login overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_USER_ID") {
		cfg.twitch.user_id = Some(v);
		info!("twitch config: user_id overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_VALIDATE_TOKEN")
		&& let Some(validate) = parse_env_bool(&v)
	{
		cfg.twitch.validate_token = validate;
		info!(validate, "twitch config: validate_token overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_RECONNECT_DELAY_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.twitch.reconnect_delay = Some(Duration::from_millis(ms));
		info!(ms, "twitch config: reconnect_delay overridden by env");
	}

	if let Some(v) = text("RELAY_TWITCH_CHANNEL") {
		cfg.chat.channel = Some(v);
		info!("chat config: channel overridden by env");
	}

	if let Some(v) = text("RELAY_CHAT_URL") {
		cfg.chat.url = Some(v);
		info!("chat config: url overridden by env");
	}

	if let Some(v) = text("RELAY_EVENTSUB_URL") {
		cfg.eventsub.url = Some(v);
		info!("eventsub config: url overridden by env");
	}

	if let Some(v) = text("RELAY_HELIX_BASE_URL") {
		cfg.eventsub.helix_base_url = Some(v);
		info!("eventsub config: helix_base_url overridden by env");
	}

	if let Some(v) = text("RELAY_EVENTSUB_VERIFY_TIMESTAMPS")
		&& let Some(verify) = parse_env_bool(&v)
	{
		cfg.eventsub.verify_timestamps = Some(verify);
		info!(verify, "eventsub config: verify_timestamps overridden by env");
	}

	if cfg.twitch.access_token.is_none() {
		warn!("twitch config: no access token configured (set RELAY_TWITCH_TOKEN)");
	}
}
