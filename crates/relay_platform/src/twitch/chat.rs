#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use relay_domain::{ChannelName, ConnectionState, SecretString, TwitchToken};
use relay_protocol::{IrcMessage, decode_irc_frame};
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, ConnectionConfig, DEFAULT_RECONNECT_DELAY, Session, SessionAction};
use crate::dispatch::{DEFAULT_BUFFER_CAPACITY, MessageBuffer, MessageDispatcher};

pub const DEFAULT_CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const CAPABILITIES_REQUEST: &str = "CAP REQ :twitch.tv/membership twitch.tv/tags twitch.tv/commands";
const NOTICE_LOGIN_FAILED: &str = "Login unsuccessful";
const NOTICE_NO_PERMISSION: &str = "You don't have permission to perform that action";

#[derive(Debug, Clone)]
pub struct ChatConfig {
	pub url: String,
	pub reconnect_delay: Duration,
	pub buffer_capacity: usize,
}

impl ChatConfig {
	pub fn new() -> Self {
		Self {
			url: DEFAULT_CHAT_URL.to_string(),
			reconnect_delay: DEFAULT_RECONNECT_DELAY,
			buffer_capacity: DEFAULT_BUFFER_CAPACITY,
		}
	}
}

impl Default for ChatConfig {
	fn default() -> Self {
		Self::new()
	}
}

pub(crate) struct ChatSession {
	token: TwitchToken,
	access_token: SecretString,
	channel: ChannelName,
	authenticated: AtomicBool,
	/// Channel parameter (`#name`) of our own confirmed JOIN.
	joined_channel: Mutex<Option<String>>,
	messages: MessageDispatcher<IrcMessage>,
	whispers: MessageDispatcher<IrcMessage>,
}

impl ChatSession {
	pub(crate) fn new(token: &TwitchToken, channel: ChannelName, config: &ChatConfig) -> anyhow::Result<Self> {
		let access_token = token.token().context("twitch token has no access token")?;
		Ok(Self {
			token: token.clone(),
			access_token: SecretString::new(access_token),
			channel,
			authenticated: AtomicBool::new(false),
			joined_channel: Mutex::new(None),
			messages: MessageDispatcher::new(config.buffer_capacity),
			whispers: MessageDispatcher::new(config.buffer_capacity),
		})
	}

	pub(crate) fn is_authenticated(&self) -> bool {
		self.authenticated.load(Ordering::SeqCst)
	}

	pub(crate) fn joined_channel(&self) -> Option<String> {
		self.joined_channel.lock().clone()
	}

	pub(crate) fn messages(&self) -> &MessageDispatcher<IrcMessage> {
		&self.messages
	}

	pub(crate) fn whispers(&self) -> &MessageDispatcher<IrcMessage> {
		&self.whispers
	}

	fn handle_message(&self, msg: IrcMessage, actions: &mut Vec<SessionAction>) {
		match msg.command.command.as_str() {
			"001" => {
				info!(channel = %self.channel, "twitch chat authenticated");
				self.authenticated.store(true, Ordering::SeqCst);
				actions.push(SessionAction::Send(format!("JOIN {}", self.channel.irc())));
			}
			"PING" => {
				let token = msg.command.parameters.as_text().unwrap_or_default();
				actions.push(SessionAction::Send(format!("PONG :{token}")));
			}
			"JOIN" => {
				if self.token.is_user(&msg.source.nick) {
					let joined = msg.command.parameters.as_text().unwrap_or_default().to_string();
					info!(channel = %joined, "twitch chat joined channel");
					*self.joined_channel.lock() = Some(joined);
				} else {
					self.messages.dispatch(msg);
				}
			}
			"PART" => {
				if self.token.is_user(&msg.source.nick) {
					info!(channel = ?msg.command.parameters.as_text(), "twitch chat left channel");
					*self.joined_channel.lock() = None;
				} else {
					self.messages.dispatch(msg);
				}
			}
			"PRIVMSG" => self.messages.dispatch(msg),
			"WHISPER" => self.whispers.dispatch(msg),
			"NOTICE" => match msg.message.as_str() {
				NOTICE_LOGIN_FAILED => warn!(notice = %msg.message, "twitch chat login unsuccessful"),
				NOTICE_NO_PERMISSION => warn!("twitch chat permission denied; check that the access token is still valid"),
				other => debug!(notice = %other, "twitch chat notice"),
			},
			"RECONNECT" => {
				info!("twitch chat server requested reconnect");
				actions.push(SessionAction::Reconnect { url: None });
			}
			_ => {}
		}
	}
}

impl Session for ChatSession {
	fn on_open(&self) -> Vec<SessionAction> {
		debug!(channel = %self.channel, "twitch chat socket opened; authenticating");
		vec![
			SessionAction::Send(CAPABILITIES_REQUEST.to_string()),
			SessionAction::Send(format!("PASS oauth:{}", self.access_token.expose())),
			SessionAction::Send(format!("NICK {}", self.token.login().to_ascii_lowercase())),
		]
	}

	fn handle_frame(&self, frame: &str) -> Vec<SessionAction> {
		let mut actions = Vec::new();
		for msg in decode_irc_frame(frame) {
			self.handle_message(msg, &mut actions);
			if actions.iter().any(|a| matches!(a, SessionAction::Reconnect { .. })) {
				break;
			}
		}
		actions
	}

	fn on_close(&self, reason: CloseReason) {
		self.authenticated.store(false, Ordering::SeqCst);
		*self.joined_channel.lock() = None;
		info!(channel = %self.channel, ?reason, "twitch chat connection closed");
	}
}

/// Twitch IRC-over-websocket connection joined to one channel.
pub struct ChatConnection {
	conn: Connection<ChatSession>,
}

impl ChatConnection {
	pub fn new(token: &TwitchToken, channel: ChannelName, config: ChatConfig) -> anyhow::Result<Self> {
		let session = ChatSession::new(token, channel, &config)?;
		let conn_cfg = ConnectionConfig::new(config.url).with_reconnect_delay(config.reconnect_delay);
		Ok(Self {
			conn: Connection::new(conn_cfg, session),
		})
	}

	pub fn channel(&self) -> &ChannelName {
		&self.conn.session().channel
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

	/// The server accepted our credentials (`001`).
	pub fn is_authenticated(&self) -> bool {
		self.conn.session().is_authenticated()
	}

	/// Channel we are confirmed to be in, as `#name`.
	pub fn joined_channel(&self) -> Option<String> {
		self.conn.session().joined_channel()
	}

	/// Buffer receiving `PRIVMSG` and other users' `JOIN`/`PART`. Connects if needed.
	pub fn register_for_messages(&self) -> MessageBuffer<IrcMessage> {
		self.connect();
		self.conn.session().messages().register()
	}

	/// Buffer receiving `WHISPER`. Connects if needed.
	pub fn register_for_whispers(&self) -> MessageBuffer<IrcMessage> {
		self.connect();
		self.conn.session().whispers().register()
	}

	/// Queue `text` for the joined channel. Returns `false` if not joined yet
	/// or if `text` contains a line break.
	pub fn send_chat_message(&self, text: &str) -> bool {
		if text.contains(['\r', '\n']) {
			debug!(channel = %self.channel(), "twitch chat message dropped; text contains a line break");
			return false;
		}
		self.connect();
		let Some(joined) = self.joined_channel() else {
			debug!(channel = %self.channel(), "twitch chat message dropped; channel not joined yet");
			return false;
		};
		if !self.conn.send(format!("PRIVMSG {joined} :{text}")) {
			debug!(channel = %joined, "twitch chat message dropped; no live socket");
			return false;
		}
		true
	}
}
