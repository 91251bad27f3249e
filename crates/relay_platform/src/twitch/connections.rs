#![forbid(unsafe_code)]

use std::sync::Arc;

use relay_domain::{CHAT_SCOPES, ChannelName, SecretString, TwitchToken};
use tracing::{debug, warn};

use crate::pool::ConnectionPool;
use crate::twitch::chat::{ChatConfig, ChatConnection};
use crate::twitch::eventsub::{EventSubConfig, EventSubConnection};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChatKey {
	channel: ChannelName,
	token: SecretString,
}

/// Shared Twitch connections, one per channel and token for chat and one per
/// token for EventSub.
///
/// Callers own the returned handles; a connection lives as long as any caller
/// holds it.
pub struct TwitchConnections {
	chat_config: ChatConfig,
	eventsub_config: EventSubConfig,
	chats: ConnectionPool<ChatKey, ChatConnection>,
	eventsubs: ConnectionPool<SecretString, EventSubConnection>,
}

impl TwitchConnections {
	pub fn new(chat_config: ChatConfig, eventsub_config: EventSubConfig) -> Self {
		Self {
			chat_config,
			eventsub_config,
			chats: ConnectionPool::new(),
			eventsubs: ConnectionPool::new(),
		}
	}

	/// Chat connection for `channel` authenticated with `token`.
	///
	/// `None` when the token has no access token or no chat scope, or the
	/// channel name is empty.
	pub fn chat(&self, token: &TwitchToken, channel: &str) -> Option<Arc<ChatConnection>> {
		let access_token = token.token()?;
		if !token.any_option_is_enabled(&CHAT_SCOPES) {
			debug!(login = %token.login(), "twitch token lacks chat scopes");
			return None;
		}
		let channel = ChannelName::new(channel).ok()?;

		let key = ChatKey {
			channel: channel.clone(),
			token: SecretString::new(access_token),
		};
		self.chats
			.get_or_try_create(key, || ChatConnection::new(token, channel, self.chat_config.clone()))
			.inspect_err(|e| warn!(error = ?e, "failed to create twitch chat connection"))
			.ok()
	}

	/// EventSub connection for `token`. `None` when the token has no access token.
	pub fn event_sub(&self, token: &TwitchToken) -> Option<Arc<EventSubConnection>> {
		let access_token = token.token()?;
		self.eventsubs
			.get_or_try_create(SecretString::new(access_token), || {
				EventSubConnection::new(token, self.eventsub_config.clone())
			})
			.inspect_err(|e| warn!(error = ?e, "failed to create twitch eventsub connection"))
			.ok()
	}

	pub fn live_chat_connections(&self) -> usize {
		self.chats.live_count()
	}

	pub fn live_eventsub_connections(&self) -> usize {
		self.eventsubs.live_count()
	}
}

impl Default for TwitchConnections {
	fn default() -> Self {
		Self::new(ChatConfig::new(), EventSubConfig::new())
	}
}
