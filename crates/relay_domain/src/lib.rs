#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scopes that allow reading from or writing to Twitch chat.
pub const CHAT_SCOPES: [&str; 2] = ["chat:read", "chat:edit"];

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Twitch channel login (lowercase, no leading `#`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
	/// Normalize and validate a channel name.
	///
	/// Accepts `#Foo`, `foo` or ` foo ` and stores `foo`.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let name = name.trim().trim_start_matches('#').trim();
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if name.contains(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(format!("channel name contains whitespace: {name}")));
		}
		Ok(Self(name.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// IRC form of the channel (`#name`).
	pub fn irc(&self) -> String {
		format!("#{}", self.0)
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s)
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Twitch user credential as seen by connections.
///
/// Holds the OAuth access token, the identity it belongs to, and the scopes it
/// was granted. Connections never mutate it; a refreshed token is a new value.
#[derive(Debug, Clone, Default)]
pub struct TwitchToken {
	/// Login name of the token owner (used as IRC nick).
	pub login: String,
	pub user_id: String,
	pub client_id: String,
	pub access_token: Option<SecretString>,
	pub scopes: BTreeSet<String>,
}

impl TwitchToken {
	pub fn new(login: impl Into<String>, user_id: impl Into<String>, access_token: SecretString) -> Self {
		Self {
			login: login.into(),
			user_id: user_id.into(),
			client_id: String::new(),
			access_token: Some(access_token),
			scopes: BTreeSet::new(),
		}
	}

	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = client_id.into();
		self
	}

	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();
		self
	}

	/// The raw access token, if one is present and non-empty.
	pub fn token(&self) -> Option<&str> {
		self.access_token
			.as_ref()
			.map(SecretString::expose)
			.filter(|t| !t.trim().is_empty())
	}

	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	pub fn login(&self) -> &str {
		&self.login
	}

	/// True if at least one of `options` was granted to this token.
	pub fn any_option_is_enabled(&self, options: &[&str]) -> bool {
		options.iter().any(|o| self.scopes.contains(*o))
	}

	/// Case-insensitive comparison against the token owner's login.
	pub fn is_user(&self, nick: &str) -> bool {
		!self.login.is_empty() && self.login.eq_ignore_ascii_case(nick)
	}
}

/// Lifecycle of a single transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	Connecting,
	Open,
	Closing,
	#[default]
	Closed,
}

impl ConnectionState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Connecting => "connecting",
			Self::Open => "open",
			Self::Closing => "closing",
			Self::Closed => "closed",
		}
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
