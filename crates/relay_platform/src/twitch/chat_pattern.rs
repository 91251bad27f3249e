#![forbid(unsafe_code)]

use anyhow::Context;
use regex::{Regex, RegexBuilder};
use relay_protocol::IrcMessage;

/// How a text value is compared.
#[derive(Debug, Clone)]
pub enum TextMatch {
	Exact(String),
	CaseInsensitive(String),
	/// Anchored to the whole input.
	Regex(Regex),
}

impl TextMatch {
	pub fn exact(value: impl Into<String>) -> Self {
		Self::Exact(value.into())
	}

	pub fn case_insensitive(value: impl Into<String>) -> Self {
		Self::CaseInsensitive(value.into())
	}

	pub fn regex(pattern: &str, case_insensitive: bool) -> anyhow::Result<Self> {
		let re = RegexBuilder::new(&format!("^(?:{pattern})$"))
			.case_insensitive(case_insensitive)
			.build()
			.with_context(|| format!("compile chat pattern regex {pattern:?}"))?;
		Ok(Self::Regex(re))
	}

	pub fn matches(&self, input: &str) -> bool {
		match self {
			TextMatch::Exact(v) => input == v,
			TextMatch::CaseInsensitive(v) => input.to_lowercase() == v.to_lowercase(),
			TextMatch::Regex(re) => re.is_match(input),
		}
	}
}

/// A single check against message tags or source.
#[derive(Debug, Clone)]
pub enum ChatMessageProperty {
	FirstMessage(bool),
	EmoteOnly(bool),
	Mod(bool),
	Subscriber(bool),
	Turbo(bool),
	Vip(bool),
	Color(TextMatch),
	DisplayName(TextMatch),
	LoginName(TextMatch),
	/// Any enabled badge whose name matches.
	Badge(TextMatch),
}

impl ChatMessageProperty {
	pub fn matches(&self, msg: &IrcMessage) -> bool {
		match self {
			Self::FirstMessage(want) => msg.is_first_message() == *want,
			Self::EmoteOnly(want) => msg.is_emote_only() == *want,
			Self::Mod(want) => msg.is_mod() == *want,
			Self::Subscriber(want) => msg.is_subscriber() == *want,
			Self::Turbo(want) => msg.is_turbo() == *want,
			Self::Vip(want) => msg.is_vip() == *want,
			Self::Color(m) => m.matches(msg.color().unwrap_or_default()),
			Self::DisplayName(m) => m.matches(msg.display_name().unwrap_or_default()),
			Self::LoginName(m) => m.matches(&msg.source.nick),
			Self::Badge(m) => msg.badges().iter().any(|b| b.enabled && m.matches(&b.name)),
		}
	}
}

/// Chat message text plus property checks; all must hold.
#[derive(Debug, Clone)]
pub struct ChatMessagePattern {
	pub message: Option<TextMatch>,
	pub properties: Vec<ChatMessageProperty>,
}

impl ChatMessagePattern {
	pub fn new(message: Option<TextMatch>) -> Self {
		Self {
			message,
			properties: Vec::new(),
		}
	}

	pub fn with_property(mut self, property: ChatMessageProperty) -> Self {
		self.properties.push(property);
		self
	}

	pub fn matches(&self, msg: &IrcMessage) -> bool {
		if let Some(m) = &self.message
			&& !m.matches(&msg.message)
		{
			return false;
		}
		self.properties.iter().all(|p| p.matches(msg))
	}
}
