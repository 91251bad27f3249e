#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use thiserror::Error;

use crate::wire::IRC_LINE_DELIMITER;

/// Tags that are never surfaced to consumers.
const IGNORED_TAGS: [&str; 2] = ["client-nonce", "flags"];

/// Commands that carry a single text parameter (usually the channel).
const TEXT_PARAM_COMMANDS: [&str; 11] = [
	"PING",
	"001",
	"JOIN",
	"PART",
	"NOTICE",
	"CLEARCHAT",
	"CLEARMSG",
	"HOSTTARGET",
	"PRIVMSG",
	"WHISPER",
	"USERNOTICE",
];

/// Commands that are recognized but carry nothing we use.
const IGNORED_COMMANDS: [&str; 11] = [
	"GLOBALUSERSTATE",
	"USERSTATE",
	"ROOMSTATE",
	"RECONNECT",
	"002",
	"003",
	"004",
	"366",
	"372",
	"375",
	"376",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrcParseError {
	#[error("empty command")]
	EmptyCommand,

	#[error("unsupported command: {0}")]
	Unsupported(String),
}

/// Parsed value of a single IRC tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
	Text(String),
	/// `badges`/`badge-info`: badge name to version.
	Badges(BTreeMap<String, String>),
	/// `emotes`: emote id to `(start, end)` character ranges.
	Emotes(BTreeMap<String, Vec<(u32, u32)>>),
	/// `emote-sets`
	EmoteSets(Vec<String>),
}

impl TagValue {
	pub fn as_text(&self) -> Option<&str> {
		match self {
			TagValue::Text(s) => Some(s),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
	/// Empty when the prefix had no `!`.
	pub nick: String,
	pub host: String,
}

/// Command parameters; which variant is produced depends on the command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Parameters {
	#[default]
	None,
	Text(String),
	/// `CAP`: whether the capability request was acknowledged.
	Flag(bool),
	/// `353`: the names list.
	List(Vec<String>),
}

impl Parameters {
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Parameters::Text(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_flag(&self) -> Option<bool> {
		match self {
			Parameters::Flag(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[String]> {
		match self {
			Parameters::List(v) => Some(v),
			_ => None,
		}
	}
}

impl PartialEq<&str> for Parameters {
	fn eq(&self, other: &&str) -> bool {
		self.as_text() == Some(*other)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
	pub command: String,
	pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
	pub name: String,
	pub version: String,
	pub enabled: bool,
}

/// Parent of a threaded reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyParent {
	pub message_id: String,
	pub body: String,
	pub display_name: String,
	pub user_id: String,
	pub user_login: String,
	pub thread_message_id: String,
	pub thread_user_login: String,
}

/// One decoded IRC line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcMessage {
	pub tags: BTreeMap<String, TagValue>,
	pub source: Source,
	pub command: Command,
	/// Trailing free text after the first `:` of the command segment.
	pub message: String,
}

impl IrcMessage {
	pub fn tag(&self, name: &str) -> Option<&TagValue> {
		self.tags.get(name)
	}

	pub fn text_tag(&self, name: &str) -> Option<&str> {
		self.tags.get(name).and_then(TagValue::as_text)
	}

	/// Twitch boolean tags are `"1"` when set.
	pub fn flag_tag(&self, name: &str) -> bool {
		self.text_tag(name) == Some("1")
	}

	pub fn display_name(&self) -> Option<&str> {
		self.text_tag("display-name")
	}

	pub fn color(&self) -> Option<&str> {
		self.text_tag("color")
	}

	pub fn id(&self) -> Option<&str> {
		self.text_tag("id")
	}

	pub fn user_id(&self) -> Option<&str> {
		self.text_tag("user-id")
	}

	pub fn user_type(&self) -> Option<&str> {
		self.text_tag("user-type")
	}

	pub fn bits(&self) -> Option<u32> {
		self.text_tag("bits").and_then(|b| b.parse().ok())
	}

	/// `tmi-sent-ts`, in milliseconds since the Unix epoch.
	pub fn sent_at_ms(&self) -> Option<u64> {
		self.text_tag("tmi-sent-ts").and_then(|t| t.parse().ok())
	}

	pub fn is_mod(&self) -> bool {
		self.flag_tag("mod")
	}

	pub fn is_subscriber(&self) -> bool {
		self.flag_tag("subscriber")
	}

	pub fn is_vip(&self) -> bool {
		self.flag_tag("vip")
	}

	pub fn is_turbo(&self) -> bool {
		self.flag_tag("turbo")
	}

	pub fn is_first_message(&self) -> bool {
		self.flag_tag("first-msg")
	}

	pub fn is_emote_only(&self) -> bool {
		self.flag_tag("emote-only")
	}

	pub fn badges(&self) -> Vec<Badge> {
		match self.tags.get("badges") {
			Some(TagValue::Badges(map)) => map
				.iter()
				.map(|(name, version)| Badge {
					name: name.clone(),
					version: version.clone(),
					enabled: version != "0",
				})
				.collect(),
			_ => Vec::new(),
		}
	}

	pub fn reply_parent(&self) -> Option<ReplyParent> {
		let message_id = self.text_tag("reply-parent-msg-id")?.to_string();
		let get = |name: &str| self.text_tag(name).unwrap_or_default().to_string();
		Some(ReplyParent {
			message_id,
			body: get("reply-parent-msg-body"),
			display_name: get("reply-parent-display-name"),
			user_id: get("reply-parent-user-id"),
			user_login: get("reply-parent-user-login"),
			thread_message_id: get("reply-thread-parent-msg-id"),
			thread_user_login: get("reply-thread-parent-user-login"),
		})
	}

	/// Channel parameter without the leading `#`.
	pub fn channel(&self) -> Option<&str> {
		let param = self.command.parameters.as_text()?;
		let channel = param.strip_prefix('#').unwrap_or(param);
		(!channel.is_empty()).then_some(channel)
	}
}

/// Decode every non-blank line of a frame. Malformed lines are logged and skipped.
pub fn decode_irc_frame(payload: &str) -> Vec<IrcMessage> {
	payload
		.split(IRC_LINE_DELIMITER)
		.filter(|line| !line.trim().is_empty())
		.filter_map(|line| match parse_irc_line(line) {
			Ok(msg) => Some(msg),
			Err(e) => {
				tracing::debug!(error = %e, line = %line, "discarding IRC message");
				None
			}
		})
		.collect()
}

/// Parse a single IRC line (without the trailing delimiter).
pub fn parse_irc_line(line: &str) -> Result<IrcMessage, IrcParseError> {
	let mut rest = line.trim_end_matches(['\r', '\n']);
	let mut msg = IrcMessage::default();

	if let Some(after) = rest.strip_prefix('@') {
		let (raw_tags, tail) = after.split_once(' ').unwrap_or((after, ""));
		msg.tags = parse_tags(raw_tags);
		rest = tail;
	}

	if let Some(after) = rest.strip_prefix(':') {
		let (raw_source, tail) = after.split_once(' ').unwrap_or((after, ""));
		msg.source = parse_source(raw_source);
		rest = tail;
	}

	let (raw_command, trailing) = match rest.split_once(':') {
		Some((cmd, text)) => (cmd, text),
		None => (rest, ""),
	};
	msg.message = trailing.to_string();
	msg.command = parse_command(raw_command, trailing)?;
	Ok(msg)
}

fn parse_tags(raw: &str) -> BTreeMap<String, TagValue> {
	let mut tags = BTreeMap::new();
	for pair in raw.split(';') {
		let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
		if name.is_empty() || value.is_empty() || IGNORED_TAGS.contains(&name) {
			continue;
		}

		let parsed = match name {
			"badges" | "badge-info" => TagValue::Badges(parse_badges(value)),
			"emotes" => TagValue::Emotes(parse_emotes(value)),
			"emote-sets" => TagValue::EmoteSets(value.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect()),
			_ => TagValue::Text(value.to_string()),
		};
		tags.insert(name.to_string(), parsed);
	}
	tags
}

fn parse_badges(value: &str) -> BTreeMap<String, String> {
	value
		.split(',')
		.filter(|pair| !pair.is_empty())
		.map(|pair| {
			let (name, version) = pair.split_once('/').unwrap_or((pair, ""));
			(name.to_string(), version.to_string())
		})
		.collect()
}

/// `25:0-4,12-16/1902:6-10`
fn parse_emotes(value: &str) -> BTreeMap<String, Vec<(u32, u32)>> {
	let mut emotes = BTreeMap::new();
	for entry in value.split('/') {
		let Some((id, ranges)) = entry.split_once(':') else {
			continue;
		};
		let positions: Vec<(u32, u32)> = ranges
			.split(',')
			.filter_map(|range| {
				let (start, end) = range.split_once('-')?;
				Some((start.parse().ok()?, end.parse().ok()?))
			})
			.collect();
		if id.is_empty() || positions.is_empty() {
			tracing::debug!(entry = %entry, "skipping malformed emote tag entry");
			continue;
		}
		emotes.insert(id.to_string(), positions);
	}
	emotes
}

fn parse_source(raw: &str) -> Source {
	match raw.split_once('!') {
		Some((nick, host)) => Source {
			nick: nick.to_string(),
			host: host.to_string(),
		},
		None => Source {
			nick: String::new(),
			host: raw.to_string(),
		},
	}
}

fn parse_command(raw: &str, trailing: &str) -> Result<Command, IrcParseError> {
	let parts: Vec<&str> = raw.split_whitespace().collect();
	let Some(&name) = parts.first() else {
		return Err(IrcParseError::EmptyCommand);
	};

	let parameters = match name {
		"421" => return Err(IrcParseError::Unsupported(name.to_string())),
		"CAP" => parts.get(2).map(|ack| Parameters::Flag(*ack == "ACK")).unwrap_or_default(),
		// PING carries its token as trailing text.
		"PING" => Parameters::Text(parts.get(1).copied().unwrap_or(trailing).to_string()),
		"353" => Parameters::List(trailing.split_whitespace().map(str::to_string).collect()),
		_ if TEXT_PARAM_COMMANDS.contains(&name) => parts
			.get(1)
			.map(|p| Parameters::Text((*p).to_string()))
			.unwrap_or_default(),
		_ if IGNORED_COMMANDS.contains(&name) => Parameters::None,
		_ => {
			tracing::debug!(command = %name, "unexpected IRC command");
			Parameters::None
		}
	};

	Ok(Command {
		command: name.to_string(),
		parameters,
	})
}
