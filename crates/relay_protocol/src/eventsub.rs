#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::dedupe::DedupeWindow;
use crate::wire::{MAX_CLOCK_DRIFT_MINUTES, MAX_MESSAGE_AGE_MINUTES};

#[derive(Debug, Error)]
pub enum EnvelopeError {
	#[error("invalid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid timestamp {0:?}")]
	InvalidTimestamp(String),

	#[error("stale or future timestamp {timestamp} (age {age_seconds}s)")]
	StaleTimestamp {
		timestamp: String,
		age_seconds: i64,
	},

	#[error("duplicate message_id {0}")]
	Duplicate(String),

	#[error("missing field {0}")]
	MissingField(&'static str),

	#[error("unknown message_type {0}")]
	UnknownType(String),
}

impl EnvelopeError {
	/// Replay or staleness rejection, as opposed to a malformed frame.
	pub fn is_replay(&self) -> bool {
		matches!(self, EnvelopeError::StaleTimestamp { .. } | EnvelopeError::Duplicate(_))
	}
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
	metadata: RawMetadata,
	#[serde(default)]
	payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
	#[serde(default)]
	message_id: String,
	#[serde(default)]
	message_type: String,
	#[serde(default)]
	message_timestamp: String,
}

/// Outer EventSub frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	pub message_id: String,
	pub message_type: String,
	pub message_timestamp: String,
	pub payload: Value,
}

/// A `notification` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
	/// Subscription id.
	pub id: String,
	/// Subscription type, e.g. `channel.follow`.
	pub r#type: String,
	pub data: Value,
}

/// A `revocation` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Revocation {
	pub id: String,
	pub status: String,
	pub r#type: String,
	pub version: String,
	pub condition: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
	Welcome {
		session_id: String,
		keepalive_timeout_seconds: Option<u64>,
	},
	Keepalive,
	Notification(Event),
	Reconnect {
		session_id: String,
		reconnect_url: String,
	},
	Revocation(Revocation),
}

pub fn parse_envelope(raw: &str) -> Result<Envelope, EnvelopeError> {
	let raw: RawEnvelope = serde_json::from_str(raw)?;
	if raw.metadata.message_type.is_empty() {
		return Err(EnvelopeError::MissingField("metadata.message_type"));
	}
	Ok(Envelope {
		message_id: raw.metadata.message_id,
		message_type: raw.metadata.message_type,
		message_timestamp: raw.metadata.message_timestamp,
		payload: raw.payload,
	})
}

/// Accept `timestamp` if `now - timestamp` lies within `[-1 min, +10 min]`.
pub fn check_timestamp(timestamp: &str, now: DateTime<Utc>) -> Result<(), EnvelopeError> {
	let parsed = DateTime::parse_from_rfc3339(timestamp)
		.map_err(|_| EnvelopeError::InvalidTimestamp(timestamp.to_string()))?
		.with_timezone(&Utc);
	let age = now - parsed;
	if age > Duration::minutes(MAX_MESSAGE_AGE_MINUTES) || age < -Duration::minutes(MAX_CLOCK_DRIFT_MINUTES) {
		return Err(EnvelopeError::StaleTimestamp {
			timestamp: timestamp.to_string(),
			age_seconds: age.num_seconds(),
		});
	}
	Ok(())
}

/// Stateful EventSub frame decoder: timestamp check, id dedupe, then typed dispatch.
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
	seen: DedupeWindow,
	verify_timestamps: bool,
}

impl EnvelopeDecoder {
	pub fn new(dedupe_window: usize, verify_timestamps: bool) -> Self {
		Self {
			seen: DedupeWindow::new(dedupe_window),
			verify_timestamps,
		}
	}

	pub fn verify_timestamps(&self) -> bool {
		self.verify_timestamps
	}

	pub fn decode(&mut self, raw: &str) -> Result<SessionMessage, EnvelopeError> {
		self.decode_at(raw, Utc::now())
	}

	/// Same as [`decode`](Self::decode) with an explicit clock.
	pub fn decode_at(&mut self, raw: &str, now: DateTime<Utc>) -> Result<SessionMessage, EnvelopeError> {
		let envelope = parse_envelope(raw)?;
		if self.verify_timestamps {
			check_timestamp(&envelope.message_timestamp, now)?;
		}
		if !self.seen.check_and_insert(&envelope.message_id) {
			return Err(EnvelopeError::Duplicate(envelope.message_id));
		}
		session_message(envelope)
	}
}

impl Default for EnvelopeDecoder {
	fn default() -> Self {
		Self::new(crate::dedupe::DEFAULT_DEDUPE_WINDOW, true)
	}
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
	value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn session_message(envelope: Envelope) -> Result<SessionMessage, EnvelopeError> {
	let payload = &envelope.payload;
	match envelope.message_type.as_str() {
		"session_welcome" => {
			let session_id = str_at(payload, "/session/id");
			if session_id.is_empty() {
				return Err(EnvelopeError::MissingField("payload.session.id"));
			}
			Ok(SessionMessage::Welcome {
				session_id: session_id.to_string(),
				keepalive_timeout_seconds: payload
					.pointer("/session/keepalive_timeout_seconds")
					.and_then(Value::as_u64),
			})
		}
		"session_keepalive" => Ok(SessionMessage::Keepalive),
		"notification" => Ok(SessionMessage::Notification(Event {
			id: str_at(payload, "/subscription/id").to_string(),
			r#type: str_at(payload, "/subscription/type").to_string(),
			data: payload.get("event").cloned().unwrap_or(Value::Null),
		})),
		"session_reconnect" => {
			let reconnect_url = str_at(payload, "/session/reconnect_url");
			if reconnect_url.is_empty() {
				return Err(EnvelopeError::MissingField("payload.session.reconnect_url"));
			}
			Ok(SessionMessage::Reconnect {
				session_id: str_at(payload, "/session/id").to_string(),
				reconnect_url: reconnect_url.to_string(),
			})
		}
		"revocation" => Ok(SessionMessage::Revocation(Revocation {
			id: str_at(payload, "/subscription/id").to_string(),
			status: str_at(payload, "/subscription/status").to_string(),
			r#type: str_at(payload, "/subscription/type").to_string(),
			version: str_at(payload, "/subscription/version").to_string(),
			condition: payload.pointer("/subscription/condition").cloned().unwrap_or(Value::Null),
		})),
		other => Err(EnvelopeError::UnknownType(other.to_string())),
	}
}
