#![forbid(unsafe_code)]

pub mod dedupe;
pub mod eventsub;
pub mod irc;

pub use dedupe::{DEFAULT_DEDUPE_WINDOW, DedupeWindow};
pub use eventsub::{
	Envelope, EnvelopeDecoder, EnvelopeError, Event, Revocation, SessionMessage, check_timestamp, parse_envelope,
};
pub use irc::{
	Badge, Command, IrcMessage, IrcParseError, Parameters, ReplyParent, Source, TagValue, decode_irc_frame,
	parse_irc_line,
};

/// Wire-level constants shared by the chat and EventSub decoders.
pub mod wire {
	/// Line delimiter for IRC-over-WebSocket frames.
	pub const IRC_LINE_DELIMITER: &str = "\r\n";

	/// Oldest accepted EventSub message age.
	pub const MAX_MESSAGE_AGE_MINUTES: i64 = 10;
	/// Tolerated clock drift for EventSub timestamps from the future.
	pub const MAX_CLOCK_DRIFT_MINUTES: i64 = 1;
}
