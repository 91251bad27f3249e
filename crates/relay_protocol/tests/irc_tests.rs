use proptest::prelude::*;
use relay_protocol::{IrcParseError, Parameters, TagValue, decode_irc_frame, parse_irc_line};

#[test]
fn decodes_privmsg_with_tags_and_source() {
	let raw = "@badge-info=;badges=broadcaster/1;color=#FF0000;display-name=foo :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :hello world\r\n";
	let msgs = decode_irc_frame(raw);

	assert_eq!(msgs.len(), 1);
	let msg = &msgs[0];
	assert_eq!(msg.source.nick, "foo");
	assert_eq!(msg.source.host, "foo@foo.tmi.twitch.tv");
	assert_eq!(msg.command.command, "PRIVMSG");
	assert_eq!(msg.command.parameters, "#bar");
	assert_eq!(msg.message, "hello world");

	match msg.tag("badges") {
		Some(TagValue::Badges(map)) => {
			assert_eq!(map.len(), 1);
			assert_eq!(map.get("broadcaster").map(String::as_str), Some("1"));
		}
		other => panic!("unexpected badges tag: {other:?}"),
	}
	// Empty values are not kept.
	assert!(msg.tag("badge-info").is_none());
	assert_eq!(msg.color(), Some("#FF0000"));
	assert_eq!(msg.display_name(), Some("foo"));
	assert_eq!(msg.channel(), Some("bar"));
}

#[test]
fn discards_line_with_empty_command() {
	assert!(decode_irc_frame("@badges=broadcaster/1 :foo!foo@host \r\n").is_empty());
	assert!(decode_irc_frame(":foo!foo@host").is_empty());
	assert_eq!(parse_irc_line(":tmi.twitch.tv :trailing"), Err(IrcParseError::EmptyCommand));
}

#[test]
fn skips_blank_lines_and_handles_multiple_messages() {
	let raw = "\r\n:tmi.twitch.tv 001 bot :Welcome, GLHF!\r\n   \r\nPING :tmi.twitch.tv\r\n\r\n";
	let msgs = decode_irc_frame(raw);

	assert_eq!(msgs.len(), 2);
	assert_eq!(msgs[0].command.command, "001");
	assert_eq!(msgs[0].command.parameters, "bot");
	assert_eq!(msgs[0].source.nick, "");
	assert_eq!(msgs[0].source.host, "tmi.twitch.tv");
	assert_eq!(msgs[1].command.command, "PING");
	assert_eq!(msgs[1].command.parameters, "tmi.twitch.tv");
}

#[test]
fn payload_without_delimiter_is_one_message() {
	let msgs = decode_irc_frame(":bot!bot@bot.tmi.twitch.tv JOIN #chan");
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].command.command, "JOIN");
	assert_eq!(msgs[0].channel(), Some("chan"));
}

#[test]
fn cap_ack_is_a_flag() {
	let msg = parse_irc_line(":tmi.twitch.tv CAP * ACK :twitch.tv/membership twitch.tv/tags").unwrap();
	assert_eq!(msg.command.parameters, Parameters::Flag(true));

	let msg = parse_irc_line(":tmi.twitch.tv CAP * NAK :twitch.tv/unknown").unwrap();
	assert_eq!(msg.command.parameters.as_flag(), Some(false));
}

#[test]
fn names_list_is_a_list() {
	let msg = parse_irc_line(":bot.tmi.twitch.tv 353 bot = #chan :alice bob carol").unwrap();
	assert_eq!(
		msg.command.parameters.as_list(),
		Some(&["alice".to_string(), "bob".to_string(), "carol".to_string()][..])
	);
}

#[test]
fn unsupported_command_is_discarded() {
	assert_eq!(
		parse_irc_line(":tmi.twitch.tv 421 bot WHO :Unknown command"),
		Err(IrcParseError::Unsupported("421".to_string()))
	);
	assert!(decode_irc_frame(":tmi.twitch.tv 421 bot WHO :Unknown command\r\n").is_empty());
}

#[test]
fn unknown_command_is_kept_without_parameters() {
	let msg = parse_irc_line(":tmi.twitch.tv FOOBAR #chan :x").unwrap();
	assert_eq!(msg.command.command, "FOOBAR");
	assert_eq!(msg.command.parameters, Parameters::None);
	assert_eq!(msg.message, "x");
}

#[test]
fn parses_emotes_and_emote_sets() {
	let msg = parse_irc_line("@emotes=25:0-4,12-16/1902:6-10;emote-sets=0,33,50 :a!a@a PRIVMSG #c :Kappa Keepo Kappa").unwrap();

	match msg.tag("emotes") {
		Some(TagValue::Emotes(map)) => {
			assert_eq!(map.get("25"), Some(&vec![(0, 4), (12, 16)]));
			assert_eq!(map.get("1902"), Some(&vec![(6, 10)]));
		}
		other => panic!("unexpected emotes tag: {other:?}"),
	}
	assert_eq!(
		msg.tag("emote-sets"),
		Some(&TagValue::EmoteSets(vec!["0".into(), "33".into(), "50".into()]))
	);
}

#[test]
fn drops_ignored_tags() {
	let msg = parse_irc_line("@client-nonce=abc;flags=0-5:S.5;id=123 :a!a@a PRIVMSG #c :hi").unwrap();
	assert!(msg.tag("client-nonce").is_none());
	assert!(msg.tag("flags").is_none());
	assert_eq!(msg.id(), Some("123"));
}

#[test]
fn typed_accessors() {
	let raw = "@badges=subscriber/0,vip/1;bits=100;first-msg=1;mod=0;subscriber=1;turbo=0;vip=1;emote-only=1;\
	           tmi-sent-ts=1700000000000;user-id=42;user-type=mod;reply-parent-msg-id=p1;reply-parent-msg-body=hey;\
	           reply-parent-user-login=alice :b!b@b PRIVMSG #c :@alice hey";
	let msg = parse_irc_line(raw).unwrap();

	assert_eq!(msg.bits(), Some(100));
	assert!(msg.is_first_message());
	assert!(!msg.is_mod());
	assert!(msg.is_subscriber());
	assert!(!msg.is_turbo());
	assert!(msg.is_vip());
	assert!(msg.is_emote_only());
	assert_eq!(msg.sent_at_ms(), Some(1_700_000_000_000));
	assert_eq!(msg.user_id(), Some("42"));
	assert_eq!(msg.user_type(), Some("mod"));

	let badges = msg.badges();
	assert_eq!(badges.len(), 2);
	let sub = badges.iter().find(|b| b.name == "subscriber").unwrap();
	assert!(!sub.enabled);
	let vip = badges.iter().find(|b| b.name == "vip").unwrap();
	assert!(vip.enabled);

	let parent = msg.reply_parent().unwrap();
	assert_eq!(parent.message_id, "p1");
	assert_eq!(parent.body, "hey");
	assert_eq!(parent.user_login, "alice");
	assert_eq!(parent.display_name, "");
}

#[test]
fn trailing_text_keeps_later_colons() {
	let msg = parse_irc_line(":a!a@a PRIVMSG #c :time is 12:30").unwrap();
	assert_eq!(msg.message, "time is 12:30");
}

proptest! {
	#[test]
	fn arbitrary_input_never_yields_empty_command(input in ".{0,200}") {
		for msg in decode_irc_frame(&input) {
			prop_assert!(!msg.command.command.is_empty());
		}
	}

	#[test]
	fn privmsg_text_survives(channel in "[a-z0-9_]{1,25}", text in "[^\r\n]{0,100}") {
		let raw = format!(":u!u@u.tmi.twitch.tv PRIVMSG #{channel} :{text}\r\n");
		let msgs = decode_irc_frame(&raw);
		prop_assert_eq!(msgs.len(), 1);
		prop_assert_eq!(msgs[0].channel(), Some(channel.as_str()));
		prop_assert_eq!(&msgs[0].message, &text);
	}
}
