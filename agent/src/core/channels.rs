//! Decoder seam for the multi-channel token protocol.
//!
//! A reply in this protocol is a sequence of messages, each with a header
//! (author, channel, recipient, constrain type) followed by a body:
//!
//! ```text
//! <|channel|>analysis<|message|>Need to list files.<|end|>
//! <|start|>assistant<|channel|>commentary to=functions.execute_bash <|constrain|>json<|message|>{"command":"ls"}<|call|>
//! ```
//!
//! The sniffer only depends on [`ChannelDecoder`]. [`TextChannelDecoder`]
//! reads the special tokens directly from their textual form.

use std::borrow::Cow;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::warn;

use crate::core::types::Role;

/// Token that ends a message addressed to a tool.
pub const CALL_MARKER: &str = "<|call|>";
/// Header marker that introduces a channel name.
pub const CHANNEL_MARKER: &str = "<|channel|>";
/// Occurrences of [`CALL_MARKER`] kept before decoding.
pub const MAX_CALL_MARKERS: usize = 10;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|(start|end|message|channel|constrain|return|call)\|>").unwrap()
});

/// One message recovered from the protocol stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedMessage {
    pub role: Option<Role>,
    /// Author name when it is not a bare role (e.g. `functions.execute_bash`).
    pub author: Option<String>,
    pub channel: Option<String>,
    pub recipient: Option<String>,
    pub content_type: Option<String>,
    pub content: Vec<String>,
}

impl DecodedMessage {
    /// Text segments joined in order.
    pub fn text(&self) -> String {
        self.content.concat()
    }
}

/// Turns raw reply text into decoded messages.
pub trait ChannelDecoder {
    fn decode(&self, text: &str) -> Result<Vec<DecodedMessage>>;
}

/// Cut `text` just before the `(MAX_CALL_MARKERS + 1)`-th call marker.
///
/// Guards against replies that repeat the call marker thousands of times.
pub fn truncate_call_loop(text: &str) -> Cow<'_, str> {
    match text.match_indices(CALL_MARKER).nth(MAX_CALL_MARKERS) {
        Some((cut, _)) => {
            let total = text.matches(CALL_MARKER).count();
            warn!(
                total,
                kept = MAX_CALL_MARKERS,
                "repeated call markers, truncating before decode"
            );
            Cow::Borrowed(&text[..cut])
        }
        None => Cow::Borrowed(text),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Start,
    End,
    Message,
    Channel,
    Constrain,
    Return,
    Call,
}

impl Token {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Token::Start),
            "end" => Some(Token::End),
            "message" => Some(Token::Message),
            "channel" => Some(Token::Channel),
            "constrain" => Some(Token::Constrain),
            "return" => Some(Token::Return),
            "call" => Some(Token::Call),
            _ => None,
        }
    }
}

/// Which header field the next plain-text run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderSlot {
    Leading,
    Author,
    Channel,
    Constrain,
}

#[derive(Debug)]
enum State {
    Header {
        slot: HeaderSlot,
        message: DecodedMessage,
        touched: bool,
    },
    Body(DecodedMessage),
}

impl State {
    fn fresh_header(slot: HeaderSlot) -> Self {
        State::Header {
            slot,
            message: DecodedMessage::default(),
            touched: false,
        }
    }
}

/// Lenient decoder over the textual special-token form.
///
/// Messages default to the assistant role (the reply is a completion). A body
/// left open at the end of input is kept. Errors on an unknown author after
/// `<|start|>`, on a header closed by a terminator before `<|message|>`, and on
/// header markers inside a body.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextChannelDecoder;

impl ChannelDecoder for TextChannelDecoder {
    fn decode(&self, text: &str) -> Result<Vec<DecodedMessage>> {
        let mut messages = Vec::new();
        let mut state = State::fresh_header(HeaderSlot::Leading);
        let mut last = 0;

        for caps in TOKEN_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let segment = &text[last..whole.start()];
            last = whole.end();
            absorb_text(&mut state, segment)?;

            let token = Token::from_name(&caps[1])
                .ok_or_else(|| anyhow::anyhow!("unknown special token {}", whole.as_str()))?;
            state = step(state, token, &mut messages)?;
        }
        absorb_text(&mut state, &text[last..])?;

        if let State::Body(message) = state {
            messages.push(finish(message));
        }
        Ok(messages)
    }
}

fn absorb_text(state: &mut State, segment: &str) -> Result<()> {
    match state {
        State::Body(message) => {
            if !segment.is_empty() {
                message.content.push(segment.to_string());
            }
        }
        State::Header {
            slot,
            message,
            touched,
        } => {
            if segment.trim().is_empty() {
                return Ok(());
            }
            if *slot == HeaderSlot::Leading {
                // Prose before the first header is dropped unless it is a bare
                // `assistant` / `to=...` prefix.
                parse_leading_text(segment, message);
                return Ok(());
            }
            parse_header_text(*slot, segment, message)?;
            *touched = true;
        }
    }
    Ok(())
}

fn parse_leading_text(segment: &str, message: &mut DecodedMessage) {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let all_header_words = words
        .iter()
        .all(|word| word.starts_with("to=") || Role::parse(word).is_some());
    if !all_header_words {
        return;
    }
    for word in words {
        if let Some(recipient) = word.strip_prefix("to=") {
            message.recipient = Some(recipient.to_string());
        } else {
            message.role = Role::parse(word);
        }
    }
}

fn parse_header_text(slot: HeaderSlot, segment: &str, message: &mut DecodedMessage) -> Result<()> {
    let mut words = segment.split_whitespace();
    match slot {
        HeaderSlot::Author => {
            if let Some(author) = words.next() {
                apply_author(author, message)?;
            }
        }
        HeaderSlot::Channel => {
            if let Some(channel) = words.next() {
                if let Some(recipient) = channel.strip_prefix("to=") {
                    message.recipient = Some(recipient.to_string());
                } else {
                    message.channel = Some(channel.to_string());
                }
            }
        }
        HeaderSlot::Constrain => {
            if let Some(kind) = words.next() {
                message.content_type = Some(kind.to_string());
            }
        }
        HeaderSlot::Leading => {}
    }
    for word in words {
        if let Some(recipient) = word.strip_prefix("to=") {
            message.recipient = Some(recipient.to_string());
        }
    }
    Ok(())
}

fn apply_author(author: &str, message: &mut DecodedMessage) -> Result<()> {
    if let Some(role) = Role::parse(author) {
        message.role = Some(role);
    } else if author.contains('.') {
        message.role = Some(Role::Tool);
        message.author = Some(author.to_string());
    } else {
        bail!("unknown message author {author:?}");
    }
    Ok(())
}

fn step(state: State, token: Token, messages: &mut Vec<DecodedMessage>) -> Result<State> {
    match state {
        State::Body(message) => match token {
            Token::End | Token::Call | Token::Return => {
                messages.push(finish(message));
                Ok(State::fresh_header(HeaderSlot::Leading))
            }
            Token::Start => {
                messages.push(finish(message));
                Ok(State::fresh_header(HeaderSlot::Author))
            }
            Token::Channel | Token::Constrain | Token::Message => {
                bail!("header marker {token:?} inside message body")
            }
        },
        State::Header {
            slot,
            message,
            touched,
        } => match token {
            Token::Message => Ok(State::Body(message)),
            Token::Channel => Ok(State::Header {
                slot: HeaderSlot::Channel,
                message,
                touched: true,
            }),
            Token::Constrain => Ok(State::Header {
                slot: HeaderSlot::Constrain,
                message,
                touched: true,
            }),
            Token::Start => {
                if touched {
                    bail!("message header opened again before <|message|>");
                }
                Ok(State::fresh_header(HeaderSlot::Author))
            }
            Token::End | Token::Call | Token::Return => {
                if touched || slot != HeaderSlot::Leading {
                    bail!("message header closed before <|message|>");
                }
                // Stray terminators between messages (e.g. repeated call markers).
                Ok(State::fresh_header(HeaderSlot::Leading))
            }
        },
    }
}

fn finish(mut message: DecodedMessage) -> DecodedMessage {
    if message.role.is_none() {
        message.role = Some(Role::Assistant);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Vec<DecodedMessage> {
        TextChannelDecoder.decode(text).expect("decode")
    }

    #[test]
    fn decodes_channel_and_recipient_headers() {
        let text = "<|channel|>analysis<|message|>Need to list files.<|end|>\
                    <|start|>assistant<|channel|>commentary to=functions.execute_bash <|constrain|>json<|message|>{\"command\":\"ls\"}<|call|>";
        let messages = decode(text);
        assert_eq!(messages.len(), 2);

        assert_eq!(messages[0].channel.as_deref(), Some("analysis"));
        assert_eq!(messages[0].text(), "Need to list files.");
        assert_eq!(messages[0].role, Some(Role::Assistant));

        assert_eq!(messages[1].channel.as_deref(), Some("commentary"));
        assert_eq!(
            messages[1].recipient.as_deref(),
            Some("functions.execute_bash")
        );
        assert_eq!(messages[1].content_type.as_deref(), Some("json"));
        assert_eq!(messages[1].text(), "{\"command\":\"ls\"}");
    }

    #[test]
    fn recipient_may_precede_channel() {
        let messages = decode(
            "<|start|>assistant to=functions.execute_bash<|channel|>commentary<|message|>{}<|call|>",
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].recipient.as_deref(),
            Some("functions.execute_bash")
        );
        assert_eq!(messages[0].channel.as_deref(), Some("commentary"));
    }

    #[test]
    fn tool_author_is_tool_role() {
        let messages = decode(
            "<|start|>functions.execute_bash to=assistant<|channel|>commentary<|message|>ok<|end|>",
        );
        assert_eq!(messages[0].role, Some(Role::Tool));
        assert_eq!(messages[0].author.as_deref(), Some("functions.execute_bash"));
        assert_eq!(messages[0].recipient.as_deref(), Some("assistant"));
    }

    #[test]
    fn unterminated_body_is_kept() {
        let messages = decode("<|channel|>final<|message|>All done");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "All done");
    }

    #[test]
    fn leading_prose_is_dropped() {
        let messages = decode(
            "Let me check.\n<|start|>assistant<|channel|>final<|message|>Done.<|return|>",
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "Done.");
    }

    #[test]
    fn plain_text_decodes_to_nothing() {
        assert!(decode("just some prose about execute_bash").is_empty());
    }

    #[test]
    fn stray_call_markers_between_messages_are_ignored() {
        let text = format!(
            "<|channel|>commentary to=functions.execute_bash<|message|>{{}}{}",
            CALL_MARKER.repeat(5)
        );
        assert_eq!(decode(&text).len(), 1);
    }

    #[test]
    fn unknown_author_is_an_error() {
        let err = TextChannelDecoder
            .decode("<|start|>wizard<|message|>hi<|end|>")
            .unwrap_err();
        assert!(err.to_string().contains("unknown message author"));
    }

    #[test]
    fn header_marker_inside_body_is_an_error() {
        let err = TextChannelDecoder
            .decode("<|channel|>analysis<|message|>a<|channel|>b")
            .unwrap_err();
        assert!(err.to_string().contains("inside message body"));
    }

    #[test]
    fn header_closed_early_is_an_error() {
        assert!(TextChannelDecoder.decode("<|channel|>analysis<|end|>").is_err());
    }

    #[test]
    fn truncates_to_ten_call_markers() {
        let text = format!("<|channel|>analysis<|message|>x{}", CALL_MARKER.repeat(50));
        let truncated = truncate_call_loop(&text);
        assert_eq!(truncated.matches(CALL_MARKER).count(), MAX_CALL_MARKERS);
        assert!(truncated.ends_with(CALL_MARKER));
        assert!(text.starts_with(truncated.as_ref()));
    }

    #[test]
    fn short_input_is_not_truncated() {
        let text = format!("a{}b", CALL_MARKER.repeat(MAX_CALL_MARKERS));
        assert_eq!(truncate_call_loop(&text), text.as_str());
    }
}
