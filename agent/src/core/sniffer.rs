//! Command sniffing: pick at most one shell command out of a model reply.
//!
//! Extraction paths are tried in a fixed priority order and the first match
//! wins:
//!
//! 1. structured tool calls parsed by the endpoint,
//! 2. reply content that is itself a JSON object with `command`,
//! 3. messages decoded from the multi-channel protocol,
//! 4. fenced bash/sh/shell blocks in the plain text, only when the decoder is
//!    missing or could not decode the reply.
//!
//! Every path reports a [`PathOutcome`]. `Empty` from the decoder path is a
//! final answer and stops the search; `Undecoded` lets the plain-text scan run.

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::channels::{CHANNEL_MARKER, ChannelDecoder, DecodedMessage, truncate_call_loop};
use crate::core::heuristics::{
    fenced_shell_blocks, looks_like_hdl, looks_like_shell_command, strip_protocol_markers,
};
use crate::core::types::{CommandCandidate, ModelReply, Provenance, ToolCall};

const SHELL_CHANNELS: &[&str] = &["bash", "sh", "shell", "cmd"];

/// Result of one extraction path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    /// The path produced a command.
    Matched(CommandCandidate),
    /// The path understood the input and found no command.
    Empty,
    /// The path could not interpret the input at all.
    Undecoded,
}

/// Extracts commands from model replies.
///
/// Owns the decoder handle; construct one per agent loop.
pub struct Sniffer {
    tool_name: String,
    decoder: Option<Box<dyn ChannelDecoder>>,
}

impl Sniffer {
    pub fn new(tool_name: impl Into<String>, decoder: Option<Box<dyn ChannelDecoder>>) -> Self {
        Self {
            tool_name: tool_name.into(),
            decoder,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Return the command to run for `reply`, or `None` for a final answer.
    pub fn sniff(&self, reply: &ModelReply) -> Option<CommandCandidate> {
        if let Some(candidate) = self.from_tool_calls(&reply.tool_calls) {
            return Some(candidate);
        }
        if let Some(candidate) = from_json_content(&reply.content) {
            return Some(candidate);
        }

        let full_text = format!("{}\n{}", reply.reasoning, reply.content);
        let full_text = full_text.trim();
        if full_text.is_empty() {
            return None;
        }

        match self.decoder.as_deref() {
            Some(decoder) => {
                if !self.mentions_protocol(full_text) {
                    debug!("no tool or channel markers in reply");
                    return None;
                }
                match self.from_channels(decoder, full_text) {
                    PathOutcome::Matched(candidate) => Some(candidate),
                    PathOutcome::Empty => {
                        debug!("decoded messages contain no command");
                        None
                    }
                    PathOutcome::Undecoded => from_plain_text(full_text),
                }
            }
            None => from_plain_text(full_text),
        }
    }

    /// Whether `name` (a function name or recipient) refers to the shell tool.
    pub fn refers_to_shell(&self, name: &str) -> bool {
        name.contains(self.tool_name.as_str()) || name.contains("bash") || name.contains("shell")
    }

    fn mentions_protocol(&self, text: &str) -> bool {
        text.contains(self.tool_name.as_str()) || text.contains(CHANNEL_MARKER)
    }

    /// First shell call with a non-empty `command` wins; later calls are ignored.
    fn from_tool_calls(&self, calls: &[ToolCall]) -> Option<CommandCandidate> {
        for call in calls {
            if !self.refers_to_shell(&call.name) {
                continue;
            }
            let command = match &call.arguments {
                Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                    Ok(args) => command_field(&args),
                    Err(err) => {
                        debug!(err = %err, "malformed tool call arguments");
                        None
                    }
                },
                args => command_field(args),
            };
            if let Some(command) = command {
                debug!(command = %preview(&command), "command from structured tool call");
                return Some(CommandCandidate::new(command, Provenance::StructuredToolCall));
            }
        }
        None
    }

    /// Decode the reply and inspect each message in order.
    pub fn from_channels(&self, decoder: &dyn ChannelDecoder, text: &str) -> PathOutcome {
        let text = truncate_call_loop(text);
        let messages = match decoder.decode(&text) {
            Ok(messages) => messages,
            Err(err) => {
                debug!(err = %err, "channel decode failed");
                return PathOutcome::Undecoded;
            }
        };

        let mut rejected = false;
        for message in &messages {
            match self.from_message(message) {
                MessageOutcome::Command(candidate) => return PathOutcome::Matched(candidate),
                MessageOutcome::Rejected => rejected = true,
                MessageOutcome::Nothing => {}
            }
        }

        if messages.is_empty() && !rejected {
            PathOutcome::Undecoded
        } else {
            PathOutcome::Empty
        }
    }

    fn from_message(&self, message: &DecodedMessage) -> MessageOutcome {
        if let Some(recipient) = message.recipient.as_deref()
            && self.refers_to_shell(recipient)
        {
            let text = message.text();
            match serde_json::from_str::<Value>(text.trim()) {
                Ok(args) => {
                    if let Some(command) = command_field(&args) {
                        return MessageOutcome::Command(CommandCandidate::new(
                            command,
                            Provenance::ChannelRecipient,
                        ));
                    }
                }
                Err(err) => debug!(err = %err, recipient, "tool message is not JSON"),
            }
        }

        let Some(channel) = message.channel.as_deref() else {
            return MessageOutcome::Nothing;
        };

        if SHELL_CHANNELS.contains(&channel) {
            return message
                .content
                .iter()
                .map(|segment| segment.trim())
                .find(|segment| !segment.is_empty())
                .map_or(MessageOutcome::Nothing, |command| {
                    debug!(channel, command = %preview(command), "command from shell channel");
                    MessageOutcome::Command(CommandCandidate::new(command, Provenance::ShellChannel))
                });
        }

        match channel {
            "analysis" => from_analysis(message),
            "final" => {
                for segment in &message.content {
                    if let Some(command) = fenced_shell_blocks(segment) {
                        debug!(command = %preview(&command), "command from final channel code blocks");
                        return MessageOutcome::Command(CommandCandidate::new(
                            command,
                            Provenance::FinalCodeBlock,
                        ));
                    }
                }
                MessageOutcome::Nothing
            }
            _ => MessageOutcome::Nothing,
        }
    }
}

/// What one decoded message contributed.
enum MessageOutcome {
    Command(CommandCandidate),
    /// A command-shaped payload was refused by the HDL guard.
    Rejected,
    Nothing,
}

fn from_analysis(message: &DecodedMessage) -> MessageOutcome {
    for segment in &message.content {
        match serde_json::from_str::<Value>(segment) {
            Ok(data) => {
                let Some(last) = data
                    .get("cmd")
                    .and_then(Value::as_array)
                    .and_then(|list| list.last())
                else {
                    continue;
                };
                let Some(command) = last.as_str() else {
                    continue;
                };
                if looks_like_hdl(command) {
                    warn!(command = %preview(command), "ignored HDL code in JSON command");
                    return MessageOutcome::Rejected;
                }
                debug!(command = %preview(command), "command from analysis cmd list");
                return MessageOutcome::Command(CommandCandidate::new(
                    command,
                    Provenance::AnalysisCmdList,
                ));
            }
            Err(_) => {
                let raw = segment.trim();
                if !looks_like_shell_command(raw) {
                    continue;
                }
                if looks_like_hdl(raw) {
                    warn!(command = %preview(raw), "ignored HDL code in analysis text");
                    return MessageOutcome::Rejected;
                }
                debug!(command = %preview(raw), "raw command from analysis channel");
                return MessageOutcome::Command(CommandCandidate::new(
                    raw,
                    Provenance::AnalysisRawText,
                ));
            }
        }
    }
    MessageOutcome::Nothing
}

/// The reply content is a JSON object carrying `command`.
fn from_json_content(content: &str) -> Option<CommandCandidate> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value = serde_json::from_str::<Value>(trimmed).ok()?;
    let command = command_field(&value)?;
    debug!(command = %preview(&command), "command from JSON content");
    Some(CommandCandidate::new(command, Provenance::JsonContent))
}

fn from_plain_text(text: &str) -> Option<CommandCandidate> {
    let stripped = strip_protocol_markers(text);
    if stripped.is_empty() {
        return None;
    }
    match fenced_shell_blocks(&stripped) {
        Some(command) => {
            debug!(command = %preview(&command), "command from fenced code blocks");
            Some(CommandCandidate::new(command, Provenance::FallbackCodeBlock))
        }
        None => {
            debug!(text = %preview(&stripped), "no command found in plain text");
            None
        }
    }
}

/// Non-empty string `command` field of a JSON object.
fn command_field(value: &Value) -> Option<String> {
    value
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string)
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channels::{CALL_MARKER, TextChannelDecoder};
    use anyhow::{Result, anyhow};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sniffer() -> Sniffer {
        Sniffer::new("execute_bash", Some(Box::new(TextChannelDecoder)))
    }

    fn content(text: &str) -> ModelReply {
        ModelReply {
            content: text.to_string(),
            ..ModelReply::default()
        }
    }

    fn tool_call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    /// Records every decode call and returns a fixed result.
    struct RecordingDecoder {
        calls: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl ChannelDecoder for RecordingDecoder {
        fn decode(&self, text: &str) -> Result<Vec<DecodedMessage>> {
            self.calls.borrow_mut().push(text.to_string());
            if self.fail {
                Err(anyhow!("tokenizer exploded"))
            } else {
                TextChannelDecoder.decode(text)
            }
        }
    }

    fn recording(fail: bool) -> (Sniffer, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let decoder = RecordingDecoder {
            calls: calls.clone(),
            fail,
        };
        (Sniffer::new("execute_bash", Some(Box::new(decoder))), calls)
    }

    #[test]
    fn structured_tool_call_wins_without_decoding() {
        let (sniffer, calls) = recording(false);
        let reply = ModelReply {
            content: "<|channel|>final<|message|>```bash\nrm -rf /tmp/x\n```".to_string(),
            tool_calls: vec![tool_call(
                "execute_bash",
                Value::String(r#"{"command": "ls -la"}"#.to_string()),
            )],
            ..ModelReply::default()
        };

        let got = sniffer.sniff(&reply).expect("command");
        assert_eq!(got.command, "ls -la");
        assert_eq!(got.provenance, Provenance::StructuredToolCall);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn structured_tool_call_accepts_object_arguments() {
        let reply = ModelReply {
            tool_calls: vec![tool_call(
                "functions.execute_bash",
                serde_json::json!({"command": "pwd"}),
            )],
            ..ModelReply::default()
        };
        assert_eq!(sniffer().sniff(&reply).expect("command").command, "pwd");
    }

    #[test]
    fn first_shell_call_with_command_wins() {
        let reply = ModelReply {
            tool_calls: vec![
                tool_call("execute_bash", serde_json::json!({"command": "  "})),
                tool_call("execute_bash", serde_json::json!({"command": "ls"})),
                tool_call("execute_bash", serde_json::json!({"command": "rm -rf build"})),
            ],
            ..ModelReply::default()
        };
        assert_eq!(sniffer().sniff(&reply).expect("command").command, "ls");
    }

    #[test]
    fn malformed_tool_call_falls_through() {
        let reply = ModelReply {
            content: r#"{"command": "whoami"}"#.to_string(),
            tool_calls: vec![tool_call(
                "execute_bash",
                Value::String("{not json".to_string()),
            )],
            ..ModelReply::default()
        };
        let got = sniffer().sniff(&reply).expect("command");
        assert_eq!(got.command, "whoami");
        assert_eq!(got.provenance, Provenance::JsonContent);
    }

    #[test]
    fn unrelated_tool_call_is_ignored() {
        let reply = ModelReply {
            tool_calls: vec![tool_call(
                "web_search",
                serde_json::json!({"command": "ls"}),
            )],
            ..ModelReply::default()
        };
        assert_eq!(sniffer().sniff(&reply), None);
    }

    #[test]
    fn bare_json_content() {
        let got = sniffer()
            .sniff(&content("  {\"command\": \"du -sh .\"}\n"))
            .expect("command");
        assert_eq!(got.command, "du -sh .");
    }

    #[test]
    fn plain_prose_is_a_final_answer() {
        let (sniffer, calls) = recording(false);
        let reply = ModelReply {
            content: "There are three folders: src, tests and docs.".to_string(),
            reasoning: "The listing showed three directories.".to_string(),
            ..ModelReply::default()
        };
        assert_eq!(sniffer.sniff(&reply), None);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn recipient_message_carries_json_command() {
        let reply = content(
            "<|channel|>commentary to=functions.execute_bash <|constrain|>json<|message|>{\"command\":\"ls\"}<|call|>",
        );
        let got = sniffer().sniff(&reply).expect("command");
        assert_eq!(got.command, "ls");
        assert_eq!(got.provenance, Provenance::ChannelRecipient);
    }

    #[test]
    fn reasoning_and_content_are_decoded_together() {
        let reply = ModelReply {
            reasoning: "<|channel|>analysis<|message|>Need to check disk usage.<|end|>".to_string(),
            content: "<|start|>assistant<|channel|>commentary to=functions.execute_bash<|message|>{\"command\":\"df -h\"}<|call|>".to_string(),
            ..ModelReply::default()
        };
        assert_eq!(sniffer().sniff(&reply).expect("command").command, "df -h");
    }

    #[test]
    fn shell_channel_text_is_the_command() {
        let got = sniffer()
            .sniff(&content("<|channel|>bash<|message|>  cat README.md \n<|end|>"))
            .expect("command");
        assert_eq!(got.command, "cat README.md");
        assert_eq!(got.provenance, Provenance::ShellChannel);
    }

    #[test]
    fn analysis_cmd_list_takes_last_element() {
        let got = sniffer()
            .sniff(&content(
                r#"<|channel|>analysis<|message|>{"cmd": ["ls", "ls -la"]}<|end|>"#,
            ))
            .expect("command");
        assert_eq!(got.command, "ls -la");
        assert_eq!(got.provenance, Provenance::AnalysisCmdList);
    }

    #[test]
    fn hdl_in_cmd_list_is_rejected() {
        let (sniffer, calls) = recording(false);
        let text = r#"<|channel|>analysis<|message|>{"cmd": ["bash", "module top(input clk); always @(posedge clk) begin end endmodule"]}<|end|>"#;
        assert_eq!(sniffer.sniff(&content(text)), None);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(
            sniffer.from_channels(&TextChannelDecoder, text),
            PathOutcome::Empty
        );
    }

    #[test]
    fn hdl_rejection_does_not_reach_plain_text_scan() {
        let text = "<|channel|>analysis<|message|>{\"cmd\": [\"endmodule\"]}<|end|>\n```bash\nls\n```";
        assert_eq!(sniffer().sniff(&content(text)), None);
    }

    #[test]
    fn analysis_raw_shell_text() {
        let got = sniffer()
            .sniff(&content(
                "<|channel|>analysis<|message|>bash -lc \"ls -la\"<|end|>",
            ))
            .expect("command");
        assert_eq!(got.command, "bash -lc \"ls -la\"");
        assert_eq!(got.provenance, Provenance::AnalysisRawText);
    }

    #[test]
    fn analysis_prose_is_not_a_command() {
        let reply = content("<|channel|>analysis<|message|>We should look at the files.<|end|>");
        assert_eq!(sniffer().sniff(&reply), None);
    }

    #[test]
    fn final_channel_blocks_are_joined() {
        let got = sniffer()
            .sniff(&content(
                "<|channel|>final<|message|>Run these:\n```bash\necho a\n```\nand\n```bash\necho b\n```<|return|>",
            ))
            .expect("command");
        assert_eq!(got.command, "echo a\necho b");
        assert_eq!(got.provenance, Provenance::FinalCodeBlock);
    }

    #[test]
    fn decoded_but_empty_does_not_fall_back() {
        // The stray fence after the decoded message would match the plain-text
        // scan, but a successful decode with no command is a final answer.
        let text = "<|channel|>final<|message|>All done.<|end|>\n```bash\nrm -rf build\n```";
        let messages = TextChannelDecoder.decode(text).expect("decode");
        assert_eq!(messages.len(), 1);
        assert_eq!(sniffer().sniff(&content(text)), None);
    }

    #[test]
    fn decode_failure_falls_back_to_code_blocks() {
        let (sniffer, calls) = recording(true);
        let text = "I will use execute_bash:\n```bash\nls -la\n```";
        let got = sniffer.sniff(&content(text)).expect("command");
        assert_eq!(got.command, "ls -la");
        assert_eq!(got.provenance, Provenance::FallbackCodeBlock);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn nothing_decoded_falls_back_to_code_blocks() {
        let text = "Calling execute_bash now.\n```sh\nwc -l README.md\n```";
        let got = sniffer().sniff(&content(text)).expect("command");
        assert_eq!(got.command, "wc -l README.md");
        assert_eq!(got.provenance, Provenance::FallbackCodeBlock);
    }

    #[test]
    fn without_decoder_only_code_blocks_count() {
        let sniffer = Sniffer::new("execute_bash", None);
        let got = sniffer
            .sniff(&content(
                "<|channel|>final<|message|>```bash\necho hi\n```<|end|>",
            ))
            .expect("command");
        assert_eq!(got.command, "echo hi");
        assert_eq!(got.provenance, Provenance::FallbackCodeBlock);

        assert_eq!(sniffer.sniff(&content("run `ls` to see files")), None);
    }

    #[test]
    fn call_marker_loop_is_truncated_before_decode() {
        let (sniffer, calls) = recording(false);
        let text = format!(
            "<|channel|>commentary to=functions.execute_bash<|message|>{{\"command\":\"ls\"}}{}",
            CALL_MARKER.repeat(50)
        );
        let got = sniffer.sniff(&content(&text)).expect("command");
        assert_eq!(got.command, "ls");
        let seen = calls.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].matches(CALL_MARKER).count(), 10);
    }

    #[test]
    fn empty_reply_is_no_command() {
        assert_eq!(sniffer().sniff(&ModelReply::default()), None);
    }
}
