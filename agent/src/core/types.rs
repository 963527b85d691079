//! Shared value types for the agent core.
//!
//! These types carry no I/O and are safe to construct in tests without any
//! endpoint or subprocess.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Parse a bare role name. Returns `None` for anything else.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "system" => Some(Role::System),
            "developer" => Some(Role::Developer),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    /// Author name, set on tool turns (e.g. `functions.execute_bash`).
    pub name: Option<String>,
    pub channel: Option<String>,
    pub recipient: Option<String>,
    pub content: Vec<String>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            name: None,
            channel: None,
            recipient: None,
            content: vec![content.into()],
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.content.push(segment.into());
        self
    }

    /// Content segments joined with a single space.
    pub fn flattened_text(&self) -> String {
        self.content.join(" ")
    }
}

/// Static definition of the single invocable capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// The shell tool advertised to the model.
    pub fn shell(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Execute bash commands to check files, directories, run commands, etc."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Bash command to execute (e.g., 'ls -la', 'cat file.txt')"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    /// Fully qualified recipient name used on the multi-channel wire.
    pub fn recipient(&self) -> String {
        format!("functions.{}", self.name)
    }
}

/// Which extraction path produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Endpoint-parsed `tool_calls` entry.
    StructuredToolCall,
    /// Reply content was itself a JSON object with `command`.
    JsonContent,
    /// Decoded message addressed to the shell tool.
    ChannelRecipient,
    /// Decoded message on a `bash`/`sh`/`shell`/`cmd` channel.
    ShellChannel,
    /// Last element of an analysis-channel `cmd` list.
    AnalysisCmdList,
    /// Raw shell text on the analysis channel.
    AnalysisRawText,
    /// Fenced blocks inside a decoded `final` message.
    FinalCodeBlock,
    /// Fenced blocks found by the plain-text scan.
    FallbackCodeBlock,
}

/// A command the sniffer decided to run, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCandidate {
    pub command: String,
    pub provenance: Provenance,
}

impl CommandCandidate {
    pub fn new(command: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            command: command.into(),
            provenance,
        }
    }
}

/// Exit code reported when the command timed out or never ran.
pub const FAILED_EXIT_CODE: i32 = -1;

/// Outcome of one shell execution. Failures are encoded here, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn completed(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
            timed_out: false,
        }
    }

    pub fn failed(description: impl std::fmt::Display) -> Self {
        Self {
            output: format!("Error: {description}"),
            exit_code: FAILED_EXIT_CODE,
            timed_out: false,
        }
    }

    pub fn timed_out(timeout_secs: u64) -> Self {
        Self {
            output: format!("Error: Command timed out after {timeout_secs} seconds"),
            exit_code: FAILED_EXIT_CODE,
            timed_out: true,
        }
    }
}

/// A function call already parsed out of the endpoint response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Either a JSON-encoded string or an already-decoded object.
    pub arguments: Value,
}

/// The parts of one model reply the loop and sniffer care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl ModelReply {
    /// Whether the endpoint reported normal completion.
    pub fn finished(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop")
    }

    /// Content if present, otherwise reasoning.
    pub fn answer_text(&self) -> &str {
        if self.content.is_empty() {
            &self.reasoning
        } else {
            &self.content
        }
    }
}
