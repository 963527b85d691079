//! Scripted model and shell doubles for loop tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::core::conversation::Conversation;
use crate::core::types::{ExecutionResult, ModelReply, Role, ToolCall};
use crate::io::model::ModelClient;
use crate::io::shell::ShellRunner;

/// One scripted endpoint response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Reply(ModelReply),
    Error(String),
}

/// Model double that replays responses in order and records every request.
///
/// Running out of responses is reported as an endpoint error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<ScriptedResponse>>,
    requests: RefCell<Vec<Vec<(Role, String)>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self::with_responses(replies.into_iter().map(ScriptedResponse::Reply).collect())
    }

    pub fn with_responses(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Flattened conversations sent so far, one per call.
    pub fn requests(&self) -> Vec<Vec<(Role, String)>> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, conversation: &Conversation) -> Result<ModelReply> {
        self.requests.borrow_mut().push(conversation.flattened());
        match self.responses.borrow_mut().pop_front() {
            Some(ScriptedResponse::Reply(reply)) => Ok(reply),
            Some(ScriptedResponse::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model has no responses left")),
        }
    }
}

/// Shell double that records commands and returns canned results.
///
/// Once the script is exhausted every command exits 0 with empty output.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    results: RefCell<VecDeque<ExecutionResult>>,
    calls: RefCell<Vec<(String, PathBuf)>>,
}

impl ScriptedShell {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.calls.borrow().iter().map(|(_, dir)| dir.clone()).collect()
    }
}

impl ShellRunner for ScriptedShell {
    fn execute(&self, command: &str, workdir: &Path) -> ExecutionResult {
        self.calls
            .borrow_mut()
            .push((command.to_string(), workdir.to_path_buf()));
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::completed("", 0))
    }
}

/// Reply carrying a structured `execute_bash` tool call.
pub fn command_reply(command: &str) -> ModelReply {
    ModelReply {
        tool_calls: vec![ToolCall {
            name: "execute_bash".to_string(),
            arguments: json!({ "command": command }),
        }],
        finish_reason: Some("tool_calls".to_string()),
        ..ModelReply::default()
    }
}

/// Plain-text reply with the given finish reason.
pub fn final_reply(content: &str, finish_reason: &str) -> ModelReply {
    ModelReply {
        content: content.to_string(),
        finish_reason: Some(finish_reason.to_string()),
        ..ModelReply::default()
    }
}

/// Reply whose content is raw channel-token text.
pub fn channel_reply(content: &str) -> ModelReply {
    final_reply(content, "stop")
}
