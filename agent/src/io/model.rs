//! Chat-completions client for the model endpoint.
//!
//! The [`ModelClient`] trait is the seam between the agent loop and the
//! network. [`HttpModelClient`] talks to an OpenAI-compatible
//! `/v1/chat/completions` route with a blocking `reqwest` client.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::conversation::Conversation;
use crate::core::types::{ModelReply, ToolCall};
use crate::io::config::{AgentConfig, EndpointConfig};

/// Failure talking to the model endpoint. Fatal to the current task.
#[derive(Debug)]
pub enum EndpointError {
    Request(reqwest::Error),
    Status { status: u16, body: String },
    Parse(serde_json::Error),
    EmptyChoices,
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::Request(e) => write!(f, "request error: {e}"),
            EndpointError::Status { status, body } => {
                write!(f, "endpoint returned status {status}: {body}")
            }
            EndpointError::Parse(e) => write!(f, "parse error: {e}"),
            EndpointError::EmptyChoices => write!(f, "no response from model (empty choices)"),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EndpointError::Request(e) => Some(e),
            EndpointError::Parse(e) => Some(e),
            EndpointError::Status { .. } | EndpointError::EmptyChoices => None,
        }
    }
}

impl From<reqwest::Error> for EndpointError {
    fn from(e: reqwest::Error) -> Self {
        EndpointError::Request(e)
    }
}

impl From<serde_json::Error> for EndpointError {
    fn from(e: serde_json::Error) -> Self {
        EndpointError::Parse(e)
    }
}

/// Sends the whole conversation and returns the first choice.
pub trait ModelClient {
    fn complete(&self, conversation: &Conversation) -> Result<ModelReply>;
}

/// One `{role, content}` entry of the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(config: &AgentConfig, conversation: &Conversation) -> Self {
        Self {
            model: config.model.clone(),
            messages: conversation
                .flattened()
                .into_iter()
                .map(|(role, content)| ChatMessage {
                    role: role.as_str().to_string(),
                    content,
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    function: Option<ResponseFunction>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Parse a chat-completions response body into the first choice.
pub fn parse_reply(body: &str) -> Result<ModelReply, EndpointError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(EndpointError::EmptyChoices)?;
    let message = choice.message;
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| call.function)
        .map(|function| ToolCall {
            name: function.name,
            arguments: function.arguments,
        })
        .collect();
    Ok(ModelReply {
        content: message.content.unwrap_or_default(),
        reasoning: message
            .reasoning_content
            .or(message.reasoning)
            .unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

/// Blocking HTTP client for the chat-completions endpoint.
pub struct HttpModelClient {
    endpoint: EndpointConfig,
    config: AgentConfig,
    client: reqwest::blocking::Client,
}

impl HttpModelClient {
    pub fn new(endpoint: EndpointConfig, config: AgentConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("build model http client")?;
        Ok(Self {
            endpoint,
            config,
            client,
        })
    }
}

impl ModelClient for HttpModelClient {
    #[instrument(skip_all, fields(model = %self.config.model, turns = conversation.len()))]
    fn complete(&self, conversation: &Conversation) -> Result<ModelReply> {
        let request = ChatRequest::new(&self.config, conversation);
        let url = self.endpoint.chat_completions_url();
        debug!(%url, messages = request.messages.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&request)
            .send()
            .map_err(EndpointError::from)?;

        let status = response.status();
        let body = response.text().map_err(EndpointError::from)?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model endpoint returned an error status");
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            }
            .into());
        }

        let reply = parse_reply(&body)?;
        debug!(
            finish_reason = ?reply.finish_reason,
            tool_calls = reply.tool_calls.len(),
            "received model reply"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Role, ToolDescriptor, Turn};

    #[test]
    fn request_flattens_conversation() {
        let mut conversation =
            Conversation::new(&ToolDescriptor::shell("execute_bash"), "list files", "2025-11-19");
        conversation.append(Turn::new(Role::Tool, "Command: ls").with_segment("Exit code: 0"));
        let request = ChatRequest::new(&AgentConfig::default(), &conversation);

        let body = serde_json::to_value(&request).expect("serialize");
        assert_eq!(body["model"], "gpt-oss-20b");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["temperature"], 0.7);
        let messages = body["messages"].as_array().expect("messages");
        let roles: Vec<&str> = messages
            .iter()
            .map(|m| m["role"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["system", "developer", "user", "tool"]);
        assert_eq!(messages[3]["content"], "Command: ls Exit code: 0");
    }

    #[test]
    fn parses_content_reasoning_and_finish_reason() {
        let reply = parse_reply(
            r#"{"choices":[{"message":{"content":"hi","reasoning_content":"think"},"finish_reason":"stop"}]}"#,
        )
        .expect("parse");
        assert_eq!(reply.content, "hi");
        assert_eq!(reply.reasoning, "think");
        assert!(reply.finished());
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn accepts_reasoning_alias_and_null_content() {
        let reply = parse_reply(
            r#"{"choices":[{"message":{"content":null,"reasoning":"only thoughts"},"finish_reason":"length"}]}"#,
        )
        .expect("parse");
        assert_eq!(reply.content, "");
        assert_eq!(reply.reasoning, "only thoughts");
        assert!(!reply.finished());
    }

    #[test]
    fn parses_tool_calls() {
        let reply = parse_reply(
            r#"{"choices":[{"message":{"content":"","tool_calls":[{"id":"c1","type":"function","function":{"name":"execute_bash","arguments":"{\"command\":\"ls\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .expect("parse");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "execute_bash");
        assert_eq!(
            reply.tool_calls[0].arguments,
            Value::String("{\"command\":\"ls\"}".to_string())
        );
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_reply(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, EndpointError::EmptyChoices));
        let err = parse_reply(r#"{"object":"error"}"#).unwrap_err();
        assert!(matches!(err, EndpointError::EmptyChoices));
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        let err = parse_reply("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }
}
