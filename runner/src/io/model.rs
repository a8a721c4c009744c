//! Model invocation client.
//!
//! The [`ModelClient`] trait decouples the agent loop from the provider.
//! [`OpenAiCompatClient`] talks to any OpenAI-compatible `chat/completions`
//! endpoint; tests use scripted clients that return canned messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::event::parse_tool_call;
use crate::core::types::{Message, Role, ToolArgs};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Network(String),
    #[error("model endpoint returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("could not parse model response: {0}")]
    Parse(String),
}

/// Tool made available to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments.
    pub parameters: Value,
}

/// One model invocation.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    /// Empty when the model must answer without calling tools.
    pub tools: &'a [ToolDefinition],
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next assistant message, possibly containing tool calls.
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, ModelError>;
}

/// Settings for [`OpenAiCompatClient`].
#[derive(Debug, Clone)]
pub struct OpenAiCompatSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    http: Client,
    settings: OpenAiCompatSettings,
}

impl OpenAiCompatClient {
    pub fn new(settings: OpenAiCompatSettings) -> Result<Self, ModelError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| ModelError::Network(format!("build http client: {err}")))?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(model = %self.settings.model, messages = request.messages.len(), tools = request.tools.len()))]
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, ModelError> {
        let body = build_request(&self.settings.model, self.settings.temperature, request);
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ModelError::Network(format!("request timeout: {err}"))
                } else if err.is_connect() {
                    ModelError::Network(format!("connection failed: {err}"))
                } else {
                    ModelError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ModelError::Network(format!("read response body: {err}")))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model endpoint returned an error");
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let message = parse_response(&text)?;
        debug!(
            tool_calls = message.tool_calls.len(),
            content_len = message.content.len(),
            "model responded"
        );
        Ok(message)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolDefinition,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: Value,
}

fn build_request(model: &str, temperature: f64, request: &ModelRequest<'_>) -> WireRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage {
        role: "system",
        content: Some(request.system_prompt.to_string()),
        tool_calls: Vec::new(),
        tool_call_id: None,
    });
    messages.extend(request.messages.iter().map(to_wire_message));
    WireRequest {
        model: model.to_string(),
        messages,
        temperature,
        tools: request
            .tools
            .iter()
            .map(|tool| WireTool {
                tool_type: "function",
                function: tool.clone(),
            })
            .collect(),
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let tool_calls: Vec<WireToolCall> = message
        .tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| WireToolCall {
            id: call.id.clone().unwrap_or_else(|| format!("call_{index}")),
            call_type: "function",
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: match &call.args {
                    ToolArgs::Structured(_) => call.args.display(),
                    ToolArgs::Raw(text) => text.clone(),
                },
            },
        })
        .collect();
    // Assistant turns that only call tools are sent with null content.
    let content = if message.content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(message.content.clone())
    };
    WireMessage {
        role,
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Translate a chat completion response body into an assistant message.
fn parse_response(body: &str) -> Result<Message, ModelError> {
    let parsed: WireResponse = serde_json::from_str(body)
        .map_err(|err| ModelError::Parse(format!("{err}; body: {}", truncate(body, 500))))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Parse("no choices in response".to_string()))?;
    let content = choice
        .message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool_calls = choice
        .message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();
    Ok(Message::assistant(content).with_tool_calls(tool_calls))
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolCall;
    use serde_json::json;

    #[test]
    fn request_prepends_system_prompt_and_serializes_calls() {
        let messages = vec![
            Message::user("document this repo"),
            Message::assistant("").with_tool_calls(vec![
                ToolCall::new("read_file", ToolArgs::from_text(r#"{"path":"/a"}"#))
                    .with_id("call_a"),
            ]),
            Message::tool(Some("call_a".to_string()), "contents"),
        ];
        let tools = vec![ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let request = ModelRequest {
            system_prompt: "be brief",
            messages: &messages,
            tools: &tools,
        };

        let wire = serde_json::to_value(build_request("gpt-4o", 0.0, &request)).expect("json");

        assert_eq!(wire["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(wire["messages"][2]["content"], Value::Null);
        assert_eq!(
            wire["messages"][2]["tool_calls"][0]["function"]["arguments"],
            json!(r#"{"path":"/a"}"#)
        );
        assert_eq!(wire["messages"][3]["tool_call_id"], json!("call_a"));
        assert_eq!(wire["tools"][0]["function"]["name"], json!("read_file"));
        assert_eq!(wire["temperature"], json!(0.0));
    }

    #[test]
    fn request_without_tools_omits_tool_list() {
        let messages = vec![Message::user("hi")];
        let request = ModelRequest {
            system_prompt: "",
            messages: &messages,
            tools: &[],
        };
        let wire = serde_json::to_value(build_request("m", 0.0, &request)).expect("json");
        assert!(wire.get("tools").is_none());
    }

    #[test]
    fn parses_tool_call_response() {
        let body = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "ls", "arguments": "{\"path\":\"/\"}"}
                }]
            }}]
        })
        .to_string();

        let message = parse_response(&body).expect("parse");

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls[0].name, "ls");
        assert_eq!(message.tool_calls[0].args.get_str("path"), Some("/"));
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let err = parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
        let err = parse_response("not json").unwrap_err();
        assert!(err.to_string().contains("not json"));
    }
}
