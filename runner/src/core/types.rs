//! Shared deterministic types for the supervisor core.
//!
//! These types define the contracts between the agent loop host, the
//! supervisor stages, and the event interpreter. They do not depend on I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a message in the execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Argument payload of a tool call.
///
/// Payloads arrive either as a structured mapping or as serialized JSON text.
/// Text that does not parse into a mapping is kept verbatim as `Raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArgs {
    Structured(Map<String, Value>),
    Raw(String),
}

impl ToolArgs {
    /// Normalize a serialized payload: parse it when it encodes a mapping,
    /// otherwise keep the original text.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::Structured(map),
            _ => Self::Raw(text.to_string()),
        }
    }

    /// Normalize an arbitrary JSON payload.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(map.clone()),
            Value::String(text) => Self::from_text(text),
            Value::Null => Self::Structured(Map::new()),
            other => Self::Raw(other.to_string()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Structured(map) => map.get(key),
            Self::Raw(_) => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Human-readable rendering: compact JSON for mappings, the raw text otherwise.
    pub fn display(&self) -> String {
        match self {
            Self::Structured(map) => Value::Object(map.clone()).to_string(),
            Self::Raw(text) => text.clone(),
        }
    }
}

impl Default for ToolArgs {
    fn default() -> Self {
        Self::Structured(Map::new())
    }
}

/// A structured request, embedded in a message, to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One element of the append-only execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call a `tool` message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id,
            ..Self::new(Role::Tool, content)
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Status of one plan item. Missing or unrecognized values read as `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "in_progress" => Self::InProgress,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// One item of the agent's self-maintained plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

impl Todo {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }

    /// Tolerant conversion from an untyped plan entry.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let content = map
                    .get("content")
                    .or_else(|| map.get("description"))
                    .map(value_text)
                    .unwrap_or_default();
                let status = map
                    .get("status")
                    .and_then(Value::as_str)
                    .map(TodoStatus::parse)
                    .unwrap_or_default();
                Self { content, status }
            }
            other => Self::new(value_text(other), TodoStatus::Pending),
        }
    }
}

/// Shared record passed between agent steps.
///
/// `messages` only ever grows; `todos` is replaced wholesale with the latest plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    /// Number of steps the host has started for this state.
    #[serde(default)]
    pub step: u32,
}

impl ExecutionState {
    /// Initial state for a task: a single user message.
    pub fn for_task(task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(task)],
            todos: Vec::new(),
            step: 0,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn replace_todos(&mut self, todos: Vec<Todo>) {
        self.todos = todos;
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Text of a JSON scalar without the quoting `Value::to_string` adds to strings.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
