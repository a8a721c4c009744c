//! Event stream interpreter.
//!
//! The agent loop emits untyped state updates in one of three shapes:
//!
//! - flat: `{"messages": [...], "todos": [...]}`
//! - values: `{"values": {"messages": [...], "todos": [...]}}`
//! - node: `{"<node-name>": {"messages": [...], "todos": [...]}}`
//!
//! [`normalize`] extracts a uniform view from any of them. Each field is
//! located independently with a fixed precedence (flat, then values, then the
//! first node in key order), so one event may carry messages flat and todos
//! under a node. Normalization is pure and never fails: unrecognized events
//! yield empty lists and the `Unknown` label.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::types::{Message, Role, Todo, ToolArgs, ToolCall, value_text};

/// Untyped state update produced by the agent loop for one step.
pub type RawEvent = Value;

/// Label reported when an event has no top-level keys.
pub const UNKNOWN_LABEL: &str = "Unknown";

const MESSAGES_KEY: &str = "messages";
const TODOS_KEY: &str = "todos";
const VALUES_KEY: &str = "values";

/// Where in a raw event a field was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", content = "node", rename_all = "snake_case")]
pub enum EventShape {
    /// Top-level key.
    Flat,
    /// Nested under the top-level `values` key.
    Values,
    /// Nested under a node-name key.
    Node(String),
}

/// Uniform view of one raw event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub messages: Vec<Message>,
    pub todos: Vec<Todo>,
    pub active_label: String,
    /// Shape the messages were found in; `None` when the event carries none.
    pub messages_from: Option<EventShape>,
    /// Shape the todos were found in; `None` when the event carries none.
    pub todos_from: Option<EventShape>,
}

impl NormalizedEvent {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// True when the event carried a todo list, even an empty one.
    pub fn has_todos(&self) -> bool {
        self.todos_from.is_some()
    }
}

/// Normalize a raw event into messages, todos, and the active node label.
pub fn normalize(event: &RawEvent) -> NormalizedEvent {
    let (messages, messages_from) = match locate(event, MESSAGES_KEY) {
        Some((shape, value)) => (parse_list(value, parse_message), Some(shape)),
        None => (Vec::new(), None),
    };
    let (todos, todos_from) = match locate(event, TODOS_KEY) {
        Some((shape, value)) => (parse_list(value, Todo::from_value), Some(shape)),
        None => (Vec::new(), None),
    };
    if messages_from.is_none() && todos_from.is_none() {
        debug!("event matches no recognized shape");
    }
    NormalizedEvent {
        messages,
        todos,
        active_label: active_label(event),
        messages_from,
        todos_from,
    }
}

/// Find `key` in `event` following flat, values, then node precedence.
pub fn locate<'a>(event: &'a RawEvent, key: &str) -> Option<(EventShape, &'a Value)> {
    let map = event.as_object()?;
    if let Some(value) = map.get(key) {
        return Some((EventShape::Flat, value));
    }
    if let Some(value) = map
        .get(VALUES_KEY)
        .and_then(Value::as_object)
        .and_then(|values| values.get(key))
    {
        return Some((EventShape::Values, value));
    }
    map.iter().find_map(|(name, update)| {
        update
            .as_object()
            .and_then(|inner| inner.get(key))
            .map(|value| (EventShape::Node(name.clone()), value))
    })
}

/// First top-level key of the event, or [`UNKNOWN_LABEL`].
pub fn active_label(event: &RawEvent) -> String {
    event
        .as_object()
        .and_then(|map| map.keys().next())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

fn parse_list<T>(value: &Value, parse: fn(&Value) -> T) -> Vec<T> {
    match value {
        Value::Array(items) => items.iter().map(parse).collect(),
        Value::Null => Vec::new(),
        other => {
            debug!(kind = json_kind(other), "expected a list; treating as empty");
            Vec::new()
        }
    }
}

/// Tolerant conversion of one message entry.
///
/// Accepts the canonical form, chat-completion wire messages, and
/// `type`-tagged messages (`human`/`ai`/`tool`). Non-object entries become
/// assistant messages holding their text.
pub fn parse_message(value: &Value) -> Message {
    let Value::Object(map) = value else {
        return Message::assistant(value_text(value));
    };
    let role = map
        .get("role")
        .or_else(|| map.get("type"))
        .and_then(Value::as_str)
        .map(parse_role)
        .unwrap_or(Role::Assistant);
    let content = map.get("content").map(content_text).unwrap_or_default();
    let tool_calls = match map.get("tool_calls") {
        Some(Value::Array(calls)) => calls.iter().filter_map(parse_tool_call).collect(),
        _ => Vec::new(),
    };
    let tool_call_id = map
        .get("tool_call_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    Message {
        role,
        content,
        tool_calls,
        tool_call_id,
    }
}

fn parse_role(raw: &str) -> Role {
    match raw.to_ascii_lowercase().as_str() {
        "user" | "human" => Role::User,
        "tool" | "function" => Role::Tool,
        _ => Role::Assistant,
    }
}

/// Text of a content field: plain strings, or the text parts of a part list.
fn content_text(value: &Value) -> String {
    match value {
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.clone()),
                Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => value_text(other),
    }
}

/// Parse a tool call in either `{name, args}` or `{function: {name, arguments}}` form.
pub fn parse_tool_call(value: &Value) -> Option<ToolCall> {
    let map = value.as_object()?;
    let function = map.get("function").and_then(Value::as_object);
    let name = map
        .get("name")
        .or_else(|| function.and_then(|f| f.get("name")))
        .and_then(Value::as_str)?
        .to_string();
    let args = map
        .get("args")
        .or_else(|| map.get("arguments"))
        .or_else(|| function.and_then(|f| f.get("arguments")))
        .map(normalize_args)
        .unwrap_or_default();
    let id = map.get("id").and_then(Value::as_str).map(str::to_string);
    Some(ToolCall { id, name, args })
}

fn normalize_args(value: &Value) -> ToolArgs {
    let args = ToolArgs::from_value(value);
    if args.is_raw() {
        debug!("tool call arguments did not parse as a mapping; keeping raw text");
    }
    args
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a node-shaped raw event, the shape the bundled agent loop emits.
pub fn node_event(node: &str, messages: &[Message], todos: Option<&[Todo]>) -> RawEvent {
    let mut update = Map::new();
    update.insert(
        MESSAGES_KEY.to_string(),
        serde_json::to_value(messages).unwrap_or(Value::Array(Vec::new())),
    );
    if let Some(todos) = todos {
        update.insert(
            TODOS_KEY.to_string(),
            serde_json::to_value(todos).unwrap_or(Value::Array(Vec::new())),
        );
    }
    let mut event = Map::new();
    event.insert(node.to_string(), Value::Object(update));
    Value::Object(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TodoStatus;
    use serde_json::json;

    fn m1() -> Value {
        json!({"role": "assistant", "content": "hello"})
    }

    #[test]
    fn all_three_shapes_extract_the_same_messages() {
        let flat = json!({"messages": [m1()], "todos": []});
        let values = json!({"values": {"messages": [m1()], "todos": []}});
        let node = json!({"agent": {"messages": [m1()], "todos": []}});

        let expected = vec![Message::assistant("hello")];
        for event in [&flat, &values, &node] {
            let normalized = normalize(event);
            assert_eq!(normalized.messages, expected);
            assert!(normalized.todos.is_empty());
            assert!(normalized.has_todos());
        }
        assert_eq!(normalize(&flat).messages_from, Some(EventShape::Flat));
        assert_eq!(normalize(&values).messages_from, Some(EventShape::Values));
        assert_eq!(
            normalize(&node).messages_from,
            Some(EventShape::Node("agent".to_string()))
        );
    }

    #[test]
    fn top_level_messages_win_over_values() {
        let event = json!({
            "messages": [{"role": "assistant", "content": "top"}],
            "values": {"messages": [{"role": "assistant", "content": "nested"}]}
        });
        let normalized = normalize(&event);
        assert_eq!(normalized.messages, vec![Message::assistant("top")]);
        assert_eq!(normalized.messages_from, Some(EventShape::Flat));
    }

    #[test]
    fn fields_are_located_independently() {
        let event = json!({
            "messages": [m1()],
            "planner": {"todos": [{"content": "write docs", "status": "in_progress"}]}
        });
        let normalized = normalize(&event);
        assert_eq!(normalized.messages_from, Some(EventShape::Flat));
        assert_eq!(
            normalized.todos_from,
            Some(EventShape::Node("planner".to_string()))
        );
        assert_eq!(
            normalized.todos,
            vec![Todo::new("write docs", TodoStatus::InProgress)]
        );
    }

    #[test]
    fn node_scan_uses_first_matching_node_in_order() {
        let event = json!({
            "status": "running",
            "tools": {"messages": [{"role": "tool", "content": "first"}]},
            "agent": {"messages": [{"role": "assistant", "content": "second"}]}
        });
        let normalized = normalize(&event);
        assert_eq!(normalized.messages[0].content, "first");
        assert_eq!(normalized.messages[0].role, Role::Tool);
        assert_eq!(normalized.active_label, "status");
    }

    #[test]
    fn values_without_messages_falls_back_to_node_scan() {
        let event = json!({
            "values": {"todos": []},
            "agent": {"messages": [m1()]}
        });
        let normalized = normalize(&event);
        assert_eq!(
            normalized.messages_from,
            Some(EventShape::Node("agent".to_string()))
        );
        assert_eq!(normalized.todos_from, Some(EventShape::Values));
    }

    #[test]
    fn unrecognized_events_are_empty() {
        for event in [json!({}), json!([1, 2]), json!(null), json!({"agent": "done"})] {
            let normalized = normalize(&event);
            assert!(normalized.messages.is_empty());
            assert!(normalized.todos.is_empty());
            assert_eq!(normalized.messages_from, None);
        }
        assert_eq!(normalize(&json!({})).active_label, UNKNOWN_LABEL);
        assert_eq!(normalize(&json!({"agent": "done"})).active_label, "agent");
    }

    #[test]
    fn non_list_messages_are_treated_as_empty() {
        let normalized = normalize(&json!({"messages": "oops"}));
        assert!(normalized.messages.is_empty());
        assert_eq!(normalized.messages_from, Some(EventShape::Flat));
    }

    #[test]
    fn unparsable_argument_text_is_returned_raw() {
        let event = json!({"agent": {"messages": [{
            "type": "ai",
            "content": "",
            "tool_calls": [{"name": "read_file", "args": "{not json"}]
        }]}});
        let normalized = normalize(&event);
        let call = &normalized.messages[0].tool_calls[0];
        assert_eq!(call.name, "read_file");
        assert_eq!(call.args, ToolArgs::Raw("{not json".to_string()));
        assert_eq!(call.args.display(), "{not json");
    }

    #[test]
    fn parses_wire_style_tool_calls() {
        let message = parse_message(&json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "ls", "arguments": "{\"path\": \"/\"}"}
            }]
        }));
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(message.tool_calls[0].args.get_str("path"), Some("/"));
    }

    #[test]
    fn parses_typed_messages_and_content_parts() {
        let human = parse_message(&json!({"type": "human", "content": "task"}));
        assert_eq!(human.role, Role::User);

        let parts = parse_message(&json!({
            "type": "ai",
            "content": [{"type": "text", "text": "a"}, "b"]
        }));
        assert_eq!(parts.content, "a\nb");

        let bare = parse_message(&json!("plain text"));
        assert_eq!(bare, Message::assistant("plain text"));
    }

    #[test]
    fn node_event_round_trips_through_normalize() {
        let todos = vec![Todo::new("a", TodoStatus::Completed)];
        let event = node_event("tools", &[Message::tool(Some("c1".into()), "ok")], Some(todos.as_slice()));
        let normalized = normalize(&event);
        assert_eq!(normalized.active_label, "tools");
        assert_eq!(normalized.todos, todos);
        assert_eq!(normalized.messages[0].tool_call_id.as_deref(), Some("c1"));
    }
}
