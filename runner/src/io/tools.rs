//! Built-in tools executed by the agent loop against the sandbox.
//!
//! Failures, including path violations, are reported back to the model as the
//! tool result for that call only; they never end the run.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::types::{Todo, ToolCall};
use crate::io::model::ToolDefinition;
use crate::io::sandbox::SandboxedFs;

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const LS: &str = "ls";
pub const WRITE_TODOS: &str = "write_todos";

/// Output of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    /// Replacement plan when the call was `write_todos`.
    pub todos: Option<Vec<Todo>>,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            todos: None,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: format!("Error: {}", content.into()),
            is_error: true,
            todos: None,
        }
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: LS.to_string(),
            description: "List the files in a directory of the working directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Directory path, `/` is the root."}},
            }),
        },
        ToolDefinition {
            name: READ_FILE.to_string(),
            description: "Read a text file. Supports an optional line offset and limit.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer", "minimum": 0},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: WRITE_FILE.to_string(),
            description: "Create or overwrite a text file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: WRITE_TODOS.to_string(),
            description: "Replace the task plan. Each item has `content` and `status` (pending, in_progress, completed).".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": {"type": "string"},
                                "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                            },
                            "required": ["content", "status"]
                        }
                    }
                },
                "required": ["todos"]
            }),
        },
    ]
}

/// Execute one tool call.
pub fn execute(sandbox: &SandboxedFs, call: &ToolCall) -> ToolOutcome {
    if call.args.is_raw() {
        return ToolOutcome::error(format!(
            "arguments for {} are not a JSON object: {}",
            call.name,
            call.args.display()
        ));
    }
    let outcome = match call.name.as_str() {
        LS => list(sandbox, call),
        READ_FILE => read_file(sandbox, call),
        WRITE_FILE => write_file(sandbox, call),
        WRITE_TODOS => write_todos(call),
        other => ToolOutcome::error(format!("unknown tool '{other}'")),
    };
    if outcome.is_error {
        warn!(tool = %call.name, result = %outcome.content, "tool call failed");
    } else {
        debug!(tool = %call.name, bytes = outcome.content.len(), "tool call succeeded");
    }
    outcome
}

fn list(sandbox: &SandboxedFs, call: &ToolCall) -> ToolOutcome {
    let path = call.args.get_str("path").unwrap_or("/");
    match sandbox.list(path) {
        Ok(entries) if entries.is_empty() => ToolOutcome::ok(format!("{path} is empty")),
        Ok(entries) => ToolOutcome::ok(
            entries
                .iter()
                .map(|entry| {
                    if entry.is_dir {
                        format!("{}/", entry.path)
                    } else {
                        format!("{} ({} bytes)", entry.path, entry.size)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Err(err) => ToolOutcome::error(err.to_string()),
    }
}

fn read_file(sandbox: &SandboxedFs, call: &ToolCall) -> ToolOutcome {
    let Some(path) = call.args.get_str("path") else {
        return ToolOutcome::error("read_file requires a `path` argument");
    };
    let offset = call.args.get("offset").and_then(Value::as_u64).unwrap_or(0);
    let limit = call.args.get("limit").and_then(Value::as_u64);
    match sandbox.read_to_string(path) {
        Ok(contents) => ToolOutcome::ok(number_lines(&contents, offset, limit)),
        Err(err) => ToolOutcome::error(err.to_string()),
    }
}

fn write_file(sandbox: &SandboxedFs, call: &ToolCall) -> ToolOutcome {
    let (Some(path), Some(content)) = (call.args.get_str("path"), call.args.get_str("content"))
    else {
        return ToolOutcome::error("write_file requires `path` and `content` arguments");
    };
    match sandbox.write(path, content) {
        Ok(()) => ToolOutcome::ok(format!("Wrote {} bytes to {path}", content.len())),
        Err(err) => ToolOutcome::error(err.to_string()),
    }
}

fn write_todos(call: &ToolCall) -> ToolOutcome {
    let Some(Value::Array(items)) = call.args.get("todos") else {
        return ToolOutcome::error("write_todos requires a `todos` array");
    };
    let todos: Vec<Todo> = items.iter().map(Todo::from_value).collect();
    let summary = todos
        .iter()
        .map(|todo| format!("[{}] {}", todo.status.as_str(), todo.content))
        .collect::<Vec<_>>()
        .join("\n");
    ToolOutcome {
        content: format!("Updated plan ({} items):\n{summary}", todos.len()),
        is_error: false,
        todos: Some(todos),
    }
}

/// Render `contents` with 1-based line numbers, starting after `offset` lines.
fn number_lines(contents: &str, offset: u64, limit: Option<u64>) -> String {
    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    let take = limit
        .and_then(|limit| usize::try_from(limit).ok())
        .unwrap_or(usize::MAX);
    contents
        .lines()
        .enumerate()
        .skip(skip)
        .take(take)
        .map(|(index, line)| format!("{:>6}\t{line}", index + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
