//! Test-only helpers: a scripted model client and message/plan fixtures.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::core::types::{Message, Todo, TodoStatus, ToolArgs, ToolCall};
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::io::tools::{READ_FILE, WRITE_TODOS};

/// Snapshot of one request a [`ScriptedModel`] received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// Model client that replays canned replies in order.
///
/// Clones share the script and the request log. Once the script is exhausted
/// every call fails with a network error.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Result<Message, ModelError>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<Message, ModelError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, ModelError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                system_prompt: request.system_prompt.to_string(),
                messages: request.messages.to_vec(),
                tool_names: request.tools.iter().map(|tool| tool.name.clone()).collect(),
            });
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Network("script exhausted".to_string())))
    }
}

/// A `read_file` call for `path`.
pub fn read_call(path: &str) -> ToolCall {
    ToolCall::new(READ_FILE, ToolArgs::from_value(&json!({ "path": path })))
}

/// A `write_todos` call replacing the plan with `items`.
pub fn write_todos_call(items: &[(&str, TodoStatus)]) -> ToolCall {
    let todos: Vec<Value> = items
        .iter()
        .map(|(content, status)| json!({"content": content, "status": status.as_str()}))
        .collect();
    let mut args = Map::new();
    args.insert("todos".to_string(), Value::Array(todos));
    ToolCall::new(WRITE_TODOS, ToolArgs::Structured(args))
}

/// An assistant message that only calls tools.
pub fn tool_call_message(calls: Vec<ToolCall>) -> Message {
    Message::assistant("").with_tool_calls(calls)
}

/// Plan with one item per status, named `task-<index>`.
pub fn todos(statuses: &[TodoStatus]) -> Vec<Todo> {
    statuses
        .iter()
        .enumerate()
        .map(|(index, status)| Todo::new(format!("task-{index}"), *status))
        .collect()
}

/// Temporary working directory seeded with `files` (relative path, contents).
pub fn seeded_workdir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    for (relative, contents) in files {
        let path = temp.path().join(Path::new(relative));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write fixture");
    }
    temp
}
