//! Run orchestration: wires config, sandbox, prompt, supervisors and model into
//! an agent loop, then consumes its event stream.
//!
//! Stream failures end the run but are recorded in [`RunOutcome::stop`]
//! rather than returned as errors, so callers always get the partial output.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::event::{NormalizedEvent, RawEvent, normalize};
use crate::core::markers::find_marker;
use crate::core::resource_limit::ResourceLimitSupervisor;
use crate::core::supervisor::SupervisorChain;
use crate::core::todo_completion::TodoCompletionSupervisor;
use crate::core::types::Todo;
use crate::io::agent_loop::{AGENT_NODE, AgentLoop, NOTICES_KEY, SUPERVISOR_NODE};
use crate::io::config::RunnerConfig;
use crate::io::model::{ModelClient, OpenAiCompatClient, OpenAiCompatSettings};
use crate::io::prompt::build_system_prompt;
use crate::io::sandbox::SandboxedFs;
use crate::io::transcript::{RunMeta, TranscriptWriter};

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunStop {
    /// A completion marker was seen in the output.
    Completed { marker: String },
    /// The stream ended without any completion marker.
    Finished,
    /// The event stream failed mid-run.
    Failed { message: String },
}

/// Tool call as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallView {
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub events: usize,
    /// Model turns observed (`agent` events).
    pub steps: u32,
    /// Message contents joined as paragraphs.
    pub response: String,
    pub tool_calls: Vec<ToolCallView>,
    /// Last todo snapshot seen.
    pub todos: Vec<Todo>,
    /// Supervisor notices, in arrival order.
    pub notices: Vec<Value>,
    pub stop: RunStop,
}

impl RunOutcome {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            events: 0,
            steps: 0,
            response: String::new(),
            tool_calls: Vec::new(),
            todos: Vec::new(),
            notices: Vec::new(),
            stop: RunStop::Finished,
        }
    }

    fn absorb(&mut self, raw: &RawEvent, event: &NormalizedEvent) {
        self.events += 1;
        if event.active_label == AGENT_NODE {
            self.steps += 1;
        }
        if let Some(Value::Array(notices)) = raw
            .get(SUPERVISOR_NODE)
            .and_then(|update| update.get(NOTICES_KEY))
        {
            self.notices.extend(notices.iter().cloned());
        }
        if event.has_todos() {
            self.todos = event.todos.clone();
        }
        let Some(last) = event.last_message() else {
            return;
        };
        self.tool_calls
            .extend(last.tool_calls.iter().map(|call| ToolCallView {
                name: call.name.clone(),
                args: call.args.display(),
            }));
        if last.content.is_empty() {
            return;
        }
        self.response.push_str("\n\n");
        self.response.push_str(&last.content);
        if matches!(self.stop, RunStop::Finished)
            && let Some(marker) = find_marker(&last.content)
        {
            info!(marker, "completion marker observed");
            self.stop = RunStop::Completed {
                marker: marker.to_string(),
            };
        }
    }
}

/// Consume `stream` to the end, collecting output.
///
/// Each raw event is written to `transcript` before it is normalized and
/// handed to `on_event`. A failed transcript write disables the transcript
/// for the rest of the run; the stream is still consumed.
pub async fn drive_run<S, F>(
    run_id: &str,
    stream: S,
    transcript: Option<&TranscriptWriter>,
    mut on_event: F,
) -> Result<RunOutcome>
where
    S: Stream<Item = Result<RawEvent>>,
    F: FnMut(&NormalizedEvent),
{
    pin_mut!(stream);
    let mut transcript = transcript;
    let mut outcome = RunOutcome::new(run_id);
    while let Some(item) = stream.next().await {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => {
                error!(run_id, error = %format!("{err:#}"), "event stream failed");
                outcome.stop = RunStop::Failed {
                    message: format!("{err:#}"),
                };
                break;
            }
        };
        if let Some(writer) = transcript
            && let Err(err) = writer.append_event(&raw)
        {
            warn!(run_id, error = %format!("{err:#}"), "transcript write failed; disabling transcript");
            transcript = None;
        }
        let event = normalize(&raw);
        outcome.absorb(&raw, &event);
        on_event(&event);
    }
    Ok(outcome)
}

/// Supervisors for one run, in execution order.
pub fn build_chain(config: &RunnerConfig) -> SupervisorChain {
    SupervisorChain::new()
        .with(ResourceLimitSupervisor::tracking(
            config.budget.budget(),
            config.budget.tracked_tool.clone(),
        ))
        .with(TodoCompletionSupervisor::new(
            config.budget.todo_completion_threshold,
        ))
}

/// Run `task` in `workdir` against the configured OpenAI-compatible endpoint.
pub async fn execute_task<F>(
    config: &RunnerConfig,
    task: &str,
    workdir: &Path,
    on_event: F,
) -> Result<RunOutcome>
where
    F: FnMut(&NormalizedEvent),
{
    let client = OpenAiCompatClient::new(OpenAiCompatSettings {
        base_url: config.model.base_url.clone(),
        api_key: config.model.api_key()?,
        model: config.model.model.clone(),
        temperature: config.model.temperature,
        timeout: config.model.request_timeout(),
    })?;
    execute_with_model(config, task, workdir, client, on_event).await
}

/// Run `task` in `workdir` with an explicit model client.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub async fn execute_with_model<M, F>(
    config: &RunnerConfig,
    task: &str,
    workdir: &Path,
    model: M,
    on_event: F,
) -> Result<RunOutcome>
where
    M: ModelClient,
    F: FnMut(&NormalizedEvent),
{
    if task.trim().is_empty() {
        bail!("task must be non-empty");
    }
    config.validate()?;
    let sandbox = SandboxedFs::new(workdir, config.sandbox.virtual_mode)?;
    let prompt_path = config
        .prompt_path
        .as_deref()
        .map(|path| resolve_against(sandbox.root(), path));
    let system_prompt = build_system_prompt(prompt_path.as_deref(), task, sandbox.root())?;

    let run_id = Uuid::new_v4().to_string();
    let transcript = match &config.transcript_dir {
        Some(dir) => Some(TranscriptWriter::create(
            &resolve_against(sandbox.root(), dir),
            &run_id,
        )?),
        None => None,
    };
    info!(run_id = %run_id, "starting run");

    let started_at = Utc::now();
    let clock = Instant::now();
    let agent = AgentLoop::new(model, sandbox, system_prompt, build_chain(config));
    let outcome = drive_run(
        &run_id,
        agent.stream(task.to_string()),
        transcript.as_ref(),
        on_event,
    )
    .await?;

    if let Some(transcript) = &transcript {
        let meta = RunMeta {
            run_id: run_id.clone(),
            task: task.to_string(),
            started_at,
            ended_at: Utc::now(),
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            events: outcome.events,
            stop: serde_json::to_value(&outcome.stop).context("serialize run stop")?,
        };
        if let Err(err) = transcript.write_meta(&meta) {
            warn!(error = %format!("{err:#}"), "failed to write run meta");
        }
    }
    info!(run_id = %run_id, events = outcome.events, stop = ?outcome.stop, "run finished");
    Ok(outcome)
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::markers::STEP_LIMIT_MARKER;
    use serde_json::json;

    async fn drive(events: Vec<Result<RawEvent>>) -> RunOutcome {
        drive_run("run-1", futures::stream::iter(events), None, |_| {})
            .await
            .expect("drive")
    }

    #[tokio::test]
    async fn collects_paragraphs_tool_calls_and_todos() {
        let outcome = drive(vec![
            Ok(json!({"agent": {"messages": [{
                "role": "assistant",
                "content": "",
                "tool_calls": [{"name": "read_file", "args": {"path": "/a"}}]
            }]}})),
            Ok(json!({"tools": {
                "messages": [{"role": "tool", "content": "a body"}],
                "todos": [{"content": "scan", "status": "completed"}]
            }})),
            Ok(json!({"agent": {"messages": [{"role": "assistant", "content": "Done."}]}})),
        ])
        .await;

        assert_eq!(outcome.events, 3);
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.response, "\n\na body\n\nDone.");
        assert_eq!(
            outcome.tool_calls,
            vec![ToolCallView {
                name: "read_file".to_string(),
                args: r#"{"path":"/a"}"#.to_string(),
            }]
        );
        assert_eq!(outcome.todos.len(), 1);
        assert_eq!(outcome.stop, RunStop::Finished);
    }

    #[tokio::test]
    async fn later_event_without_todos_keeps_last_snapshot() {
        let outcome = drive(vec![
            Ok(json!({"todos": [{"content": "a", "status": "pending"}]})),
            Ok(json!({"messages": [{"role": "assistant", "content": "x"}]})),
            Ok(json!({"values": {"todos": []}})),
        ])
        .await;
        assert!(outcome.todos.is_empty());

        let outcome = drive(vec![
            Ok(json!({"todos": [{"content": "a", "status": "pending"}]})),
            Ok(json!({"messages": [{"role": "assistant", "content": "x"}]})),
        ])
        .await;
        assert_eq!(outcome.todos.len(), 1);
    }

    #[tokio::test]
    async fn marker_marks_run_completed_and_notices_are_collected() {
        let outcome = drive(vec![Ok(json!({"supervisor": {
            "messages": [{"role": "assistant", "content": "ANALYSIS COMPLETE: Reached step limit (3)."}],
            "notices": [{"kind": "step_limit_reached", "steps": 3, "max_steps": 3}]
        }}))])
        .await;

        assert_eq!(
            outcome.stop,
            RunStop::Completed {
                marker: STEP_LIMIT_MARKER.to_string()
            }
        );
        assert_eq!(outcome.notices.len(), 1);
    }

    #[tokio::test]
    async fn stream_failure_is_recorded_not_raised() {
        let outcome = drive(vec![
            Ok(json!({"agent": {"messages": [{"role": "assistant", "content": "partial"}]}})),
            Err(anyhow::anyhow!("transport closed")),
            Ok(json!({"agent": {"messages": [{"role": "assistant", "content": "never"}]}})),
        ])
        .await;

        assert_eq!(outcome.response, "\n\npartial");
        assert_eq!(
            outcome.stop,
            RunStop::Failed {
                message: "transport closed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn shapeless_events_are_counted_but_ignored() {
        let mut labels = Vec::new();
        let outcome = drive_run(
            "run-1",
            futures::stream::iter(vec![Ok(json!([1, 2])), Ok(json!({}))]),
            None,
            |event| labels.push(event.active_label.clone()),
        )
        .await
        .expect("drive");

        assert_eq!(outcome.events, 2);
        assert!(outcome.response.is_empty());
        assert_eq!(labels, vec!["Unknown", "Unknown"]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn transcript_failure_keeps_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run_dir = temp.path().join("run-1");
        std::fs::create_dir_all(&run_dir).expect("run dir");
        std::os::unix::fs::symlink("/dev/full", run_dir.join("events.jsonl")).expect("symlink");
        let writer = TranscriptWriter::create(temp.path(), "run-1").expect("writer");

        let outcome = drive_run(
            "run-1",
            futures::stream::iter(vec![
                Ok(json!({"agent": {"messages": [{"role": "assistant", "content": "partial"}]}})),
                Ok(json!({"agent": {"messages": [{"role": "assistant", "content": "more"}]}})),
            ]),
            Some(&writer),
            |_| {},
        )
        .await
        .expect("drive");

        assert_eq!(outcome.events, 2);
        assert_eq!(outcome.response, "\n\npartial\n\nmore");
        assert_eq!(outcome.stop, RunStop::Finished);
    }

    #[test]
    fn chain_runs_budget_before_todos() {
        let chain = build_chain(&RunnerConfig::default());
        assert_eq!(chain.names(), vec!["resource_limit", "todo_completion"]);
    }
}
