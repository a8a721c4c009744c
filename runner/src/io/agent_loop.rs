//! Bundled agent loop host.
//!
//! Drives one task to completion and streams node-shaped raw events:
//! `supervisor` (messages injected by the chain plus its notices), `agent`
//! (the model reply) and `tools` (tool results, with the full plan when
//! `write_todos` changed it). The loop ends when the model answers without
//! tool calls, or right after the finalization reply that follows a
//! supervisor completion signal.

use async_stream::try_stream;
use futures::Stream;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::event::{RawEvent, node_event};
use crate::core::markers::find_marker;
use crate::core::supervisor::{SupervisorChain, SupervisorNotice};
use crate::core::types::{ExecutionState, Message};
use crate::io::model::{ModelClient, ModelRequest, ToolDefinition};
use crate::io::sandbox::SandboxedFs;
use crate::io::tools::{self, tool_definitions};

pub const SUPERVISOR_NODE: &str = "supervisor";
pub const AGENT_NODE: &str = "agent";
pub const TOOLS_NODE: &str = "tools";
/// Key under the `supervisor` update carrying serialized notices.
pub const NOTICES_KEY: &str = "notices";

pub struct AgentLoop<M> {
    model: M,
    sandbox: SandboxedFs,
    system_prompt: String,
    chain: SupervisorChain,
}

impl<M: ModelClient> AgentLoop<M> {
    /// `chain` must be freshly built for this run; supervisor latches never reset.
    pub fn new(model: M, sandbox: SandboxedFs, system_prompt: String, chain: SupervisorChain) -> Self {
        Self {
            model,
            sandbox,
            system_prompt,
            chain,
        }
    }

    /// Run `task`, yielding raw events. A model failure ends the stream with `Err`.
    pub fn stream(self, task: String) -> impl Stream<Item = anyhow::Result<RawEvent>> {
        let Self {
            model,
            sandbox,
            system_prompt,
            mut chain,
        } = self;
        try_stream! {
            let definitions = tool_definitions();
            let mut state = ExecutionState::for_task(task);
            loop {
                state.step += 1;
                let before = state.messages.len();
                let observation = chain.observe(&mut state);
                let injected = state.messages.get(before..).unwrap_or_default();
                let finalize = observation
                    .notices
                    .iter()
                    .any(SupervisorNotice::requests_completion)
                    || injected.iter().any(|message| find_marker(&message.content).is_some());
                if observation.appended > 0 || !observation.notices.is_empty() {
                    yield supervisor_event(injected, &observation.notices);
                }

                let offered: &[ToolDefinition] = if finalize { &[] } else { &definitions };
                let reply = request_reply(&model, &system_prompt, &state, offered, state.step).await?;
                state.push_message(reply.clone());
                yield node_event(AGENT_NODE, std::slice::from_ref(&reply), None);

                if finalize {
                    info!(step = state.step, "finalization reply received; stopping");
                    break;
                }
                if reply.tool_calls.is_empty() {
                    info!(step = state.step, "model answered without tool calls; stopping");
                    break;
                }

                let mut results = Vec::with_capacity(reply.tool_calls.len());
                let mut plan_changed = false;
                for call in &reply.tool_calls {
                    let outcome = tools::execute(&sandbox, call);
                    if let Some(todos) = outcome.todos {
                        state.replace_todos(todos);
                        plan_changed = true;
                    }
                    results.push(Message::tool(call.id.clone(), outcome.content));
                }
                for message in &results {
                    state.push_message(message.clone());
                }
                yield node_event(
                    TOOLS_NODE,
                    &results,
                    plan_changed.then_some(state.todos.as_slice()),
                );
            }
        }
    }
}

#[instrument(skip_all, fields(step = step, messages = state.messages.len(), tools = tools.len()))]
async fn request_reply<M: ModelClient>(
    model: &M,
    system_prompt: &str,
    state: &ExecutionState,
    tools: &[ToolDefinition],
    step: u32,
) -> anyhow::Result<Message> {
    let request = ModelRequest {
        system_prompt,
        messages: &state.messages,
        tools,
    };
    let reply = model.complete(&request).await?;
    debug!(step, tool_calls = reply.tool_calls.len(), "agent step complete");
    Ok(reply)
}

fn supervisor_event(injected: &[Message], notices: &[SupervisorNotice]) -> RawEvent {
    let mut event = node_event(SUPERVISOR_NODE, injected, None);
    if let Some(update) = event.get_mut(SUPERVISOR_NODE).and_then(Value::as_object_mut) {
        update.insert(
            NOTICES_KEY.to_string(),
            serde_json::to_value(notices).unwrap_or(Value::Array(Vec::new())),
        );
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::Budget;
    use crate::core::event::normalize;
    use crate::core::markers::{STEP_LIMIT_MARKER, TODO_COMPLETION_MARKER};
    use crate::core::resource_limit::ResourceLimitSupervisor;
    use crate::core::todo_completion::TodoCompletionSupervisor;
    use crate::core::types::TodoStatus;
    use crate::io::model::ModelError;
    use crate::test_support::{ScriptedModel, read_call, tool_call_message, write_todos_call};
    use futures::{StreamExt, pin_mut};

    /// Drops every message but the task; hosts must tolerate a shrinking history.
    struct Forgetful;

    impl crate::core::supervisor::Supervisor for Forgetful {
        fn name(&self) -> &'static str {
            "forgetful"
        }

        fn observe(&mut self, state: &mut ExecutionState) -> Vec<SupervisorNotice> {
            state.messages.truncate(1);
            Vec::new()
        }
    }

    fn chain(max_steps: u32) -> SupervisorChain {
        SupervisorChain::new()
            .with(ResourceLimitSupervisor::new(Budget {
                max_tool_calls: 30,
                max_steps,
                warn_ratio: 0.8,
            }))
            .with(TodoCompletionSupervisor::new(0.8))
    }

    async fn collect<M: ModelClient>(agent: AgentLoop<M>, task: &str) -> Vec<anyhow::Result<RawEvent>> {
        let stream = agent.stream(task.to_string());
        pin_mut!(stream);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    fn sandbox() -> (tempfile::TempDir, SandboxedFs) {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), "alpha\n").expect("write");
        let fs = SandboxedFs::new(temp.path(), true).expect("sandbox");
        (temp, fs)
    }

    fn labels(events: &[anyhow::Result<RawEvent>]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                Ok(raw) => normalize(raw).active_label,
                Err(_) => "error".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn plain_answer_ends_after_one_step() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![Ok(Message::assistant("done"))]);
        let agent = AgentLoop::new(model.clone(), fs, "sys".to_string(), chain(50));

        let events = collect(agent, "task").await;

        assert_eq!(labels(&events), vec![AGENT_NODE]);
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system_prompt, "sys");
        assert_eq!(requests[0].tool_names.len(), 4);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_step() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![read_call("/a.txt").with_id("c1")])),
            Ok(Message::assistant("summary")),
        ]);
        let agent = AgentLoop::new(model.clone(), fs, "sys".to_string(), chain(50));

        let events = collect(agent, "task").await;

        assert_eq!(labels(&events), vec![AGENT_NODE, TOOLS_NODE, AGENT_NODE]);
        let tools_event = normalize(events[1].as_ref().expect("event"));
        assert_eq!(tools_event.messages[0].content, "     1\talpha");
        assert_eq!(tools_event.messages[0].tool_call_id.as_deref(), Some("c1"));
        assert!(!tools_event.has_todos());
        assert_eq!(model.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn step_limit_forces_a_toolless_final_reply() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![read_call("/a.txt")])),
            Ok(tool_call_message(vec![read_call("/a.txt")])),
            Ok(Message::assistant("final draft")),
        ]);
        let agent = AgentLoop::new(model.clone(), fs, "sys".to_string(), chain(3));

        let events = collect(agent, "task").await;

        assert_eq!(
            labels(&events),
            vec![AGENT_NODE, TOOLS_NODE, AGENT_NODE, TOOLS_NODE, SUPERVISOR_NODE, AGENT_NODE]
        );
        let supervisor = events[4].as_ref().expect("event");
        let injected = normalize(supervisor);
        assert!(injected.messages[0].content.starts_with(STEP_LIMIT_MARKER));
        assert_eq!(
            supervisor[SUPERVISOR_NODE][NOTICES_KEY][0]["kind"],
            serde_json::json!("step_limit_reached")
        );
        let last = model.requests().pop().expect("request");
        assert!(last.tool_names.is_empty());
    }

    #[tokio::test]
    async fn todo_threshold_triggers_finalization() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![write_todos_call(&[
                ("scan", TodoStatus::Completed),
                ("draft", TodoStatus::Completed),
                ("review", TodoStatus::Completed),
                ("polish", TodoStatus::Completed),
                ("ship", TodoStatus::Pending),
            ])])),
            Ok(Message::assistant("FINAL REPORT: all good")),
        ]);
        let agent = AgentLoop::new(model.clone(), fs, "sys".to_string(), chain(50));

        let events = collect(agent, "task").await;

        assert_eq!(
            labels(&events),
            vec![AGENT_NODE, TOOLS_NODE, SUPERVISOR_NODE, AGENT_NODE]
        );
        let tools_event = normalize(events[1].as_ref().expect("event"));
        assert_eq!(tools_event.todos.len(), 5);
        let supervisor = normalize(events[2].as_ref().expect("event"));
        assert!(supervisor.messages[0].content.starts_with(TODO_COMPLETION_MARKER));
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_ends_stream_with_error() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![read_call("/a.txt")])),
            Err(ModelError::Network("connection reset".to_string())),
        ]);
        let agent = AgentLoop::new(model, fs, "sys".to_string(), chain(50));

        let events = collect(agent, "task").await;

        assert_eq!(labels(&events), vec![AGENT_NODE, TOOLS_NODE, "error"]);
        let err = events[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn path_violation_does_not_end_the_run() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![read_call("../../etc/passwd")])),
            Ok(Message::assistant("could not read it")),
        ]);
        let agent = AgentLoop::new(model, fs, "sys".to_string(), chain(50));

        let events = collect(agent, "task").await;

        assert_eq!(labels(&events), vec![AGENT_NODE, TOOLS_NODE, AGENT_NODE]);
        let tools_event = normalize(events[1].as_ref().expect("event"));
        assert!(tools_event.messages[0].content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn shrinking_history_does_not_panic() {
        let (_temp, fs) = sandbox();
        let model = ScriptedModel::new(vec![
            Ok(tool_call_message(vec![read_call("/a.txt")])),
            Ok(Message::assistant("done")),
        ]);
        let agent = AgentLoop::new(
            model.clone(),
            fs,
            "sys".to_string(),
            SupervisorChain::new().with(Forgetful),
        );

        let events = collect(agent, "task").await;

        assert_eq!(labels(&events), vec![AGENT_NODE, TOOLS_NODE, AGENT_NODE]);
        assert_eq!(model.requests()[1].messages.len(), 1);
    }
}
