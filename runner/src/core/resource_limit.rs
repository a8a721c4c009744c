//! Resource budget tracker.
//!
//! Counts steps and calls to one tracked tool (by default `read_file`). The
//! step ceiling is authoritative: once reached, every invocation appends the
//! step-limit completion message. The tool-call ceiling is advisory and only
//! produces notices.

use tracing::{debug, warn};

use crate::core::budget::Budget;
use crate::core::markers::step_limit_message;
use crate::core::supervisor::{Supervisor, SupervisorNotice};
use crate::core::types::{ExecutionState, Message};

pub const DEFAULT_TRACKED_TOOL: &str = "read_file";

/// Per-run counters and latches. Latches never reset within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRunState {
    pub steps_seen: u32,
    pub matching_tool_calls_seen: u32,
    /// High-water mark: number of messages already scanned for tool calls.
    pub scanned_messages: usize,
    pub warned: bool,
    pub ceiling_reported: bool,
    pub hard_stopped: bool,
}

pub struct ResourceLimitSupervisor {
    budget: Budget,
    tracked_tool: String,
    run: ResourceRunState,
}

impl ResourceLimitSupervisor {
    pub fn new(budget: Budget) -> Self {
        Self::tracking(budget, DEFAULT_TRACKED_TOOL)
    }

    pub fn tracking(budget: Budget, tracked_tool: impl Into<String>) -> Self {
        Self {
            budget,
            tracked_tool: tracked_tool.into(),
            run: ResourceRunState::default(),
        }
    }

    pub fn run_state(&self) -> &ResourceRunState {
        &self.run
    }

    /// Count tracked calls in messages appended since the previous invocation.
    ///
    /// Messages persist across steps, so only the delta past the high-water
    /// mark is scanned. If the history shrank, the mark is clamped to the new
    /// length without rescanning.
    fn count_new_calls(&mut self, state: &ExecutionState) -> u32 {
        let total = state.messages.len();
        if total < self.run.scanned_messages {
            debug!(
                previous = self.run.scanned_messages,
                current = total,
                "message history shrank; resetting scan mark"
            );
            self.run.scanned_messages = total;
            return 0;
        }
        let new_calls = state.messages[self.run.scanned_messages..]
            .iter()
            .flat_map(|message| message.tool_calls.iter())
            .filter(|call| call.name == self.tracked_tool)
            .count();
        self.run.scanned_messages = total;
        u32::try_from(new_calls).unwrap_or(u32::MAX)
    }
}

impl Supervisor for ResourceLimitSupervisor {
    fn name(&self) -> &'static str {
        "resource_limit"
    }

    fn observe(&mut self, state: &mut ExecutionState) -> Vec<SupervisorNotice> {
        let mut notices = Vec::new();
        self.run.steps_seen = self.run.steps_seen.saturating_add(1);

        let new_calls = self.count_new_calls(state);
        self.run.matching_tool_calls_seen =
            self.run.matching_tool_calls_seen.saturating_add(new_calls);
        let seen = self.run.matching_tool_calls_seen;
        debug!(
            steps = self.run.steps_seen,
            tool = %self.tracked_tool,
            seen,
            new_calls,
            "resource usage"
        );

        if self.budget.step_limit_reached(self.run.steps_seen) {
            if !self.run.hard_stopped {
                self.run.hard_stopped = true;
                warn!(
                    max_steps = self.budget.max_steps,
                    "step limit reached; forcing completion"
                );
                notices.push(SupervisorNotice::StepLimitReached {
                    steps: self.run.steps_seen,
                    max_steps: self.budget.max_steps,
                });
            }
            state.push_message(Message::assistant(step_limit_message(self.budget.max_steps)));
        }

        if self.budget.warn_reached(seen) && !self.run.warned {
            self.run.warned = true;
            warn!(
                tool = %self.tracked_tool,
                seen,
                limit = self.budget.max_tool_calls,
                "approaching tool call limit"
            );
            notices.push(SupervisorNotice::ToolCallWarning {
                tool: self.tracked_tool.clone(),
                seen,
                limit: self.budget.max_tool_calls,
            });
        }

        if self.budget.ceiling_reached(seen) && !self.run.ceiling_reported {
            self.run.ceiling_reported = true;
            warn!(
                tool = %self.tracked_tool,
                seen,
                limit = self.budget.max_tool_calls,
                "tool call limit reached; agent should finalize"
            );
            notices.push(SupervisorNotice::ToolCallCeiling {
                tool: self.tracked_tool.clone(),
                seen,
                limit: self.budget.max_tool_calls,
            });
        }

        notices
    }
}
