//! Todo completion monitor.
//!
//! Fires a single finalization signal once the fraction of completed todos
//! reaches the configured threshold. The latch is never cleared, so a plan
//! that later gains new pending items does not trigger a second signal.

use tracing::info;

use crate::core::markers::todo_completion_message;
use crate::core::supervisor::{Supervisor, SupervisorNotice};
use crate::core::types::{ExecutionState, Message, TodoStatus};

pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.8;

pub struct TodoCompletionSupervisor {
    threshold: f64,
    completion_triggered: bool,
}

impl TodoCompletionSupervisor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            completion_triggered: false,
        }
    }

    pub fn completion_triggered(&self) -> bool {
        self.completion_triggered
    }
}

impl Default for TodoCompletionSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_THRESHOLD)
    }
}

impl Supervisor for TodoCompletionSupervisor {
    fn name(&self) -> &'static str {
        "todo_completion"
    }

    fn observe(&mut self, state: &mut ExecutionState) -> Vec<SupervisorNotice> {
        if state.todos.is_empty() || self.completion_triggered {
            return Vec::new();
        }

        let total = state.todos.len();
        let completed = state
            .todos
            .iter()
            .filter(|todo| todo.status == TodoStatus::Completed)
            .count();
        let rate = completed as f64 / total as f64;
        if rate < self.threshold {
            return Vec::new();
        }

        self.completion_triggered = true;
        info!(
            completed,
            total,
            rate = format!("{:.0}%", rate * 100.0),
            "todo threshold reached; triggering finalization"
        );
        state.push_message(Message::assistant(todo_completion_message(completed, total)));
        vec![SupervisorNotice::TodoThresholdReached {
            completed,
            total,
            rate,
        }]
    }
}
