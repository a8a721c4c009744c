//! Supervisor stages invoked by the agent loop host once per step.
//!
//! A supervisor observes the execution state, may append messages to it, and
//! reports what it did as [`SupervisorNotice`] values. Each supervisor owns its
//! run-state, so one instance must be constructed per run and never shared
//! between runs.

use serde::Serialize;

use crate::core::types::ExecutionState;

/// Structured notification emitted when a supervisor crosses a threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorNotice {
    /// The tracked tool reached the warning fraction of its ceiling (fires once).
    ToolCallWarning { tool: String, seen: u32, limit: u32 },
    /// The tracked tool reached its advisory ceiling (fires once).
    ToolCallCeiling { tool: String, seen: u32, limit: u32 },
    /// The step ceiling was reached and the hard-stop latch was set.
    StepLimitReached { steps: u32, max_steps: u32 },
    /// The todo completion rate crossed the threshold and finalization was requested.
    TodoThresholdReached {
        completed: usize,
        total: usize,
        rate: f64,
    },
}

impl SupervisorNotice {
    /// True for notices that come with an injected completion message.
    pub fn requests_completion(&self) -> bool {
        matches!(
            self,
            Self::StepLimitReached { .. } | Self::TodoThresholdReached { .. }
        )
    }
}

/// A single supervisor stage.
///
/// `observe` must be total: missing data degrades to a no-op, and calling it
/// after a latch was set is always safe. Stages may only append to
/// `state.messages`, never rewrite existing entries.
pub trait Supervisor: Send {
    fn name(&self) -> &'static str;

    fn observe(&mut self, state: &mut ExecutionState) -> Vec<SupervisorNotice>;
}

/// Result of running the whole chain for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepObservation {
    /// Number of messages the chain appended this step.
    pub appended: usize,
    pub notices: Vec<SupervisorNotice>,
}

/// Ordered list of supervisors, run sequentially for each step.
#[derive(Default)]
pub struct SupervisorChain {
    stages: Vec<Box<dyn Supervisor>>,
}

impl SupervisorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl Supervisor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage, in insertion order, against `state`.
    pub fn observe(&mut self, state: &mut ExecutionState) -> StepObservation {
        let before = state.messages.len();
        let mut notices = Vec::new();
        for stage in &mut self.stages {
            notices.extend(stage.observe(state));
        }
        StepObservation {
            appended: state.messages.len().saturating_sub(before),
            notices,
        }
    }
}
