//! Completion-detection protocol.
//!
//! Synthetic messages injected by the supervisors carry one of a fixed set of
//! literal marker phrases. External consumers search message content for these
//! phrases to decide that a run is finished, so the strings must not change.

use std::sync::LazyLock;

use regex::Regex;

/// Prefix of the step-limit message injected by the resource tracker.
pub const STEP_LIMIT_MARKER: &str = "ANALYSIS COMPLETE";
/// Prefix of the message injected by the todo completion monitor.
pub const TODO_COMPLETION_MARKER: &str = "TODO COMPLETION SIGNAL";
pub const FINAL_REPORT_MARKER: &str = "FINAL REPORT";
pub const DOCUMENTATION_READY_MARKER: &str = "DOCUMENTATION READY";

pub const COMPLETION_MARKERS: [&str; 4] = [
    STEP_LIMIT_MARKER,
    TODO_COMPLETION_MARKER,
    FINAL_REPORT_MARKER,
    DOCUMENTATION_READY_MARKER,
];

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives: Vec<String> = COMPLETION_MARKERS
        .iter()
        .map(|marker| regex::escape(marker))
        .collect();
    Regex::new(&format!("({})", alternatives.join("|"))).expect("marker regex should be valid")
});

pub fn step_limit_message(max_steps: u32) -> String {
    format!(
        "{STEP_LIMIT_MARKER}: Reached step limit ({max_steps}). Outputting final draft based on data gathered so far."
    )
}

pub fn todo_completion_message(completed: usize, total: usize) -> String {
    format!(
        "{TODO_COMPLETION_MARKER}: {completed}/{total} tasks complete. Generating final output now."
    )
}

/// Return the first completion marker found in `text`.
pub fn find_marker(text: &str) -> Option<&'static str> {
    let found = MARKER_RE.find(text)?;
    COMPLETION_MARKERS
        .iter()
        .copied()
        .find(|marker| *marker == found.as_str())
}
