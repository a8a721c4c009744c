//! Bounded agent runner.
//!
//! Runs a tool-using LLM agent over a sandboxed working directory and keeps it
//! inside a budget. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (supervisors, completion markers,
//!   event normalization). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, sandboxed filesystem, model
//!   client, tool execution, the agent loop host, transcripts).
//!
//! [`run`] wires both together and consumes the agent's event stream.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
