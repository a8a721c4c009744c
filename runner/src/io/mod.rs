//! Side-effecting pieces of a run: config, sandboxed filesystem, model client,
//! tools, the agent loop host and transcripts.

pub mod agent_loop;
pub mod config;
pub mod model;
pub mod prompt;
pub mod sandbox;
pub mod tools;
pub mod transcript;
