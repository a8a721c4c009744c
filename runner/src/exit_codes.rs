//! Stable exit codes for runner CLI commands.

/// Command succeeded; for `run`, the agent finished or signaled completion.
pub const OK: i32 = 0;
/// Invalid arguments, config, or setup errors.
pub const INVALID: i32 = 1;
/// `run` ended because the model stream failed.
pub const FAILED: i32 = 2;
/// `run` was forced to finalize by the step limit.
pub const STEP_LIMIT: i32 = 3;
