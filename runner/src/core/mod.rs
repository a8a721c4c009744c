//! Deterministic, pure logic shared by the supervisor core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! execution state and return deterministic outputs suitable for tests.

pub mod budget;
pub mod event;
pub mod markers;
pub mod resource_limit;
pub mod supervisor;
pub mod todo_completion;
pub mod types;
