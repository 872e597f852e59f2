//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! strings and return deterministic outputs suitable for tests.

pub mod history;
pub mod repeat;
pub mod signal;
pub mod stuck;
pub mod types;
