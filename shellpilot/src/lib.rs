//! Autonomous shell-command agent.
//!
//! Given a natural-language goal, the agent repeatedly asks a language model for
//! the single next shell command, runs it, and feeds the output back until the
//! model answers `done`. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (history, proposal classification,
//!   loop-avoidance policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (shell execution, model backend, prompt
//!   rendering, config, transcripts). Each sits behind a trait or plain function so
//!   tests can substitute scripted fakes.
//!
//! Orchestration modules ([`step`], [`looping`]) drive the agent state machine.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
