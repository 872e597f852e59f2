//! Side-effecting adapters: processes, the model backend, prompts, config and transcripts.

pub mod completion;
pub mod config;
pub mod process;
pub mod prompt;
pub mod shell;
pub mod transcript;
