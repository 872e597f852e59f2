//! Shared deterministic types for the agent core.
//!
//! These types define stable contracts between the loop and its collaborators.
//! They must not depend on external state or I/O.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::Serialize;

/// The fixed objective of a run. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal(String);

impl Goal {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(anyhow!("goal must not be empty"));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a completion was refused instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    /// The model returned nothing.
    Empty,
    /// The reply contains a markdown code fence.
    CodeFence,
    /// The whole reply is wrapped in inline-code backticks.
    InlineCode,
}

impl MalformedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty reply",
            Self::CodeFence => "reply contains a code fence",
            Self::InlineCode => "reply is wrapped in backticks",
        }
    }
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a single model completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// The completion is a terminal signal; the run is over.
    Done,
    /// A shell command to execute.
    Command(String),
    /// Unusable text that must not reach the shell.
    Malformed {
        text: String,
        reason: MalformedReason,
    },
}

/// Result of running one command.
///
/// `text` is the observation fed back to the model. The remaining fields are a
/// side channel for callers that care; a failed command is still just text to the
/// loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub text: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecOutput {
    /// Output of a command that exited successfully.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            exit_code: Some(0),
            timed_out: false,
        }
    }

    /// Output of a command that failed (non-zero exit, spawn error, ...).
    pub fn failed(text: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            text: text.into(),
            success: false,
            exit_code,
            timed_out: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_rejects_blank_text() {
        let err = Goal::new("  \n").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn goal_keeps_text_verbatim() {
        let goal = Goal::new(" list files ").expect("goal");
        assert_eq!(goal.as_str(), " list files ");
        assert_eq!(goal.to_string(), " list files ");
    }
}
