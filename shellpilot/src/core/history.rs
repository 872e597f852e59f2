//! Conversation transcript shown to the model on every call.
//!
//! The history is plain text made of role-tagged exchanges. It only ever grows:
//! the single exception is that an exchange identical to the one just appended is
//! not appended again.

use std::borrow::Cow;

use crate::core::types::Goal;

/// Role prefix for observations (and the required start of every prompt).
pub const HUMAN_PREFIX: &str = "Human:";
/// Role prefix for model-proposed commands.
pub const ASSISTANT_PREFIX: &str = "Assistant:";

/// Render one exchange in canonical form.
pub fn exchange(output: &str, command: &str) -> String {
    format!("\n\n{HUMAN_PREFIX} {output}\n{ASSISTANT_PREFIX} {command}")
}

/// Append the `(output, command)` exchange unless `history` already ends with it.
pub fn append_exchange(history: &str, output: &str, command: &str) -> String {
    let mut buf = history.to_string();
    push_exchange(&mut buf, output, command);
    buf
}

/// In-place form of [`append_exchange`]. Returns `false` when nothing was appended.
fn push_exchange(history: &mut String, output: &str, command: &str) -> bool {
    let entry = exchange(output, command);
    if history.ends_with(&entry) {
        return false;
    }
    history.push_str(&entry);
    true
}

/// Ensure the text begins with the `Human:` role prefix.
///
/// Already-prefixed text is returned unchanged, so this is idempotent.
pub fn normalize_history(history: &str) -> Cow<'_, str> {
    if history.starts_with(HUMAN_PREFIX) {
        Cow::Borrowed(history)
    } else {
        Cow::Owned(format!("{HUMAN_PREFIX} {history}"))
    }
}

/// Owned, append-only transcript for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    text: String,
}

impl History {
    /// Start a transcript with the goal statement.
    pub fn new(goal: &Goal) -> Self {
        Self {
            text: format!("Initial Goal: {goal}"),
        }
    }

    /// Record an exchange. Returns `false` when it duplicated the trailing entry.
    pub fn record(&mut self, output: &str, command: &str) -> bool {
        push_exchange(&mut self.text, output, command)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}
