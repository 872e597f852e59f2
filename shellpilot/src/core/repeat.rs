//! Loop-avoidance policy: decides when the prompt carries the "pick a different
//! command" notice.
//!
//! The policy is a plain function so the loop never needs to know which
//! comparison is in effect.

use serde::{Deserialize, Serialize};

/// State visible to a repeat check when the next prompt is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatContext<'a> {
    /// Observation about to be shown to the model.
    pub observation: &'a str,
    /// Most recently executed command.
    pub last_command: Option<&'a str>,
    /// Command executed before `last_command`.
    pub previous_command: Option<&'a str>,
}

/// Returns `true` when the prompt should include the repetition notice.
pub type RepeatCheck = fn(&RepeatContext<'_>) -> bool;

/// Compares the last executed command with the current observation.
///
/// This is the historical behaviour: it fires when a command's output is
/// textually identical to the command itself.
pub fn command_matches_observation(ctx: &RepeatContext<'_>) -> bool {
    ctx.last_command == Some(ctx.observation)
}

/// Fires when the same command was executed twice in a row.
pub fn command_repeated(ctx: &RepeatContext<'_>) -> bool {
    match (ctx.last_command, ctx.previous_command) {
        (Some(last), Some(previous)) => last == previous,
        _ => false,
    }
}

/// Named policy selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatPolicy {
    /// [`command_matches_observation`].
    #[default]
    CommandMatchesOutput,
    /// [`command_repeated`].
    RepeatedCommand,
}

impl RepeatPolicy {
    pub fn check(self) -> RepeatCheck {
        match self {
            Self::CommandMatchesOutput => command_matches_observation,
            Self::RepeatedCommand => command_repeated,
        }
    }
}
