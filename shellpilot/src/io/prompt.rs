//! Prompt builder for the next-command request.
//!
//! A prompt is the normalized history, the latest observation, the instruction
//! block and an empty assistant cue, separated by blank lines. The instruction
//! block is rendered once per builder from a template.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::history::{ASSISTANT_PREFIX, HUMAN_PREFIX, normalize_history};
use crate::core::repeat::{RepeatCheck, RepeatContext, command_matches_observation};

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");

/// Extra instruction appended when the repeat policy fires.
pub const REPEAT_NOTICE: &str =
    "The last command was the same as the previous one. Please provide a different command.";

/// Everything the builder needs from the loop state for one prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub history: &'a str,
    pub observation: &'a str,
    pub last_command: Option<&'a str>,
    pub previous_command: Option<&'a str>,
}

impl<'a> PromptInputs<'a> {
    fn repeat_context(&self) -> RepeatContext<'a> {
        RepeatContext {
            observation: self.observation,
            last_command: self.last_command,
            previous_command: self.previous_command,
        }
    }
}

/// Builds prompts. Pure string work once constructed.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    instructions: String,
    instructions_repeated: String,
    repeat_check: RepeatCheck,
}

impl PromptBuilder {
    /// Render the instruction block for the given OS family.
    pub fn new(os_family: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
            .context("load instructions template")?;
        let template = env.get_template("instructions")?;
        let render = |repeated: bool| -> Result<String> {
            let rendered = template
                .render(context! {
                    os_family => os_family,
                    repeated => repeated,
                    repeat_notice => REPEAT_NOTICE,
                })
                .context("render instructions template")?;
            Ok(rendered.trim().to_string())
        };

        Ok(Self {
            instructions: render(false)?,
            instructions_repeated: render(true)?,
            repeat_check: command_matches_observation,
        })
    }

    /// Swap the loop-avoidance comparison.
    pub fn with_repeat_check(mut self, check: RepeatCheck) -> Self {
        self.repeat_check = check;
        self
    }

    /// Assemble the prompt for the next completion.
    pub fn build(&self, inputs: &PromptInputs<'_>) -> String {
        let history = normalize_history(inputs.history);
        let repeated = (self.repeat_check)(&inputs.repeat_context());
        if repeated {
            debug!(last_command = ?inputs.last_command, "adding repeat notice to prompt");
        }
        let instructions = if repeated {
            &self.instructions_repeated
        } else {
            &self.instructions
        };
        format!(
            "{history}\n\n{HUMAN_PREFIX} {observation}\n\n{instructions}\n\n{ASSISTANT_PREFIX}",
            observation = inputs.observation,
        )
    }
}
