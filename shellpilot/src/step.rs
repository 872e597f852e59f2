//! One iteration of the agent: prompt, complete, classify, execute.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::history::History;
use crate::core::signal::classify_proposal;
use crate::core::stuck::StuckDetector;
use crate::core::types::{ExecOutput, Goal, MalformedReason, Proposal};
use crate::io::completion::{CompletionBackend, CompletionClient};
use crate::io::config::AgentConfig;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::shell::CommandExecutor;
use crate::io::transcript::{IterationMeta, IterationRecord, TranscriptWriter};

/// The model replayed the same command with the same result too many times.
#[derive(Debug, Error)]
#[error("loop detected: `{command}` produced identical output {repeats} times in a row")]
pub struct LoopDetectedError {
    pub command: String,
    pub repeats: u32,
}

/// The model kept sending replies that cannot be executed.
#[derive(Debug, Error)]
#[error("model sent {attempts} unusable replies in a row (last: {reason}: {last:?})")]
pub struct MalformedResponseError {
    pub attempts: u32,
    pub last: String,
    pub reason: MalformedReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    AwaitingCommand,
    Executing,
    Done,
}

/// Mutable loop state for a single run. Never persisted.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub phase: AgentPhase,
    /// Observation shown to the model next. Starts as the goal text.
    pub current_output: String,
    pub last_command: Option<String>,
    pub previous_command: Option<String>,
    pub history: History,
    /// Model calls made so far.
    pub iter: u32,
    malformed_streak: u32,
    stuck: StuckDetector,
}

impl AgentState {
    pub fn new(goal: &Goal, stuck_threshold: u32) -> Self {
        Self {
            phase: AgentPhase::AwaitingCommand,
            current_output: goal.as_str().to_string(),
            last_command: None,
            previous_command: None,
            history: History::new(goal),
            iter: 0,
            malformed_streak: 0,
            stuck: StuckDetector::new(stuck_threshold),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == AgentPhase::Done
    }
}

/// Per-step guard settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepConfig {
    /// Abort once more than this many consecutive replies were rejected.
    pub max_malformed_responses: u32,
    /// Consecutive identical `(command, output)` pairs that count as stuck. `0` disables.
    pub stuck_threshold: u32,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            max_malformed_responses: 3,
            stuck_threshold: 3,
        }
    }
}

impl From<&AgentConfig> for StepConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_malformed_responses: cfg.max_malformed_responses,
            stuck_threshold: cfg.stuck_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// A command was run; `output.text` is the next observation.
    Executed { command: String, output: ExecOutput },
    /// The reply was refused and the model will be asked again.
    Rejected {
        completion: String,
        reason: MalformedReason,
    },
    /// The model sent a terminal signal.
    GoalAchieved { signal: String },
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Iteration number (1-indexed).
    pub iter: u32,
    pub kind: StepKind,
}

/// Observation sent back after a refused reply.
pub fn rejection_notice(reason: MalformedReason) -> String {
    format!(
        "Your previous reply was not a usable command ({reason}). Reply with a single bare shell command, or 'done' if the goal is achieved."
    )
}

/// The agent's collaborators plus its guard settings.
pub struct Agent<B, E> {
    client: CompletionClient<B>,
    executor: E,
    prompts: PromptBuilder,
    transcript: Option<TranscriptWriter>,
    config: StepConfig,
}

impl<B: CompletionBackend, E: CommandExecutor> Agent<B, E> {
    pub fn new(client: CompletionClient<B>, executor: E, prompts: PromptBuilder) -> Self {
        Self {
            client,
            executor,
            prompts,
            transcript: None,
            config: StepConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transcript(mut self, transcript: TranscriptWriter) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn client(&self) -> &CompletionClient<B> {
        &self.client
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Fresh state for `goal`.
    pub fn start(&self, goal: &Goal) -> AgentState {
        AgentState::new(goal, self.config.stuck_threshold)
    }

    /// Run one iteration of the state machine.
    ///
    /// Backend failures, a detected loop and too many unusable replies are errors;
    /// a failing command is not.
    #[instrument(skip_all, fields(iter = state.iter + 1))]
    pub fn step(&self, state: &mut AgentState) -> Result<StepOutcome> {
        if state.is_done() {
            bail!("agent already reached its goal");
        }
        state.iter += 1;
        let iter = state.iter;

        let prompt = self.prompts.build(&PromptInputs {
            history: state.history.as_str(),
            observation: &state.current_output,
            last_command: state.last_command.as_deref(),
            previous_command: state.previous_command.as_deref(),
        });

        let completion = match self.client.complete(&prompt) {
            Ok(completion) => completion,
            Err(err) => {
                self.record(&IterationRecord {
                    iter,
                    prompt: &prompt,
                    completion: None,
                    output: None,
                    meta: None,
                })?;
                return Err(err).context("request next command from model backend");
            }
        };

        // Every reply lands in history, rejected ones included.
        if !state.history.record(&state.current_output, &completion) {
            debug!("duplicate exchange not appended to history");
        }

        match classify_proposal(&completion) {
            Proposal::Done => {
                info!(signal = %completion, "model signalled completion");
                state.phase = AgentPhase::Done;
                state.malformed_streak = 0;
                let meta = IterationMeta::GoalAchieved {
                    signal: completion.clone(),
                };
                self.record(&IterationRecord {
                    iter,
                    prompt: &prompt,
                    completion: Some(&completion),
                    output: None,
                    meta: Some(&meta),
                })?;
                Ok(StepOutcome {
                    iter,
                    kind: StepKind::GoalAchieved { signal: completion },
                })
            }
            Proposal::Malformed { text, reason } => {
                state.malformed_streak += 1;
                warn!(%reason, streak = state.malformed_streak, "rejected model reply");
                state.current_output = rejection_notice(reason);
                let meta = IterationMeta::Rejected { reason };
                self.record(&IterationRecord {
                    iter,
                    prompt: &prompt,
                    completion: Some(&completion),
                    output: None,
                    meta: Some(&meta),
                })?;
                if state.malformed_streak > self.config.max_malformed_responses {
                    return Err(MalformedResponseError {
                        attempts: state.malformed_streak,
                        last: text,
                        reason,
                    }
                    .into());
                }
                Ok(StepOutcome {
                    iter,
                    kind: StepKind::Rejected {
                        completion: text,
                        reason,
                    },
                })
            }
            Proposal::Command(command) => {
                state.malformed_streak = 0;
                info!(command = %command, "executing command");
                state.phase = AgentPhase::Executing;
                let started = Instant::now();
                let output = self.executor.execute(&command);
                let duration_ms = started.elapsed().as_millis() as u64;
                state.phase = AgentPhase::AwaitingCommand;
                state.previous_command = state.last_command.replace(command.clone());
                state.current_output = output.text.clone();

                let meta = IterationMeta::executed(&command, &output, duration_ms);
                self.record(&IterationRecord {
                    iter,
                    prompt: &prompt,
                    completion: Some(&completion),
                    output: Some(&output.text),
                    meta: Some(&meta),
                })?;

                if let Some(repeats) = state.stuck.observe(&command, &output.text) {
                    return Err(LoopDetectedError { command, repeats }.into());
                }
                Ok(StepOutcome {
                    iter,
                    kind: StepKind::Executed { command, output },
                })
            }
        }
    }

    fn record(&self, record: &IterationRecord<'_>) -> Result<()> {
        if let Some(transcript) = &self.transcript {
            transcript
                .write_iteration(record)
                .context("write iteration transcript")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::completion::BackendError;
    use crate::io::prompt::REPEAT_NOTICE;
    use crate::test_support::{ScriptedBackend, ScriptedExecutor, scripted_agent};

    fn goal() -> Goal {
        Goal::new("list files").expect("goal")
    }

    #[test]
    fn first_prompt_uses_goal_as_observation() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["ls"]),
            ScriptedExecutor::texts(["a.txt\n"]),
        );
        let mut state = agent.start(&goal());

        let outcome = agent.step(&mut state).expect("step");

        assert_eq!(
            outcome,
            StepOutcome {
                iter: 1,
                kind: StepKind::Executed {
                    command: "ls".to_string(),
                    output: ExecOutput::ok("a.txt\n"),
                },
            }
        );
        let prompts = agent.client().backend().prompts();
        assert!(prompts[0].starts_with("Human: Initial Goal: list files\n\nHuman: list files\n\n"));
        assert_eq!(
            state.history.as_str(),
            "Initial Goal: list files\n\nHuman: list files\nAssistant: ls"
        );
        assert_eq!(state.current_output, "a.txt\n");
        assert_eq!(state.last_command.as_deref(), Some("ls"));
        assert_eq!(state.phase, AgentPhase::AwaitingCommand);
    }

    #[test]
    fn terminal_signal_finishes_without_executing() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["DONE"]),
            ScriptedExecutor::default(),
        );
        let mut state = agent.start(&goal());

        let outcome = agent.step(&mut state).expect("step");

        assert_eq!(
            outcome.kind,
            StepKind::GoalAchieved {
                signal: "DONE".to_string()
            }
        );
        assert!(state.is_done());
        assert!(agent.executor().commands().is_empty());
        assert!(state.history.as_str().ends_with("Assistant: DONE"));
        assert!(agent.step(&mut state).is_err());
    }

    #[test]
    fn backend_error_is_fatal_and_named() {
        let agent = scripted_agent(
            ScriptedBackend::new([Err(BackendError::Status {
                status: 503,
                body: "overloaded".to_string(),
            })]),
            ScriptedExecutor::default(),
        );
        let mut state = agent.start(&goal());

        let err = agent.step(&mut state).unwrap_err();

        assert!(format!("{err:#}").contains("request next command from model backend"));
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Status { status: 503, .. })
        ));
        assert!(agent.executor().commands().is_empty());
        assert_eq!(state.history.as_str(), "Initial Goal: list files");
    }

    #[test]
    fn malformed_reply_is_rejected_then_recovered() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["```sh\nls", "ls"]),
            ScriptedExecutor::texts(["a\n"]),
        );
        let mut state = agent.start(&goal());

        let first = agent.step(&mut state).expect("step");
        assert!(matches!(
            first.kind,
            StepKind::Rejected {
                reason: MalformedReason::CodeFence,
                ..
            }
        ));
        assert_eq!(state.current_output, rejection_notice(MalformedReason::CodeFence));
        assert!(agent.executor().commands().is_empty());

        let second = agent.step(&mut state).expect("step");
        assert!(matches!(second.kind, StepKind::Executed { .. }));
        assert_eq!(agent.executor().commands(), vec!["ls".to_string()]);
        let prompts = agent.client().backend().prompts();
        assert!(prompts[1].contains("not a usable command"));
    }

    #[test]
    fn too_many_malformed_replies_abort() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["", "", ""]),
            ScriptedExecutor::default(),
        )
        .with_config(StepConfig {
            max_malformed_responses: 2,
            stuck_threshold: 0,
        });
        let mut state = agent.start(&goal());

        agent.step(&mut state).expect("first rejection");
        agent.step(&mut state).expect("second rejection");
        let err = agent.step(&mut state).unwrap_err();

        let malformed = err
            .downcast_ref::<MalformedResponseError>()
            .expect("malformed error");
        assert_eq!(malformed.attempts, 3);
        assert_eq!(malformed.reason, MalformedReason::Empty);
    }

    #[test]
    fn identical_exchanges_trip_the_stuck_guard() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["cat x", "cat x", "cat x"]),
            ScriptedExecutor::texts(["same\n", "same\n", "same\n"]),
        );
        let mut state = agent.start(&goal());

        agent.step(&mut state).expect("step 1");
        agent.step(&mut state).expect("step 2");
        let err = agent.step(&mut state).unwrap_err();

        let stuck = err.downcast_ref::<LoopDetectedError>().expect("loop error");
        assert_eq!(stuck.command, "cat x");
        assert_eq!(stuck.repeats, 3);
    }

    #[test]
    fn repeat_notice_follows_command_equal_to_output() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["echo x", "ls"]),
            ScriptedExecutor::texts(["echo x", "a\n"]),
        );
        let mut state = agent.start(&goal());

        agent.step(&mut state).expect("step 1");
        agent.step(&mut state).expect("step 2");

        let prompts = agent.client().backend().prompts();
        assert!(!prompts[0].contains(REPEAT_NOTICE));
        assert!(prompts[1].contains(REPEAT_NOTICE));
        assert_eq!(state.previous_command.as_deref(), Some("echo x"));
    }

    #[test]
    fn transcript_captures_each_iteration() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = TranscriptWriter::with_run_id(temp.path(), "run-t").expect("writer");
        let agent = scripted_agent(
            ScriptedBackend::completions(["ls", "done"]),
            ScriptedExecutor::texts(["a\n"]),
        )
        .with_transcript(writer);
        let mut state = agent.start(&goal());

        agent.step(&mut state).expect("step 1");
        agent.step(&mut state).expect("step 2");

        let run_dir = temp.path().join("run-t");
        let output = std::fs::read_to_string(run_dir.join("1/output.txt")).expect("output");
        assert_eq!(output, "a\n");
        let completion = std::fs::read_to_string(run_dir.join("2/completion.txt")).expect("read");
        assert_eq!(completion, "done");
        assert!(!run_dir.join("2/output.txt").exists());
    }

    #[test]
    fn failed_transcript_write_keeps_executed_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = TranscriptWriter::with_run_id(temp.path(), "run-x").expect("writer");
        // A plain file where the run directory should be makes every write fail.
        std::fs::remove_dir(writer.run_dir()).expect("remove run dir");
        std::fs::write(writer.run_dir(), "").expect("block run dir");
        let agent = scripted_agent(
            ScriptedBackend::completions(["ls"]),
            ScriptedExecutor::texts(["a\n"]),
        )
        .with_transcript(writer);
        let mut state = agent.start(&goal());

        let err = agent.step(&mut state).unwrap_err();

        assert!(format!("{err:#}").contains("write iteration transcript"));
        assert_eq!(agent.executor().commands(), vec!["ls".to_string()]);
        assert_eq!(state.last_command.as_deref(), Some("ls"));
        assert_eq!(state.current_output, "a\n");
        assert_eq!(state.phase, AgentPhase::AwaitingCommand);
    }
}
