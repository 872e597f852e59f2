//! The agent loop: step until the model says it is done.

use anyhow::Result;
use tracing::info;

use crate::cancel::CancelToken;
use crate::core::types::Goal;
use crate::io::completion::CompletionBackend;
use crate::io::shell::CommandExecutor;
use crate::step::{Agent, StepKind, StepOutcome};

/// Reason why `run_loop` stopped without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The model sent a terminal signal.
    GoalAchieved,
    /// The run hit the configured `max_iterations`.
    MaxIterations { max_iterations: u32 },
    /// The cancel token was set.
    Cancelled,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Model calls made.
    pub iterations: u32,
    /// Commands actually executed.
    pub steps_executed: u32,
    pub stop: LoopStop,
    /// Final transcript text.
    pub history: String,
}

/// Opt-in bounds. The default runs until the model signals completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: Option<u32>,
}

/// Run steps until the goal is achieved, a bound is hit, or a step fails.
///
/// `on_step` sees every step as it completes. Errors from a step (backend failure,
/// loop detection, repeated unusable replies) end the loop immediately.
pub fn run_loop<B, E, F>(
    agent: &Agent<B, E>,
    goal: &Goal,
    config: &LoopConfig,
    cancel: &CancelToken,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    B: CompletionBackend,
    E: CommandExecutor,
    F: FnMut(&StepOutcome),
{
    let mut state = agent.start(goal);
    let mut steps_executed = 0u32;

    loop {
        let stop = if cancel.is_cancelled() {
            Some(LoopStop::Cancelled)
        } else {
            config
                .max_iterations
                .filter(|max| state.iter >= *max)
                .map(|max_iterations| LoopStop::MaxIterations { max_iterations })
        };
        if let Some(stop) = stop {
            info!(?stop, iterations = state.iter, "loop stopped early");
            return Ok(LoopOutcome {
                iterations: state.iter,
                steps_executed,
                stop,
                history: state.history.as_str().to_string(),
            });
        }

        let step = agent.step(&mut state)?;
        if matches!(step.kind, StepKind::Executed { .. }) {
            steps_executed += 1;
        }
        on_step(&step);

        if state.is_done() {
            info!(iterations = state.iter, steps_executed, "goal achieved");
            return Ok(LoopOutcome {
                iterations: state.iter,
                steps_executed,
                stop: LoopStop::GoalAchieved,
                history: state.history.as_str().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, ScriptedExecutor, scripted_agent};

    fn goal() -> Goal {
        Goal::new("make a file").expect("goal")
    }

    #[test]
    fn loop_stops_on_terminal_signal() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["touch a", "ls", "Complete"]),
            ScriptedExecutor::texts(["", "a\n"]),
        );
        let mut seen = Vec::new();

        let outcome = run_loop(
            &agent,
            &goal(),
            &LoopConfig::default(),
            &CancelToken::new(),
            |step| seen.push(step.iter),
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::GoalAchieved);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(
            outcome.history,
            "Initial Goal: make a file\n\nHuman: make a file\nAssistant: touch a\n\nHuman: \nAssistant: ls\n\nHuman: a\n\nAssistant: Complete"
        );
    }

    #[test]
    fn loop_stops_at_max_iterations() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["ls", "ls -a", "pwd"]),
            ScriptedExecutor::texts(["a\n", "b\n", "c\n"]),
        );

        let outcome = run_loop(
            &agent,
            &goal(),
            &LoopConfig {
                max_iterations: Some(2),
            },
            &CancelToken::new(),
            |_| {},
        )
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterations { max_iterations: 2 }
        );
        assert_eq!(agent.client().backend().calls(), 2);
    }

    #[test]
    fn cancellation_is_checked_before_each_model_call() {
        let agent = scripted_agent(
            ScriptedBackend::completions(["ls", "ls -a"]),
            ScriptedExecutor::texts(["a\n", "b\n"]),
        );
        let cancel = CancelToken::new();
        let handle = cancel.clone();

        let outcome = run_loop(&agent, &goal(), &LoopConfig::default(), &cancel, |_| {
            handle.cancel();
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Cancelled);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(agent.executor().commands(), vec!["ls".to_string()]);
    }

    #[test]
    fn step_errors_end_the_loop() {
        let agent = scripted_agent(
            ScriptedBackend::raw(["{\"completion\": \"ls\"}", "not json"]),
            ScriptedExecutor::texts(["a\n"]),
        );

        let err = run_loop(
            &agent,
            &goal(),
            &LoopConfig::default(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("malformed model response"));
        assert_eq!(agent.executor().commands(), vec!["ls".to_string()]);
    }
}
