//! Scripted collaborators for driving the agent without a model or a shell.

use std::cell::RefCell;
use std::collections::VecDeque;

use serde_json::json;

use crate::core::types::ExecOutput;
use crate::io::completion::{
    BackendError, CompletionBackend, CompletionClient, CompletionRequest, SamplingConfig,
};
use crate::io::prompt::PromptBuilder;
use crate::io::shell::CommandExecutor;
use crate::step::Agent;

/// Backend that replays queued response bodies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, BackendError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new(responses: impl IntoIterator<Item = Result<String, BackendError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Well-formed `{"completion": ...}` bodies, one per call.
    pub fn completions<I, S>(completions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            completions
                .into_iter()
                .map(|text| Ok(json!({ "completion": text.as_ref() }).to_string())),
        )
    }

    /// Raw response bodies, one per call.
    pub fn raw<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(bodies.into_iter().map(|body| Ok(body.into())))
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unavailable("script exhausted".to_string())))
    }
}

/// Executor that replays queued outputs and records every command it was given.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outputs: RefCell<VecDeque<ExecOutput>>,
    commands: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: impl IntoIterator<Item = ExecOutput>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into_iter().collect()),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Successful outputs with the given texts.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(ExecOutput::ok))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, command: &str) -> ExecOutput {
        self.commands.borrow_mut().push(command.to_string());
        self.outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ExecOutput::failed("scripted executor exhausted", None))
    }
}

/// Agent with default sampling and a Linux instruction block.
pub fn scripted_agent<E: CommandExecutor>(
    backend: ScriptedBackend,
    executor: E,
) -> Agent<ScriptedBackend, E> {
    let prompts = PromptBuilder::new("Linux").expect("render instructions");
    Agent::new(
        CompletionClient::new(backend, SamplingConfig::default()),
        executor,
        prompts,
    )
}

/// Fresh scratch directory for commands that touch the filesystem.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}
