//! Completion client: turns a prompt into the model's next command.
//!
//! The client owns the fixed sampling settings and the response decoding. The
//! transport sits behind [`CompletionBackend`] so the client can be driven by a
//! real HTTP endpoint, an external program, or a scripted fake in tests.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::{BackendKind, ModelConfig};
use crate::io::process::run_with_timeout;

/// Keep at most this much of an error body in [`BackendError::Status`].
const ERROR_BODY_LIMIT: usize = 2_000;
/// Output bound for the `command` backend.
const COMMAND_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// The model backend could not produce a usable completion. Always fatal to the run.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model response has no `completion` field")]
    MissingCompletion,
}

/// Fixed sampling parameters sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Stopping on newline keeps replies to a single command.
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 200,
            temperature: 0.2,
            top_p: 1.0,
            stop_sequences: vec!["\n".to_string()],
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_output_tokens == 0 {
            return Err(anyhow!("model.sampling.max_output_tokens must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(anyhow!("model.sampling.temperature must be within 0..=1"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(anyhow!("model.sampling.top_p must be within (0, 1]"));
        }
        Ok(())
    }
}

/// Wire request for a text completion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    pub max_tokens_to_sample: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

/// Transport for completion requests. Returns the raw response body.
pub trait CompletionBackend {
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

impl<T: CompletionBackend + ?Sized> CompletionBackend for Box<T> {
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        (**self).invoke(request)
    }
}

impl<T: CompletionBackend + ?Sized> CompletionBackend for &T {
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        (**self).invoke(request)
    }
}

/// Packages prompts with the sampling settings and decodes completions.
#[derive(Debug, Clone)]
pub struct CompletionClient<B> {
    backend: B,
    model: Option<String>,
    sampling: SamplingConfig,
}

impl<B: CompletionBackend> CompletionClient<B> {
    pub fn new(backend: B, sampling: SamplingConfig) -> Self {
        Self {
            backend,
            model: None,
            sampling,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn request(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            max_tokens_to_sample: self.sampling.max_output_tokens,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            stop_sequences: self.sampling.stop_sequences.clone(),
        }
    }

    /// Ask the model for a completion and return it trimmed.
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    pub fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let body = self.backend.invoke(&self.request(prompt))?;
        let completion = decode_completion(&body)?;
        debug!(completion = %completion, "received completion");
        Ok(completion)
    }
}

/// Extract and trim the `completion` field of a response body.
pub fn decode_completion(body: &str) -> Result<String, BackendError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| BackendError::MalformedResponse(format!("invalid JSON: {err}")))?;
    let object = value.as_object().ok_or_else(|| {
        BackendError::MalformedResponse("response is not a JSON object".to_string())
    })?;
    match object.get("completion") {
        None | Some(Value::Null) => Err(BackendError::MissingCompletion),
        Some(Value::String(text)) => Ok(text.trim().to_string()),
        Some(other) => Err(BackendError::MalformedResponse(format!(
            "`completion` is not a string: {other}"
        ))),
    }
}

/// Backend for a text-completion HTTP endpoint (`POST {base_url}/v1/complete`).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    api_version: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Unavailable(format!("build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/complete", base_url.trim_end_matches('/')),
            api_key,
            api_version: api_version.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CompletionBackend for HttpBackend {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", &self.api_version)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send().map_err(|err| {
            if err.is_timeout() {
                BackendError::Timeout(self.timeout)
            } else {
                BackendError::Unavailable(err.to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| BackendError::Unavailable(format!("read response body: {err}")))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model backend returned an error status");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }
        Ok(body)
    }
}

/// Backend that runs an external program per request.
///
/// The request JSON is written to the program's stdin and its stdout must be the
/// response JSON. This is how cloud SDK CLIs (or any wrapper script) plug in.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl CompletionBackend for CommandBackend {
    #[instrument(skip_all, fields(program = ?self.command.first()))]
    fn invoke(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BackendError::Unavailable("backend command is empty".to_string()))?;
        let payload = serde_json::to_vec(request)
            .map_err(|err| BackendError::Unavailable(format!("serialize request: {err}")))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            COMMAND_OUTPUT_LIMIT_BYTES,
        )
        .map_err(|err| BackendError::Unavailable(format!("{err:#}")))?;

        if output.timed_out {
            return Err(BackendError::Timeout(self.timeout));
        }
        if !output.status.success() {
            return Err(BackendError::Unavailable(format!(
                "backend command exited with {:?}: {}",
                output.status.code(),
                truncate(output.stderr_text("backend").trim(), ERROR_BODY_LIMIT)
            )));
        }
        if output.stdout_truncated > 0 {
            return Err(BackendError::MalformedResponse(format!(
                "response exceeded {COMMAND_OUTPUT_LIMIT_BYTES} bytes"
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build the backend selected in config. The HTTP API key comes from the environment.
pub fn backend_from_config(cfg: &ModelConfig) -> Result<Box<dyn CompletionBackend>> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    match cfg.backend {
        BackendKind::Http => {
            let api_key = std::env::var(&cfg.api_key_env).ok();
            if api_key.is_none() {
                warn!(env = %cfg.api_key_env, "no API key in environment; sending unauthenticated requests");
            }
            let backend = HttpBackend::new(&cfg.base_url, api_key, &cfg.api_version, timeout)?;
            debug!(endpoint = %backend.endpoint(), "using HTTP backend");
            Ok(Box::new(backend))
        }
        BackendKind::Command => {
            debug!(command = ?cfg.command, "using command backend");
            Ok(Box::new(CommandBackend::new(cfg.command.clone(), timeout)))
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}[truncated {} bytes]", &text[..end], text.len() - end)
}
