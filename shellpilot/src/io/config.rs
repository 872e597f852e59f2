//! Agent configuration stored in `shellpilot.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::repeat::RepeatPolicy;
use crate::io::completion::SamplingConfig;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "shellpilot.toml";

/// Agent configuration (TOML).
///
/// Every field has a default, so an empty or missing file is a valid config.
/// Loop bounds are opt-in: with the defaults the run only ends when the model says
/// `done` (or gets stuck).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Stop after this many model calls. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Abort after this many consecutive identical (command, output) pairs.
    /// `0` disables the guard.
    pub stuck_threshold: u32,

    /// Abort after more than this many consecutive unusable replies.
    pub max_malformed_responses: u32,

    /// Which comparison adds the "pick a different command" notice to the prompt.
    pub repeat_policy: RepeatPolicy,

    /// OS family named in the instructions. Derived from the host when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,

    /// Write per-iteration transcripts under this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,

    pub shell: ShellConfig,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell argv prefix; the command is passed as the final argument.
    pub command: Vec<String>,

    /// Working directory for every command. Defaults to the current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Kill a command after this many seconds.
    pub command_timeout_secs: u64,

    /// Keep at most this many bytes of command output.
    pub output_limit_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: vec!["sh".to_string(), "-c".to_string()],
            workdir: None,
            command_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

/// How completions are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Text-completion HTTP endpoint.
    #[default]
    Http,
    /// External program speaking JSON on stdin/stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: BackendKind,

    /// Base URL of the HTTP backend (`/v1/complete` is appended).
    pub base_url: String,

    /// Model identifier sent with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Value of the `anthropic-version` header.
    pub api_version: String,

    /// Program (and args) for the `command` backend.
    pub command: Vec<String>,

    /// Give up on a model call after this many seconds.
    pub request_timeout_secs: u64,

    pub sampling: SamplingConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            base_url: "https://api.anthropic.com".to_string(),
            model: Some("claude-2.1".to_string()),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_version: "2023-06-01".to_string(),
            command: Vec::new(),
            request_timeout_secs: 2 * 60,
            sampling: SamplingConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            stuck_threshold: 3,
            max_malformed_responses: 3,
            repeat_policy: RepeatPolicy::default(),
            os_family: None,
            transcript_dir: None,
            shell: ShellConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.stuck_threshold == 1 {
            return Err(anyhow!("stuck_threshold must be 0 (disabled) or >= 2"));
        }
        if self.shell.command.is_empty() || self.shell.command[0].trim().is_empty() {
            return Err(anyhow!("shell.command must be a non-empty array"));
        }
        if self.shell.command_timeout_secs == 0 {
            return Err(anyhow!("shell.command_timeout_secs must be > 0"));
        }
        if self.shell.output_limit_bytes == 0 {
            return Err(anyhow!("shell.output_limit_bytes must be > 0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        match self.model.backend {
            BackendKind::Http => {
                if self.model.base_url.trim().is_empty() {
                    return Err(anyhow!("model.base_url must not be empty"));
                }
            }
            BackendKind::Command => {
                if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
                    return Err(anyhow!(
                        "model.command must be a non-empty array when backend = \"command\""
                    ));
                }
            }
        }
        self.model.sampling.validate()
    }

    /// OS family for the instructions: configured value or the host's.
    pub fn os_family(&self) -> String {
        self.os_family
            .clone()
            .unwrap_or_else(|| host_os_family().to_string())
    }
}

fn host_os_family() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        "freebsd" | "openbsd" | "netbsd" | "dragonfly" => "BSD",
        other => other,
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.max_iterations, None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shellpilot.toml");
        let cfg = AgentConfig {
            max_iterations: Some(25),
            transcript_dir: Some(PathBuf::from("transcripts")),
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shellpilot.toml");
        fs::write(
            &path,
            "repeat_policy = \"repeated-command\"\n\n[model]\nbackend = \"command\"\ncommand = [\"./complete.sh\"]\n\n[model.sampling]\nmax_output_tokens = 64\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.repeat_policy, RepeatPolicy::RepeatedCommand);
        assert_eq!(cfg.model.backend, BackendKind::Command);
        assert_eq!(cfg.model.sampling.max_output_tokens, 64);
        assert_eq!(cfg.model.sampling.stop_sequences, vec!["\n".to_string()]);
        assert_eq!(cfg.shell, ShellConfig::default());
    }

    #[test]
    fn command_backend_requires_a_program() {
        let cfg = AgentConfig {
            model: ModelConfig {
                backend: BackendKind::Command,
                ..ModelConfig::default()
            },
            ..AgentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("model.command"));
    }

    #[test]
    fn stuck_threshold_of_one_is_rejected() {
        let cfg = AgentConfig {
            stuck_threshold: 1,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn configured_os_family_wins() {
        let cfg = AgentConfig {
            os_family: Some("FreeBSD".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(cfg.os_family(), "FreeBSD");
    }
}
