//! Per-iteration transcript artifacts under `{transcript_dir}/{run_id}/{iter}/`.
//!
//! Artifacts are debugging aids only. Nothing reads them back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{ExecOutput, MalformedReason};

const RUN_ID_SUFFIX_LEN: usize = 6;

/// Generate `run_{UTC %Y%m%d_%H%M%S}_{6 lowercase alnum}`.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RUN_ID_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("run_{stamp}_{suffix}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationMeta {
    Executed {
        command: String,
        success: bool,
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: u64,
    },
    Rejected {
        reason: MalformedReason,
    },
    GoalAchieved {
        signal: String,
    },
}

impl IterationMeta {
    pub fn executed(command: &str, output: &ExecOutput, duration_ms: u64) -> Self {
        Self::Executed {
            command: command.to_string(),
            success: output.success,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub completion_path: PathBuf,
    pub output_path: PathBuf,
    pub meta_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, run_id: &str, iter: u32) -> Self {
        let dir = root.join(run_id).join(iter.to_string());
        Self {
            prompt_path: dir.join("prompt.txt"),
            completion_path: dir.join("completion.txt"),
            output_path: dir.join("output.txt"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// What one iteration produced. `completion` is `None` when the backend failed.
pub struct IterationRecord<'a> {
    pub iter: u32,
    pub prompt: &'a str,
    pub completion: Option<&'a str>,
    pub output: Option<&'a str>,
    pub meta: Option<&'a IterationMeta>,
}

/// Writes transcripts for a single run.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    root: PathBuf,
    run_id: String,
}

impl TranscriptWriter {
    /// Start a run under `root` with a freshly generated run id.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_run_id(root, new_run_id())
    }

    pub fn with_run_id(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Result<Self> {
        let writer = Self {
            root: root.into(),
            run_id: run_id.into(),
        };
        let run_dir = writer.run_dir();
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create transcript dir {}", run_dir.display()))?;
        debug!(run_dir = %run_dir.display(), "transcripts enabled");
        Ok(writer)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(&self.run_id)
    }

    pub fn write_iteration(&self, record: &IterationRecord<'_>) -> Result<IterationPaths> {
        let paths = IterationPaths::new(&self.root, &self.run_id, record.iter);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

        write_text(&paths.prompt_path, record.prompt)?;
        if let Some(completion) = record.completion {
            write_text(&paths.completion_path, completion)?;
        }
        if let Some(output) = record.output {
            write_text(&paths.output_path, output)?;
        }
        if let Some(meta) = record.meta {
            write_json(&paths.meta_path, meta)?;
        }
        Ok(paths)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_text(path, &buf)
}
