//! Autonomous shell-command agent.
//!
//! `shellpilot run <GOAL>` asks a language model for one shell command at a time,
//! runs it, and feeds the output back until the model answers `done`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use shellpilot::cancel::CancelToken;
use shellpilot::core::types::Goal;
use shellpilot::exit_codes;
use shellpilot::io::completion::{BackendError, CompletionClient, backend_from_config};
use shellpilot::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use shellpilot::io::prompt::PromptBuilder;
use shellpilot::io::shell::ShellExecutor;
use shellpilot::io::transcript::TranscriptWriter;
use shellpilot::logging;
use shellpilot::looping::{LoopConfig, LoopStop, run_loop};
use shellpilot::step::{
    Agent, LoopDetectedError, MalformedResponseError, StepConfig, StepKind, StepOutcome,
};

#[derive(Parser)]
#[command(
    name = "shellpilot",
    version,
    about = "Let a language model drive a shell, one command at a time"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work towards a goal until the model says it is done.
    Run(RunArgs),
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// The goal, in plain language. Multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    goal: Vec<String>,

    /// Stop after this many model calls.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Run commands in this directory.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Write per-iteration transcripts under this directory.
    #[arg(long)]
    transcript_dir: Option<PathBuf>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&cli.config, args),
        Command::Init { force } => cmd_init(&cli.config, force).map(|()| exit_codes::OK),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let cfg = resolve_config(load_config(config_path)?, &args)?;
    let goal = Goal::new(args.goal.join(" "))?;

    let backend = backend_from_config(&cfg.model).context("configure model backend")?;
    let client = CompletionClient::new(backend, cfg.model.sampling.clone())
        .with_model(cfg.model.model.clone());
    let prompts =
        PromptBuilder::new(&cfg.os_family())?.with_repeat_check(cfg.repeat_policy.check());
    let mut agent = Agent::new(client, ShellExecutor::from_config(&cfg.shell), prompts)
        .with_config(StepConfig::from(&cfg));
    if let Some(dir) = &cfg.transcript_dir {
        let transcript = TranscriptWriter::create(dir)?;
        info!(run_id = %transcript.run_id(), dir = %dir.display(), "writing transcripts");
        agent = agent.with_transcript(transcript);
    }

    let outcome = run_loop(
        &agent,
        &goal,
        &LoopConfig {
            max_iterations: cfg.max_iterations,
        },
        &CancelToken::new(),
        report_step,
    )?;

    match outcome.stop {
        LoopStop::GoalAchieved => {
            println!("Goal achieved.");
            Ok(exit_codes::OK)
        }
        LoopStop::MaxIterations { max_iterations } => {
            eprintln!("stopped after {max_iterations} iterations without reaching the goal");
            Ok(exit_codes::STOPPED)
        }
        LoopStop::Cancelled => {
            eprintln!("cancelled after {} iterations", outcome.iterations);
            Ok(exit_codes::STOPPED)
        }
    }
}

/// Apply command-line overrides on top of the file config.
fn resolve_config(mut cfg: AgentConfig, args: &RunArgs) -> Result<AgentConfig> {
    if let Some(max) = args.max_iterations {
        cfg.max_iterations = Some(max);
    }
    if let Some(dir) = &args.workdir {
        cfg.shell.workdir = Some(dir.clone());
    }
    if let Some(dir) = &args.transcript_dir {
        cfg.transcript_dir = Some(dir.clone());
    }
    cfg.validate().context("invalid command-line overrides")?;
    Ok(cfg)
}

fn report_step(step: &StepOutcome) {
    match &step.kind {
        StepKind::Executed { command, output } => {
            println!("Executing: {command}");
            println!("Command output: {}", output.text);
        }
        StepKind::Rejected { completion, reason } => {
            println!("Rejected reply ({reason}): {completion}");
        }
        StepKind::GoalAchieved { .. } => {}
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<BackendError>().is_some() {
        exit_codes::BACKEND
    } else if err.downcast_ref::<LoopDetectedError>().is_some()
        || err.downcast_ref::<MalformedResponseError>().is_some()
    {
        exit_codes::STUCK
    } else {
        exit_codes::INVALID
    }
}
