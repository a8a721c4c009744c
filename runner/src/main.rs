//! Bounded agent runner CLI.
//!
//! Runs a documentation-style agent over a working directory with a step
//! budget, a tool-call budget and todo-driven finalization.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use bounded_runner::core::event::{NormalizedEvent, normalize};
use bounded_runner::core::markers::STEP_LIMIT_MARKER;
use bounded_runner::exit_codes;
use bounded_runner::io::config::{
    DEFAULT_CONFIG_PATH, RunnerConfig, load_effective_config, write_config,
};
use bounded_runner::logging;
use bounded_runner::run::{RunOutcome, RunStop, execute_task};

#[derive(Parser)]
#[command(
    name = "bounded-runner",
    version,
    about = "Budgeted LLM agent runner over a sandboxed working directory"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run one task to completion.
    Run {
        /// Task given to the agent as the first user message.
        #[arg(short, long)]
        task: String,
        /// Directory the agent may read and write.
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Print the full run outcome as JSON instead of the response text.
        #[arg(long)]
        json: bool,
    },
    /// Normalize raw events (JSON lines) and print one view per line.
    Normalize {
        /// Input file; stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run {
            task,
            workdir,
            config,
            json,
        } => cmd_run(&config, &task, &workdir, json).await,
        Command::Normalize { input } => cmd_normalize(input.as_deref()),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &RunnerConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

async fn cmd_run(config_path: &Path, task: &str, workdir: &Path, json: bool) -> Result<i32> {
    let config = load_effective_config(config_path)?;
    let outcome = execute_task(&config, task, workdir, report_progress).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("serialize run outcome")?
        );
    } else {
        println!("{}", outcome.response.trim());
    }
    if let RunStop::Failed { message } = &outcome.stop {
        eprintln!("run failed: {message}");
    }
    Ok(exit_code(&outcome))
}

fn report_progress(event: &NormalizedEvent) {
    let Some(last) = event.last_message() else {
        return;
    };
    for call in &last.tool_calls {
        eprintln!("[{}] tool {} {}", event.active_label, call.name, call.args.display());
    }
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match &outcome.stop {
        RunStop::Failed { .. } => exit_codes::FAILED,
        RunStop::Completed { marker } if marker == STEP_LIMIT_MARKER => exit_codes::STEP_LIMIT,
        RunStop::Completed { .. } | RunStop::Finished => exit_codes::OK,
    }
}

fn cmd_normalize(input: Option<&Path>) -> Result<i32> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(io::BufReader::new(
            fs::File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("read event line")?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("parse event on line {}", index + 1))?;
        let view = serde_json::to_string(&normalize(&raw)).context("serialize event")?;
        writeln!(out, "{view}").context("write stdout")?;
    }
    Ok(exit_codes::OK)
}
