//! Autonomous task agent.
//!
//! `autopilot run` drives a goal through reflect / decide / act iterations
//! until a stopping criterion fires. Sessions are checkpointed under
//! `.autopilot/` and can be resumed, optionally with a clarification.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use autopilot::{cli, exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Decision-and-execution core for an autonomous task agent"
)]
struct Cli {
    /// Config file (default: `.autopilot/config.toml` in the workspace).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session for a goal.
    Run {
        #[arg(long)]
        goal: String,
        /// Ask for clarification instead of stopping on soft criteria.
        #[arg(long)]
        interactive: bool,
    },
    /// Continue a checkpointed session.
    Resume {
        session_id: String,
        #[arg(long)]
        clarification: Option<String>,
    },
    /// Rank alternatives from a JSON array file.
    Evaluate {
        candidates: PathBuf,
        #[arg(long)]
        goal: String,
        /// The file holds multi-step candidate paths instead of alternatives.
        #[arg(long)]
        paths: bool,
    },
    /// Classify a tool error from a JSON file (`{"call": .., "error": ..}`).
    Classify { error: PathBuf },
    /// Show the learned weight vector for a task category.
    Weights { category: String },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve workspace root")?;
    let config = cli.config.as_deref();
    match cli.command {
        Command::Run { goal, interactive } => cli::run_goal(&root, &goal, interactive, config),
        Command::Resume {
            session_id,
            clarification,
        } => cli::resume_session(&root, &session_id, clarification, config),
        Command::Evaluate {
            candidates,
            goal,
            paths,
        } => cli::evaluate_file(&root, &candidates, &goal, paths, config),
        Command::Classify { error } => cli::classify_file(&error),
        Command::Weights { category } => cli::show_weights(&root, &category, config),
    }
}
