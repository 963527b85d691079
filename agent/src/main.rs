//! Bash agent CLI.
//!
//! Runs one task given on the command line, or a short demo set when no task
//! words are given. Progress goes to stdout; diagnostics go to stderr via
//! `RUST_LOG`.

use anyhow::{Context, Result};
use bash_agent::agent_loop::{AgentLoop, LoopEvent, LoopStop, TaskSettings};
use bash_agent::core::channels::TextChannelDecoder;
use bash_agent::core::sniffer::Sniffer;
use bash_agent::io::config::{
    AgentConfig, EndpointConfig, config_path_from_env, load_config, write_config,
};
use bash_agent::io::model::HttpModelClient;
use bash_agent::io::shell::SubprocessShell;
use bash_agent::logging;
use clap::Parser;
use std::path::Path;
use tracing::error;

const DEMO_TASKS: [&str; 3] = [
    "Check what folders are available in this directory",
    "Find all Python files and count how many there are",
    "Show me the first 5 lines of README.md",
];

const REASONING_PREVIEW_CHARS: usize = 200;
const OUTPUT_PREVIEW_CHARS: usize = 500;

#[derive(Parser)]
#[command(
    name = "bash-agent",
    version,
    about = "Autonomous bash agent for a chat-completions model"
)]
struct Cli {
    /// Write default settings to the config file (`BASH_AGENT_CONFIG`) and exit.
    #[arg(long)]
    init_config: bool,

    /// With `--init-config`, overwrite an existing file.
    #[arg(long, requires = "init_config")]
    force: bool,

    /// Task to run; words are joined with spaces. Runs the demo tasks if empty.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    task: Vec<String>,
}

impl Cli {
    fn task(&self) -> Option<String> {
        let task = self.task.join(" ");
        let task = task.trim();
        (!task.is_empty()).then(|| task.to_string())
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if cli.init_config {
        let path = config_path_from_env();
        match init_config(&path, cli.force) {
            Ok(true) => println!("Wrote {}", path.display()),
            Ok(false) => println!("{} already exists (use --force to overwrite)", path.display()),
            Err(err) => {
                eprintln!("{err:#}");
                std::process::exit(1);
            }
        }
        return;
    }

    let agent = match build_agent() {
        Ok(agent) => agent,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    let (tasks, max_iterations) = match cli.task() {
        Some(task) => (vec![task], agent.config.max_iterations),
        None => (
            DEMO_TASKS.iter().map(|t| t.to_string()).collect(),
            agent.config.demo_max_iterations,
        ),
    };

    let settings = TaskSettings {
        max_iterations,
        workdir: agent.workdir.clone(),
        start_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
    };

    for task in &tasks {
        run_one(&agent.runner, task, &settings);
    }
}

struct Agent {
    config: AgentConfig,
    workdir: std::path::PathBuf,
    runner: AgentLoop<HttpModelClient, SubprocessShell>,
}

fn build_agent() -> Result<Agent> {
    let config_path = config_path_from_env();
    let config = load_config(&config_path)
        .with_context(|| format!("load settings from {}", config_path.display()))?;
    let endpoint = EndpointConfig::from_env()?;
    let workdir = config.resolve_workdir()?;

    let model = HttpModelClient::new(endpoint, config.clone())?;
    let shell = SubprocessShell::new(config.command_timeout(), config.output_limit_bytes);
    let sniffer = Sniffer::new(config.tool_name.clone(), Some(Box::new(TextChannelDecoder)));
    Ok(Agent {
        config,
        workdir,
        runner: AgentLoop::new(model, shell, sniffer),
    })
}

/// Write default settings to `path`. Returns false if the file exists and `force` is unset.
fn init_config(path: &Path, force: bool) -> Result<bool> {
    if !force && path.exists() {
        return Ok(false);
    }
    write_config(path, &AgentConfig::default())?;
    Ok(true)
}

fn run_one(runner: &AgentLoop<HttpModelClient, SubprocessShell>, task: &str, settings: &TaskSettings) {
    println!("{}", "=".repeat(60));
    println!("Task: {task}");
    println!("{}", "=".repeat(60));

    let result = runner.run_task(task, settings, print_event);
    match result {
        Ok(outcome) => {
            match outcome.stop {
                LoopStop::Done => println!("\nTask completed in {} iteration(s)", outcome.iterations),
                LoopStop::MaxIterations => {
                    println!("\nStopped after {} iteration(s) (limit reached)", outcome.iterations);
                }
            }
            match outcome.final_answer {
                Some(answer) => println!("\nFinal answer:\n{answer}"),
                None => println!("\nNo final answer."),
            }
            println!("Commands run: {}", outcome.commands_run);
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "task aborted");
            println!("\nError talking to the model: {err:#}");
        }
    }
    println!();
}

fn print_event(event: &LoopEvent<'_>) {
    match event {
        LoopEvent::IterationStarted {
            iteration,
            max_iterations,
        } => println!("\n--- Iteration {iteration}/{max_iterations} ---"),
        LoopEvent::Reasoning(text) => {
            println!("Analysis: {}", preview(text, REASONING_PREVIEW_CHARS));
        }
        LoopEvent::CommandStarted(candidate) => println!("Executing: {}", candidate.command),
        LoopEvent::CommandFinished { result, .. } => {
            println!("Exit code: {}", result.exit_code);
            println!("Output:\n{}", preview(&result.output, OUTPUT_PREVIEW_CHARS));
        }
        LoopEvent::FinalAnswer(_) => println!("Model answered."),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
