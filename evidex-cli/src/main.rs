//! Evidex CLI: run an evidence research request from the terminal.

mod commands;
mod render;

use clap::Parser;
use evidex_core::{Pico, ResearchMode, TaskInput};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Evidex: evidence research with grounded synthesis
#[derive(Parser, Debug)]
#[command(name = "evidex", version, about, long_about = None)]
struct Cli {
    /// Research question (may be omitted when PICO fields are given)
    query: Option<String>,

    /// PICO population
    #[arg(long)]
    population: Option<String>,

    /// PICO intervention
    #[arg(long)]
    intervention: Option<String>,

    /// PICO comparison
    #[arg(long)]
    comparison: Option<String>,

    /// PICO outcome
    #[arg(long)]
    outcome: Option<String>,

    /// Research depth: quick or comprehensive
    #[arg(short, long)]
    mode: Option<String>,

    /// Aspect of the question to emphasize
    #[arg(long)]
    focus: Option<String>,

    /// Intended readers (e.g. "ICU clinicians")
    #[arg(long)]
    audience: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a session trace for this run
    #[arg(long)]
    trace: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Ignore the configured LLM and use deterministic planning and synthesis
    #[arg(long)]
    no_llm: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress and log output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List configured sources and whether they are enabled
    Sources,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

impl Cli {
    /// The task described by the positional query and PICO flags.
    fn task_input(&self, default_mode: ResearchMode) -> anyhow::Result<TaskInput> {
        let mode = match self.mode.as_deref() {
            Some(raw) => ResearchMode::from_str_loose(raw).ok_or_else(|| {
                anyhow::anyhow!("Unknown mode '{raw}'. Use 'quick' or 'comprehensive'.")
            })?,
            None => default_mode,
        };
        let pico = Pico {
            population: self.population.clone(),
            intervention: self.intervention.clone(),
            comparison: self.comparison.clone(),
            outcome: self.outcome.clone(),
        };
        let query = self.query.clone().unwrap_or_default();
        if query.trim().is_empty() && pico.is_empty() {
            anyhow::bail!("Provide a research question or at least one PICO field");
        }
        let mut input = TaskInput::new(query).with_mode(mode).with_pico(pico);
        input.focus = self.focus.clone().filter(|f| !f.trim().is_empty());
        input.audience = self.audience.clone().filter(|a| !a.trim().is_empty());
        Ok(input)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("dev", "evidex", "evidex")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "evidex.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        commands::handle_command(command, &workspace, cli.config.as_deref()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = evidex_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if cli.trace {
        config.trace.enabled = true;
    }

    let input = cli.task_input(config.research.default_mode)?;
    let options = commands::RunOptions {
        use_llm: !cli.no_llm,
        show_progress: !cli.quiet && cli.format == OutputFormat::Text,
    };
    let output = commands::run_research(input, config, options).await?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print!("{}", render::render_output(&output)),
    }

    Ok(if output.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
