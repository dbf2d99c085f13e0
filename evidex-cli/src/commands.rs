//! Subcommand handlers and the research run itself.

use crate::render;
use crate::{Commands, ConfigAction};
use evidex_connectors::{ChatClient, LlmStrategyOracle, LlmSynthesisOracle, build_registry};
use evidex_core::research::ChannelProgressSink;
use evidex_core::{
    Clock, EvidexConfig, ExtractiveSynthesizer, NoStrategyOracle, ResearchOrchestrator,
    ResearchOutput, RetryPolicy, SourceKind, StrategyOracle, SynthesisOracle, TaskInput,
    TokioClock,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How the CLI drives one research run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub use_llm: bool,
    pub show_progress: bool,
}

/// Handle a subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    explicit_config: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, explicit_config),
        Commands::Sources => {
            let config = load(workspace, explicit_config)?;
            print!("{}", render::render_sources(&config.sources));
            Ok(())
        }
    }
}

fn load(workspace: &Path, explicit_config: Option<&Path>) -> anyhow::Result<EvidexConfig> {
    evidex_core::load_config(Some(workspace), explicit_config)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    explicit_config: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".evidex");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&EvidexConfig::default())?;
            std::fs::write(&config_path, toml_str)?;
            println!("Created configuration file at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, explicit_config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Strategy and synthesis oracles for this configuration.
///
/// Falls back to the deterministic pair when no LLM is configured, when
/// `use_llm` is off, or when the chat client cannot be built.
pub fn build_oracles(
    config: &EvidexConfig,
    sources: Vec<SourceKind>,
    use_llm: bool,
    clock: Arc<dyn Clock>,
) -> (Arc<dyn StrategyOracle>, Arc<dyn SynthesisOracle>) {
    let deterministic = || -> (Arc<dyn StrategyOracle>, Arc<dyn SynthesisOracle>) {
        (
            Arc::new(NoStrategyOracle),
            Arc::new(ExtractiveSynthesizer::default()),
        )
    };
    let Some(llm) = config.llm.as_ref().filter(|_| use_llm) else {
        return deterministic();
    };
    match ChatClient::new(llm) {
        Ok(chat) => {
            if llm.resolve_api_key().is_none() {
                warn!(env = %llm.api_key_env, "No LLM API key found; requests are sent unauthenticated");
            }
            let chat = Arc::new(chat.with_retry(RetryPolicy::from(&config.retry), clock));
            (
                Arc::new(LlmStrategyOracle::new(chat.clone(), sources)),
                Arc::new(LlmSynthesisOracle::new(chat)),
            )
        }
        Err(e) => {
            warn!(error = %e, "LLM client unavailable, using deterministic oracles");
            deterministic()
        }
    }
}

/// Run one research request. Ctrl-C cancels the run cooperatively.
pub async fn run_research(
    input: TaskInput,
    config: EvidexConfig,
    options: RunOptions,
) -> anyhow::Result<ResearchOutput> {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let registry = Arc::new(build_registry(&config.sources, clock.clone()));
    let (strategy, synthesis) =
        build_oracles(&config, registry.kinds(), options.use_llm, clock.clone());

    let (sink, mut events) = ChannelProgressSink::channel(64);
    let orchestrator = ResearchOrchestrator::new(registry, strategy, synthesis, config)
        .with_clock(clock)
        .with_progress(Arc::new(sink));

    let show_progress = options.show_progress;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if show_progress {
                eprintln!("{}", render::progress_line(&event));
            }
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling research run");
            interrupt.cancel();
        }
    });

    let output = orchestrator.run_with_cancel(input, cancel).await;
    watcher.abort();
    // Dropping the orchestrator closes the progress channel.
    drop(orchestrator);
    let _ = printer.await;
    Ok(output)
}
