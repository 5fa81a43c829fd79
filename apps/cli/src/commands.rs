//! CLI command definitions, routing, and tracing setup.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use magpie_core::{EventSender, PipelineEvent, PipelineOrchestrator, RunSummary, StateManager};
use magpie_fetcher::{ContentSource, FetchedItem, ScraperClient, discover_items};
use magpie_phases::{GitSyncTarget, PhaseDeps, build_executors};
use magpie_providers::OllamaClient;
use magpie_shared::{
    AppConfig, DataPaths, MagpieError, Phase, RunPrefs, init_config, load_config,
};
use magpie_storage::Registry;
use tokio::sync::mpsc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Magpie: bookmarked tweets into a curated knowledge base.
#[derive(Parser)]
#[command(
    name = "magpie",
    version,
    about = "Ingest bookmarked tweets into a curated, searchable knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover new bookmarks and run the full pipeline.
    Run {
        /// Skip bookmark discovery and process known items only.
        #[arg(long)]
        skip_fetch: bool,

        /// Re-run categorization even on already-categorized items.
        #[arg(long)]
        force_recategorize: bool,

        /// Re-run media interpretation even where descriptions exist.
        #[arg(long)]
        force_reinterpret_media: bool,

        /// Run only these phases (comma-separated, e.g. cache,categorize).
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Skip these phases (comma-separated).
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// Items processed concurrently (overrides the config value).
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Discover new bookmarks and cache their content, nothing more.
    Fetch {
        /// Items processed concurrently (overrides the config value).
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Show registry counts, per-phase completion, and recent runs.
    Status,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "magpie=info",
        1 => "magpie=debug",
        _ => "magpie=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            skip_fetch,
            force_recategorize,
            force_reinterpret_media,
            only,
            skip,
            concurrency,
        } => {
            let prefs = RunPrefs {
                skip_fetch,
                force_recategorize,
                force_reinterpret_media,
                only_phases: parse_phase_set(&only)?,
                skip_phases: parse_phase_set(&skip)?.unwrap_or_default(),
            };
            cmd_run(prefs, concurrency).await
        }
        Command::Fetch { concurrency } => {
            let prefs = RunPrefs {
                only_phases: Some(BTreeSet::from([Phase::Cache])),
                ..RunPrefs::default()
            };
            cmd_run(prefs, concurrency).await
        }
        Command::Status => cmd_status().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn parse_phase_set(names: &[String]) -> Result<Option<BTreeSet<Phase>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let mut phases = BTreeSet::new();
    for name in names {
        phases.insert(name.parse::<Phase>().map_err(|e| eyre!(e))?);
    }
    Ok(Some(phases))
}

// ---------------------------------------------------------------------------
// Pipeline run
// ---------------------------------------------------------------------------

async fn cmd_run(mut prefs: RunPrefs, concurrency: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let paths = DataPaths::resolve(&config)?;
    let registry = Arc::new(Registry::open(&paths.db_path()).await?);
    let state = Arc::new(StateManager::load(Arc::clone(&registry)).await?);

    let scraper = ScraperClient::from_config(&config.scraper)?.map(Arc::new);

    let discovered = if prefs.skip_fetch {
        BTreeMap::new()
    } else {
        match &scraper {
            Some(client) => discover_items(client.as_ref()).await,
            None => {
                warn!("scraper base_url not configured, processing known items only");
                BTreeMap::new()
            }
        }
    };

    if !config.sync.enabled {
        prefs.skip_phases.insert(Phase::Sync);
    }

    let ollama = Arc::new(OllamaClient::new(&config.ollama)?);
    let content: Arc<dyn ContentSource> = match &scraper {
        Some(client) => client.clone(),
        None => Arc::new(ScraperUnavailable),
    };
    let deps = PhaseDeps {
        paths: paths.clone(),
        registry: Arc::clone(&registry),
        content,
        text: ollama.clone(),
        vision: ollama.clone(),
        embeddings: ollama.clone(),
        sync_target: Arc::new(GitSyncTarget::new(
            paths.kb_dir(),
            config.sync.remote.clone(),
            config.sync.branch.clone(),
        )),
        categorization: config.categorization.clone(),
    };
    let executors = build_executors(&deps);

    let concurrency = concurrency.unwrap_or(config.defaults.concurrency) as usize;
    let (events, rx) = EventSender::new();
    let progress = tokio::spawn(drive_progress(rx));

    info!(
        discovered = discovered.len(),
        concurrency, "starting pipeline run"
    );

    let summary = {
        let orchestrator = PipelineOrchestrator::new(state, executors, events, concurrency);
        orchestrator.run(discovered, &prefs).await?
    };
    progress.await.ok();

    print_summary(&summary);
    Ok(())
}

/// Stands in for the content collaborator when no scraper base URL is
/// configured. Cache attempts for uncached items fail with a clear message;
/// already-cached items still flow through the rest of the pipeline.
struct ScraperUnavailable;

#[async_trait::async_trait]
impl ContentSource for ScraperUnavailable {
    async fn fetch_item(&self, _id: &str) -> magpie_shared::Result<FetchedItem> {
        Err(MagpieError::Network("scraper base_url not configured".into()))
    }

    async fn download_media(&self, _url: &str, _dest: &Path) -> magpie_shared::Result<()> {
        Err(MagpieError::Network("scraper base_url not configured".into()))
    }
}

/// Drive an indicatif spinner from pipeline events until the channel closes.
async fn drive_progress(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::RunStarted { items, .. } => {
                spinner.set_message(format!("Processing {items} item(s)"));
            }
            PipelineEvent::PhaseStarted { id, phase } => {
                spinner.set_message(format!("{} [{id}]", phase.display_name()));
            }
            PipelineEvent::PhaseCompleted { .. } => {}
            PipelineEvent::PhaseFailed { id, phase, message } => {
                spinner.println(format!(
                    "  {} failed for {id}: {message}",
                    phase.display_name()
                ));
            }
        }
    }
    spinner.finish_and_clear();
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Run complete.");
    println!("  Items:      {}", summary.items);
    println!("  Phases run: {}", summary.phases_run);
    println!("  Failures:   {}", summary.failures.len());
    for failure in &summary.failures {
        println!("    {} ({}): {}", failure.id, failure.phase, failure.message);
    }
    println!("  Time:       {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    println!();
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let paths = DataPaths::resolve(&config)?;
    let db = paths.db_path();
    if !db.exists() {
        println!("No registry at {} yet. Start with: magpie run", db.display());
        return Ok(());
    }

    let registry = Registry::open_readonly(&db).await?;
    let items = registry.list_items().await?;

    println!();
    println!("  Registry: {}", db.display());
    println!("  Items:    {}", items.len());
    println!();
    println!("  Phase completion:");
    for phase in Phase::ALL {
        let applicable = items.iter().filter(|r| phase.applies_to(r)).count();
        let done = items.iter().filter(|r| phase.is_done(r)).count();
        println!("    {:<20} {done}/{applicable}", phase.display_name());
    }

    let failed: Vec<_> = items.iter().filter(|r| r.failed_phase.is_some()).collect();
    if !failed.is_empty() {
        println!();
        println!("  Failures:");
        for record in &failed {
            println!(
                "    {} ({}): {}",
                record.id,
                record.failed_phase.as_deref().unwrap_or("?"),
                record.error_message.as_deref().unwrap_or("unknown error"),
            );
        }
    }

    let runs = registry.list_recent_runs(5).await?;
    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in &runs {
            let started = run.started_at.format("%Y-%m-%d %H:%M:%S");
            match &run.stats_json {
                Some(stats) if run.finished_at.is_some() => {
                    let parsed: serde_json::Value =
                        serde_json::from_str(stats).unwrap_or_default();
                    let phases = parsed
                        .get("phases_run")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    let failures = parsed
                        .get("failures")
                        .and_then(|v| v.as_array())
                        .map(|a| a.len())
                        .unwrap_or(0);
                    println!("    {started}  {phases} phases, {failures} failure(s)");
                }
                _ => println!("    {started}  (unfinished)"),
            }
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
