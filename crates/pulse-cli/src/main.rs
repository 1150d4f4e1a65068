use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pulse_client::HttpExtractorFactory;
use pulse_core::traits::ExtractorFactory;
use pulse_core::{
    AggregateCache, Dashboard, HarvestConfig, Harvester, OwnerDirectory, Period,
    TracingHarvestReporter,
};
use pulse_db::{Database, DatabaseConfig, PostRepository};

#[derive(Parser)]
#[command(name = "pulse", version, about = "Resilient engagement-metrics harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every post of the current month once
    Once {
        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Harvest now, then again every interval until Ctrl-C
    Continuous {
        #[command(flatten)]
        harvest: HarvestArgs,

        /// Minutes between runs (stretched ×1.5 after a run with more failures than successes)
        #[arg(long, env = "PULSE_SCHEDULE_INTERVAL_MINUTES", default_value_t = 1440)]
        interval_minutes: u64,
    },

    /// Register a post for the current month
    Add {
        /// Owner the post is attributed to
        #[arg(short, long)]
        owner: String,

        /// Post URL (https://x.com/<user>/status/<id>)
        #[arg(short, long)]
        url: String,
    },

    /// List tracked posts, most recently harvested first
    List {
        /// Month to list (YYYY-MM); all months if omitted
        #[arg(short, long)]
        period: Option<Period>,
    },

    /// Per-owner totals, highest impressions first
    Leaderboard {
        /// Month to rank (YYYY-MM); all months if omitted
        #[arg(short, long)]
        period: Option<Period>,

        /// Months kept off the leaderboard (comma-separated YYYY-MM)
        #[arg(long = "exclude", env = "PULSE_EXCLUDED_PERIODS", value_delimiter = ',')]
        excluded: Vec<Period>,
    },

    /// Move a post to another owner
    Reassign {
        /// Post id (the numeric status id)
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        owner: String,
    },

    /// Record today's totals for the daily series
    Snapshot,

    /// Row counts and freshness of the store
    Stats,
}

/// Scheduler tunables shared by `once` and `continuous`.
#[derive(Args, Debug, Clone)]
struct HarvestArgs {
    /// Consecutive failures treated as a block
    #[arg(long, env = "PULSE_MAX_CONSECUTIVE_FAILURES", default_value_t = 5)]
    max_consecutive_failures: u32,

    /// Backoff before doubling
    #[arg(long, env = "PULSE_BLOCKING_BASE_WAIT_MINUTES", default_value_t = 30)]
    blocking_base_wait_minutes: u64,

    /// Backoff ceiling
    #[arg(long, env = "PULSE_BLOCKING_MAX_WAIT_HOURS", default_value_t = 8)]
    blocking_max_wait_hours: u64,

    /// Base pause between posts (jittered ±20%)
    #[arg(long, env = "PULSE_INTER_ITEM_DELAY_SECONDS", default_value_t = 5)]
    inter_item_delay_seconds: u64,

    #[arg(long, env = "PULSE_CACHE_TTL_SECONDS", default_value_t = 300)]
    cache_ttl_seconds: u64,

    /// Upper bound on a single extraction
    #[arg(long, env = "PULSE_EXTRACT_TIMEOUT_SECS", default_value_t = 30)]
    extract_timeout_secs: u64,

    /// JSON file mapping owners to their account handles
    #[arg(long, env = "PULSE_OWNERS_FILE")]
    owners: Option<PathBuf>,

    /// Render pages in headless Chromium instead of plain HTTP
    #[arg(long, env = "PULSE_BROWSER", default_value_t = false)]
    browser: bool,

    /// User-Agent sent by the HTTP extractor
    #[arg(long, env = "PULSE_USER_AGENT")]
    user_agent: Option<String>,

    /// How long the browser extractor waits for a post to render
    #[arg(long, env = "PULSE_PAGE_LOAD_TIMEOUT_SECS", default_value_t = 15)]
    page_load_timeout_secs: u64,
}

impl HarvestArgs {
    fn config(&self, schedule_interval_minutes: u64) -> HarvestConfig {
        HarvestConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            blocking_base_wait_minutes: self.blocking_base_wait_minutes,
            blocking_max_wait_hours: self.blocking_max_wait_hours,
            inter_item_delay_seconds: self.inter_item_delay_seconds,
            schedule_interval_minutes,
            cache_ttl_seconds: self.cache_ttl_seconds,
            extract_timeout_secs: self.extract_timeout_secs,
            ..Default::default()
        }
    }

    fn owner_directory(&self) -> Result<OwnerDirectory> {
        match &self.owners {
            None => Ok(OwnerDirectory::new()),
            Some(path) => {
                let directory = OwnerDirectory::from_file(path)?;
                tracing::info!(handles = directory.len(), path = %path.display(), "Owner directory loaded");
                Ok(directory)
            }
        }
    }
}

/// How a harvest command runs.
#[derive(Debug, Clone, Copy)]
enum Mode {
    Once,
    Continuous { interval_minutes: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store().await?;

    match cli.command {
        Commands::Once { harvest } => {
            cmd_harvest(store, &harvest, Mode::Once).await?;
        }
        Commands::Continuous {
            harvest,
            interval_minutes,
        } => {
            cmd_harvest(store, &harvest, Mode::Continuous { interval_minutes }).await?;
        }
        Commands::Add { owner, url } => {
            let inserted = dashboard(store).submit(&owner, &url).await?;
            if inserted {
                println!("Registered {url} for {owner}");
            } else {
                println!("Already tracked: {url}");
            }
        }
        Commands::List { period } => {
            cmd_list(&store, period).await?;
        }
        Commands::Leaderboard { period, excluded } => {
            let board = dashboard(store)
                .with_excluded_periods(excluded)
                .leaderboard(period)
                .await?;
            println!("{}", serde_json::to_string_pretty(&board)?);
        }
        Commands::Reassign { id, owner } => {
            if !dashboard(store).reassign_owner(&id, &owner).await? {
                bail!("No tracked post with id {id}");
            }
            println!("Post {id} now belongs to {owner}");
        }
        Commands::Snapshot => {
            let snapshot = dashboard(store).record_today().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Open the SQLite store using `PULSE_DATABASE_PATH`.
async fn open_store() -> Result<PostRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::open(&config)
        .await
        .with_context(|| format!("Failed to open database at {}", config.path.display()))?;
    Ok(db.post_repo())
}

fn dashboard(store: PostRepository) -> Dashboard<PostRepository> {
    Dashboard::new(store, AggregateCache::new(Duration::from_secs(300)))
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping after the current step");
            trigger.cancel();
        }
    });
    token
}

async fn cmd_harvest(store: PostRepository, args: &HarvestArgs, mode: Mode) -> Result<()> {
    if args.browser {
        #[cfg(feature = "browser")]
        {
            let factory = pulse_client::BrowserExtractorFactory::new()
                .with_load_timeout(Duration::from_secs(args.page_load_timeout_secs));
            return run_harvest(store, factory, args, mode).await;
        }
        #[cfg(not(feature = "browser"))]
        bail!("--browser requires pulse to be built with the `browser` feature");
    }

    let mut factory =
        HttpExtractorFactory::new().with_timeout(Duration::from_secs(args.extract_timeout_secs));
    if let Some(user_agent) = &args.user_agent {
        factory = factory.with_user_agent(user_agent.as_str());
    }
    run_harvest(store, factory, args, mode).await
}

async fn run_harvest<EF: ExtractorFactory>(
    store: PostRepository,
    factory: EF,
    args: &HarvestArgs,
    mode: Mode,
) -> Result<()> {
    let interval = match mode {
        Mode::Once => HarvestConfig::default().schedule_interval_minutes,
        Mode::Continuous { interval_minutes } => interval_minutes,
    };
    let config = args.config(interval);
    let cache = AggregateCache::new(config.cache_ttl());
    let harvester = Harvester::new(store, factory, cache, config)?.with_owners(args.owner_directory()?);
    let cancel = shutdown_token();
    let reporter = TracingHarvestReporter;

    match mode {
        Mode::Once => {
            let stats = harvester
                .run_once(&cancel, &reporter)
                .await
                .context("Harvest run failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Mode::Continuous { interval_minutes } => {
            harvester
                .run_continuous(interval_minutes, &cancel, &reporter)
                .await
                .context("Continuous harvesting stopped")?;
        }
    }

    Ok(())
}

async fn cmd_list(store: &PostRepository, period: Option<Period>) -> Result<()> {
    let records = store.query(period).await?;
    if records.is_empty() {
        match period {
            Some(p) => println!("No posts tracked for {p}"),
            None => println!("No posts tracked"),
        }
        return Ok(());
    }

    for record in &records {
        let m = &record.metrics;
        println!(
            "  [{}] {} {} (owner: {}) views={} likes={} reposts={} replies={} observed {}",
            record.item.period,
            record.item.external_id,
            record.item.url,
            record.item.owner,
            m.impressions,
            m.likes,
            m.reposts,
            m.replies,
            record.observed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }

    println!("\nTotal: {} posts", records.len());
    Ok(())
}
