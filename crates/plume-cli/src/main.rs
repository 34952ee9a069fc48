use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use plume_core::Identity;
use plume_storage::{bootstrap_cookie_file, ArticleStore, MemoryArticleStore, PgArticleStore};
use plume_sync::{build_scheduler, pipeline_from_config, SyncConfig};
use plume_web::AppState;
use tracing::{info, warn};

mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "plume")]
#[command(about = "Profile feed digest: scrape, summarize and store recent posts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One ingestion run over every configured identity.
    Run {
        /// Keep articles in memory instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    /// Ingest a single identity now.
    Scrape {
        handle: String,
        /// How many new posts to persist (1-10).
        #[arg(long)]
        count: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// HTTP endpoint plus the cron scheduler.
    Serve,
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Run { dry_run } => {
            let config = load_config().await?;
            let identities = config.require_identities().await?;
            let store = open_store(&config, dry_run).await?;
            let pipeline = pipeline_from_config(&config, store, identities)?;
            match pipeline.run_once().await {
                Some(summary) => println!(
                    "run complete: run_id={} identities={} inserted={}",
                    summary.run_id,
                    summary.identities.len(),
                    summary.inserted
                ),
                None => println!("run skipped: another run is in progress"),
            }
        }
        Commands::Scrape { handle, count, dry_run } => {
            let config = load_config().await?;
            let store = open_store(&config, dry_run).await?;
            let pipeline = pipeline_from_config(&config, store, Vec::new())?;
            let report = pipeline
                .scrape_now(&Identity::new(&handle), config.scrape_count_for(count))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => {
            let config = load_config().await?;
            let identities = config.require_identities().await?;
            let store = open_store(&config, false).await?;
            let pipeline = Arc::new(pipeline_from_config(&config, store, identities)?);

            let _scheduler = if config.scheduler_enabled {
                let sched = build_scheduler(pipeline.clone(), &config.sync_cron).await?;
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.sync_cron, "scheduler started");
                Some(sched)
            } else {
                warn!("scheduler disabled; runs happen only on demand");
                None
            };

            plume_web::serve(AppState::new(pipeline, config.scrape_count), config.web_port).await?;
        }
        Commands::Migrate => {
            let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            let pool = plume_storage::connect(&database_url).await?;
            plume_storage::migrate(&pool).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

/// Reads configuration and writes the cookie file from `PLUME_COOKIES_JSON`
/// when none exists yet.
async fn load_config() -> Result<SyncConfig> {
    let config = SyncConfig::from_env()?;
    bootstrap_cookie_file(&config.cookies_path, config.cookies_json.as_deref())
        .await
        .context("bootstrapping cookie file")?;
    Ok(config)
}

async fn open_store(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn ArticleStore>> {
    if dry_run {
        info!("dry run: articles are kept in memory");
        return Ok(Arc::new(MemoryArticleStore::new()));
    }
    let pool = plume_storage::connect(config.require_database_url()?).await?;
    Ok(Arc::new(PgArticleStore::new(pool)))
}
