use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gateway_client::GatewayClient;
use ripple_common::Config;
use ripple_scout::job_source::FileJobSource;
use ripple_scout::{Orchestrator, Scheduler, SchedulerConfig, ScoutDeps};
use ripple_store::{CheckpointStore, DedupStore, PgCheckpointStore, PgItemSink, PgSeenBackend};

#[derive(Parser)]
#[command(name = "ripple-scout", about = "Resumable social search crawler")]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl every job in the job file
    Run {
        /// Job file (overrides JOBS_PATH)
        #[arg(long)]
        jobs: Option<PathBuf>,
        /// Worker count (overrides SCOUT_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Exit once the initial queue drains
        #[arg(long)]
        no_hot_reload: bool,
        /// Re-run queries whose checkpoints are already completed
        #[arg(long)]
        force: bool,
    },
    /// Delete completed checkpoints older than the retention window
    Sweep {
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// Print checkpoint and sink statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("ripple=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::from_env()?;
    // Distinguishes this process's workers in checkpoint rows.
    let run_id = Uuid::new_v4().simple().to_string();
    config.worker_id_prefix = format!("{}-{}", config.worker_id_prefix, &run_id[..8]);
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(config.workers as u32 + 4)
        .connect(&config.database_url)
        .await
        .context("connect to Postgres")?;
    ripple_store::migrate(&pool).await?;

    let checkpoints = Arc::new(PgCheckpointStore::new(pool.clone()));
    let sink = Arc::new(PgItemSink::new(pool.clone()));

    match cli.command {
        Command::Run {
            jobs,
            workers,
            no_hot_reload,
            force,
        } => {
            if let Some(path) = jobs {
                config.jobs_path = path;
            }
            if let Some(workers) = workers {
                config.workers = workers.max(1);
            }
            if no_hot_reload {
                config.hot_reload = false;
            }

            let dedup = DedupStore::load(Arc::new(PgSeenBackend::new(pool.clone()))).await?;
            info!(known_items = dedup.len(), "Seen set loaded");

            let deps = ScoutDeps::builder()
                .source(Arc::new(GatewayClient::new(
                    config.gateway_url.clone(),
                    config.gateway_token.clone(),
                )))
                .sink(sink.clone())
                .checkpoints(checkpoints.clone())
                .dedup(Arc::new(dedup))
                .expansion(config.expansion.clone())
                .language_fallback(config.language_fallback)
                .force(force)
                .build();

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, finishing in-flight pages");
                        cancel.cancel();
                    }
                });
            }

            let scheduler = Scheduler::new(
                Orchestrator::new(deps),
                Arc::new(FileJobSource::new(config.jobs_path.clone())),
                SchedulerConfig::from_config(&config),
            );
            let summary = scheduler.run(cancel).await?;
            println!("{summary}");

            match sink.stats().await {
                Ok(stats) => println!("{stats}"),
                Err(e) => warn!(error = %e, "Sink stats unavailable"),
            }
        }
        Command::Sweep { retention_days } => {
            let days = retention_days.unwrap_or(config.checkpoint_retention_days);
            let removed = checkpoints
                .sweep_completed(chrono::Duration::days(days))
                .await?;
            info!(removed, retention_days = days, "Swept completed checkpoints");
        }
        Command::Stats => {
            println!("{}", checkpoints.summary().await?);
            for cp in checkpoints.active(20).await? {
                println!(
                    "  {}  {:>8} items  {}",
                    &cp.fingerprint.as_str()[..12.min(cp.fingerprint.as_str().len())],
                    cp.items_fetched,
                    cp.query_text
                );
            }
            println!("{}", sink.stats().await?);
        }
    }

    Ok(())
}
