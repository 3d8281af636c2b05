//! # Report daemon (`reportd`)
//!
//! Loads every period archive under the configured root, keeps them current
//! as reload triggers appear, and serves per-user report views over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! reportd --config ./config/reportd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reportd serve` | Bulk load, watch for reload triggers, serve HTTP |
//! | `reportd load` | Bulk load once and print a per-period summary |
//! | `reportd dump` | Bulk load once and print the result set as JSON |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use report_harness::config::{self, Config};
use report_harness::ingest::{LoadSummary, Pipeline};
use report_harness::server;
use report_harness::store::Store;
use report_harness::watch;

/// Report daemon: ingests bulletin archives and serves per-user views.
#[derive(Parser)]
#[command(name = "reportd", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reportd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load all archives, watch for reload triggers and serve the HTTP API.
    ///
    /// The server starts answering immediately; `/health` reports
    /// `"phase": "cold"` until the initial load has finished.
    Serve,

    /// Load all archives once and print what was ingested.
    Load,

    /// Load all archives once and print the result set as pretty JSON.
    Dump,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let store = Arc::new(Store::new());
    let pipeline = Pipeline::new(&cfg.archive, store.clone());

    match cli.command {
        Commands::Serve => serve(&cfg, pipeline).await?,
        Commands::Load => {
            let summary = load(pipeline).await?;
            print_summary(&store, &summary);
        }
        Commands::Dump => {
            load(pipeline).await?;
            let state = store.read();
            let json = serde_json::to_string_pretty(&state.results)?;
            println!("{}", json);
        }
    }

    Ok(())
}

async fn load(pipeline: Pipeline) -> anyhow::Result<LoadSummary> {
    tokio::task::spawn_blocking(move || pipeline.load_all())
        .await
        .context("Bulk load task failed")?
}

async fn serve(cfg: &Config, pipeline: Pipeline) -> anyhow::Result<()> {
    anyhow::ensure!(
        cfg.archive.root.is_dir(),
        "Archive root does not exist: {}",
        cfg.archive.root.display()
    );

    let store = pipeline.store().clone();
    let watch_enabled = cfg.archive.watch;
    let warmup = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<watch::WatchHandle>> {
        pipeline.load_all()?;
        if watch_enabled {
            Ok(Some(watch::spawn(pipeline)?))
        } else {
            Ok(None)
        }
    });

    server::run_server(cfg, store).await?;

    match warmup.await {
        Ok(Ok(Some(handle))) => handle.stop(),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => error!(error = %e, "startup load failed"),
        Err(e) => error!(error = %e, "startup load task failed"),
    }
    info!("shutdown complete");
    Ok(())
}

fn print_summary(store: &Store, summary: &LoadSummary) {
    let state = store.read();
    println!(
        "Loaded {} period(s), {} failed, {} distinct common section(s).",
        summary.loaded.len(),
        summary.failed.len(),
        state.results.dedup.len()
    );
    for period in &summary.loaded {
        if let Some(result) = state.results.results.get(period) {
            println!(
                "  {:>8}  users={:<5} started={}  updated={}",
                period,
                result.seen_users.len(),
                format_timestamp(result.raw.started),
                format_timestamp(result.raw.updated),
            );
        }
    }
    for period in &summary.failed {
        println!("  {:>8}  FAILED", period);
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
