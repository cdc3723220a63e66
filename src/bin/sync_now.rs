use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use careerpath_sync::config;
use careerpath_sync::connectivity::Connectivity;
use careerpath_sync::remote::RemoteClient;
use careerpath_sync::store::ActionStore;
use careerpath_sync::sync::SyncEngine;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one sync pass against the remote endpoint and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Requeue actions parked after exhausting their retries before syncing
    #[arg(long)]
    retry_failed: bool,

    /// Skip the health probe and assume the endpoint is reachable
    #[arg(long)]
    assume_online: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = Arc::new(ActionStore::new(cfg.database_url(), cfg.sync.retry_limit));
    store.initialize().await?;
    if args.retry_failed {
        store.retry_failed().await?;
    }

    let remote = RemoteClient::from_config(&cfg)?;
    let online = args.assume_online || remote.probe(cfg.sync.delivery_timeout()).await;
    if !online {
        let remaining = store.count_remaining().await?;
        warn!(remaining, "remote unreachable; nothing synced");
        store.dispose().await;
        return Ok(());
    }

    let engine = SyncEngine::new(
        Arc::clone(&store),
        Arc::new(remote),
        Connectivity::new(true),
        cfg.sync.delivery_timeout(),
    );
    let report = engine.trigger_sync().await?;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        remaining = report.remaining,
        "sync finished"
    );

    for action in store.list_failed().await? {
        warn!(
            id = %action.id,
            kind = %action.kind,
            attempts = action.attempts,
            last_error = ?action.last_error,
            "action parked after exhausting retries; rerun with --retry-failed"
        );
    }
    store.dispose().await;
    Ok(())
}
