use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use careerpath_sync::bootstrap::Bootstrapper;
use careerpath_sync::config;
use careerpath_sync::connectivity::{ChannelSignalSource, Connectivity};
use careerpath_sync::monitor::ConnectivityMonitor;
use careerpath_sync::probe::HttpProbe;
use careerpath_sync::remote::RemoteClient;
use careerpath_sync::store::ActionStore;
use careerpath_sync::sync::SyncEngine;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let remote = RemoteClient::from_config(&cfg)?;

    let report = Bootstrapper::from_config(&cfg, Arc::clone(&store), Arc::new(remote.clone()))
        .run()
        .await?;
    for (key, err) in &report.failed {
        error!(key = %key, err = %err, "dataset not refreshed; serving cached copy if any");
    }

    // Start offline; the first probe result flips this.
    let connectivity = Connectivity::new(false);
    let engine = SyncEngine::new(
        Arc::clone(&store),
        Arc::new(remote.clone()),
        connectivity,
        cfg.sync.delivery_timeout(),
    );

    let signals = ChannelSignalSource::default();
    let mut monitor = ConnectivityMonitor::new(Arc::clone(&engine), cfg.sync.debounce());
    monitor.initialize(&signals).await;
    let probe = HttpProbe::new(remote, signals.clone(), cfg.sync.probe_interval()).spawn();

    let mut status = monitor.status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let s = status.borrow_and_update().clone();
            info!(
                online = s.online,
                syncing = s.syncing,
                pending = s.pending,
                last_sync_at = ?s.last_sync_at,
                last_error = ?s.last_error,
                "sync status"
            );
        }
    });

    info!("careerpath-sync running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    probe.stop().await;
    monitor.dispose().await;
    status_task.abort();
    store.dispose().await;
    Ok(())
}
