use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use careerpath_sync::config;
use careerpath_sync::store::ActionStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print queued actions and cached datasets")]
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

    let store = ActionStore::new(cfg.database_url(), cfg.sync.retry_limit);
    store.initialize().await?;

    let pending = store.list_pending().await?;
    println!("pending: {}", pending.len());
    for action in &pending {
        println!(
            "  {} {} attempts={} queued={}",
            action.id,
            action.kind,
            action.attempts,
            action.created_at.to_rfc3339()
        );
    }

    let failed = store.list_failed().await?;
    println!("failed: {}", failed.len());
    for action in &failed {
        println!(
            "  {} {} attempts={} error={}",
            action.id,
            action.kind,
            action.attempts,
            action.last_error.as_deref().unwrap_or("-")
        );
    }

    println!("datasets:");
    let keys = cfg
        .datasets
        .iter()
        .map(|d| (d.key.as_str(), Some(d.max_age_secs)))
        .chain(std::iter::once((
            careerpath_sync::bootstrap::RECOMMENDATIONS_KEY,
            None,
        )));
    for (key, max_age_secs) in keys {
        match store.get_dataset(key).await? {
            Some(ds) => {
                let stale = match max_age_secs {
                    Some(secs) => store.is_stale(key, std::time::Duration::from_secs(secs)).await?,
                    None => false,
                };
                println!(
                    "  {key}: {} records, refreshed {}{}",
                    ds.records.len(),
                    ds.last_refreshed_at.to_rfc3339(),
                    if stale { " (stale)" } else { "" }
                );
            }
            None => println!("  {key}: absent"),
        }
    }

    store.dispose().await;
    Ok(())
}
