use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use careerpath_sync::config;
use careerpath_sync::model::ActionKind;
use careerpath_sync::store::ActionStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Queue an action for delivery on the next sync")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Action kind, e.g. quiz-submission or scholarship-save
    #[arg(long)]
    kind: String,

    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,
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

    let kind = ActionKind::parse_kind(&args.kind).ok_or_else(|| {
        let known: Vec<&str> = ActionKind::ALL.iter().map(|k| k.as_str()).collect();
        anyhow!("unknown kind '{}'; expected one of {}", args.kind, known.join(", "))
    })?;
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;

    let store = ActionStore::new(cfg.database_url(), cfg.sync.retry_limit);
    store.initialize().await?;
    let id = store.enqueue(kind, payload).await?;
    println!("{id}");
    store.dispose().await;
    Ok(())
}
