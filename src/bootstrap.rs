//! Startup population of reference datasets.
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{LoaderError, StoreError};
use crate::remote::DatasetLoader;
use crate::staleness::StalenessPolicy;
use crate::store::ActionStore;

pub const RECOMMENDATIONS_KEY: &str = "recommendations";

/// Canned guidance written on every start so the app has something to show
/// even on a first run without network.
static FALLBACK_RECOMMENDATIONS: Lazy<Vec<Value>> = Lazy::new(|| {
    vec![
        json!({
            "id": "explore-streams",
            "title": "Explore streams after Class 10",
            "summary": "Compare science, commerce and arts by the subjects you enjoy and the careers they open.",
            "category": "planning"
        }),
        json!({
            "id": "aptitude-quiz",
            "title": "Take the aptitude quiz",
            "summary": "Your quiz answers drive personalised course and college suggestions.",
            "category": "assessment"
        }),
        json!({
            "id": "scholarship-deadlines",
            "title": "Track scholarship deadlines",
            "summary": "Save scholarships you qualify for and get reminded before applications close.",
            "category": "funding"
        }),
        json!({
            "id": "nearby-colleges",
            "title": "Shortlist nearby government colleges",
            "summary": "Check courses offered, cut-offs and facilities before you apply.",
            "category": "colleges"
        }),
    ]
});

/// A dataset the bootstrapper keeps fresh. How old it may get is decided by
/// the bootstrapper's `StalenessPolicy`.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub key: String,
    pub load_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub refreshed: Vec<String>,
    pub fresh: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub fallbacks_written: Vec<String>,
}

pub struct Bootstrapper {
    store: Arc<ActionStore>,
    loader: Arc<dyn DatasetLoader>,
    datasets: Vec<DatasetSpec>,
    policy: StalenessPolicy,
    fallbacks: Vec<(String, Vec<Value>)>,
}

impl Bootstrapper {
    pub fn new(store: Arc<ActionStore>, loader: Arc<dyn DatasetLoader>) -> Self {
        Self {
            store,
            loader,
            datasets: Vec::new(),
            policy: StalenessPolicy::default(),
            fallbacks: vec![(
                RECOMMENDATIONS_KEY.to_string(),
                FALLBACK_RECOMMENDATIONS.clone(),
            )],
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<ActionStore>,
        loader: Arc<dyn DatasetLoader>,
    ) -> Self {
        let policy = cfg
            .datasets
            .iter()
            .fold(StalenessPolicy::default(), |p, d| {
                p.with_window(d.key.clone(), Duration::from_secs(d.max_age_secs))
            });
        cfg.datasets
            .iter()
            .fold(Self::new(store, loader).with_policy(policy), |b, d| {
                b.with_dataset(DatasetSpec {
                    key: d.key.clone(),
                    load_timeout: Duration::from_millis(d.loader_timeout_ms),
                })
            })
    }

    pub fn with_policy(mut self, policy: StalenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dataset(mut self, spec: DatasetSpec) -> Self {
        self.datasets.push(spec);
        self
    }

    pub fn with_fallback(mut self, key: impl Into<String>, records: Vec<Value>) -> Self {
        let key = key.into();
        self.fallbacks.retain(|(k, _)| *k != key);
        self.fallbacks.push((key, records));
        self
    }

    /// Initializes the store, refreshes stale datasets and writes fallbacks.
    /// Only a store that cannot be initialized fails the run.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<BootstrapReport, StoreError> {
        self.store.initialize().await?;
        let mut report = BootstrapReport::default();

        for spec in &self.datasets {
            match self.refresh(spec).await {
                Ok(true) => report.refreshed.push(spec.key.clone()),
                Ok(false) => report.fresh.push(spec.key.clone()),
                Err(err) => {
                    warn!(key = %spec.key, error = %err, "dataset refresh failed");
                    report.failed.push((spec.key.clone(), err));
                }
            }
        }

        for (key, records) in &self.fallbacks {
            match self.store.save_dataset(key, records.clone()).await {
                Ok(()) => report.fallbacks_written.push(key.clone()),
                Err(err) => {
                    warn!(key = %key, ?err, "could not write fallback records");
                    report.failed.push((key.clone(), err.to_string()));
                }
            }
        }

        info!(
            refreshed = report.refreshed.len(),
            fresh = report.fresh.len(),
            failed = report.failed.len(),
            "bootstrap finished"
        );
        Ok(report)
    }

    /// Returns whether the dataset was reloaded.
    async fn refresh(&self, spec: &DatasetSpec) -> Result<bool, String> {
        let stale = self
            .store
            .is_stale(&spec.key, self.policy.max_age(&spec.key))
            .await
            .map_err(|e| e.to_string())?;
        if !stale {
            return Ok(false);
        }

        let records = match tokio::time::timeout(spec.load_timeout, self.loader.load(&spec.key))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(LoaderError::Timeout(spec.load_timeout)),
        }
        .map_err(|e| e.to_string())?;

        let count = records.len();
        self.store
            .save_dataset(&spec.key, records)
            .await
            .map_err(|e| e.to_string())?;
        info!(key = %spec.key, count, "dataset refreshed");
        Ok(true)
    }
}
