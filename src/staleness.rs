//! Freshness decisions for cached reference datasets.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// True when the dataset was never populated or is older than `max_age`.
pub fn is_stale(
    last_refreshed_at: Option<DateTime<Utc>>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_refreshed_at else {
        return true;
    };
    // A timestamp in the future (clock skew) counts as age zero.
    let age = (now - last).to_std().unwrap_or(Duration::ZERO);
    age > max_age
}

/// Per-dataset staleness windows. Datasets without an explicit window use the
/// default one (24 hours unless built with `new`).
#[derive(Debug, Clone)]
pub struct StalenessPolicy {
    default_max_age: Duration,
    windows: HashMap<String, Duration>,
}

impl StalenessPolicy {
    pub fn new(default_max_age: Duration) -> Self {
        Self {
            default_max_age,
            windows: HashMap::new(),
        }
    }

    pub fn with_window(mut self, key: impl Into<String>, max_age: Duration) -> Self {
        self.windows.insert(key.into(), max_age);
        self
    }

    pub fn max_age(&self, key: &str) -> Duration {
        self.windows
            .get(key)
            .copied()
            .unwrap_or(self.default_max_age)
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
