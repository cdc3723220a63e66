//! Configuration loader and validator for the offline sync service.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::bootstrap::RECOMMENDATIONS_KEY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    pub sync: SyncSettings,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Backend that receives queued actions and serves reference datasets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub retry_limit: u32,
    pub delivery_timeout_ms: u64,
    pub debounce_ms: u64,
    pub probe_interval_ms: u64,
}

/// A reference dataset refreshed at startup when stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    pub key: String,
    pub max_age_secs: u64,
    pub loader_timeout_ms: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/careerpath.db", self.app.resolved_data_dir()))
    }
}

impl App {
    /// Expands a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

impl SyncSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.remote.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if !(cfg.remote.base_url.starts_with("http://") || cfg.remote.base_url.starts_with("https://"))
    {
        return Err(ConfigError::Invalid("remote.base_url must be an http(s) URL"));
    }
    if cfg.sync.retry_limit == 0 {
        return Err(ConfigError::Invalid("sync.retry_limit must be > 0"));
    }
    if cfg.sync.delivery_timeout_ms == 0 {
        return Err(ConfigError::Invalid("sync.delivery_timeout_ms must be > 0"));
    }
    if cfg.sync.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid("sync.probe_interval_ms must be > 0"));
    }

    let mut seen = HashSet::new();
    for ds in &cfg.datasets {
        if ds.key.trim().is_empty() {
            return Err(ConfigError::Invalid("datasets[].key must be non-empty"));
        }
        if ds.key == RECOMMENDATIONS_KEY {
            return Err(ConfigError::Invalid(
                "datasets[].key 'recommendations' is reserved for fallback records",
            ));
        }
        if !seen.insert(ds.key.as_str()) {
            return Err(ConfigError::Invalid("datasets[].key must be unique"));
        }
        if ds.loader_timeout_ms == 0 {
            return Err(ConfigError::Invalid("datasets[].loader_timeout_ms must be > 0"));
        }
    }

    Ok(())
}

/// A complete, valid configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

remote:
  base_url: "https://api.example.com/v1"
  api_key: "YOUR_API_KEY"

sync:
  retry_limit: 5
  delivery_timeout_ms: 10000
  debounce_ms: 1500
  probe_interval_ms: 5000

datasets:
  - key: "colleges"
    max_age_secs: 604800
    loader_timeout_ms: 15000
  - key: "quiz_questions"
    max_age_secs: 86400
    loader_timeout_ms: 10000
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.datasets.len(), 2);
        assert_eq!(cfg.sync.debounce(), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_remote() {
        let mut cfg = example_cfg();
        cfg.remote.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("remote.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.remote.base_url = "ftp://example.com".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_settings() {
        let mut cfg = example_cfg();
        cfg.sync.retry_limit = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("retry_limit")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.sync.delivery_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.sync.probe_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_datasets() {
        let mut cfg = example_cfg();
        cfg.datasets[1].key = "colleges".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("unique")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.datasets[0].key = RECOMMENDATIONS_KEY.into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.datasets[0].loader_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn datasets_default_to_empty() {
        let yaml = r#"app: { data_dir: "./d" }
remote: { base_url: "http://localhost:8080" }
sync: { retry_limit: 3, delivery_timeout_ms: 100, debounce_ms: 0, probe_interval_ms: 100 }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.datasets.is_empty());
        assert_eq!(cfg.remote.api_key, None);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sync.retry_limit, 5);
        assert_eq!(cfg.datasets[0].key, "colleges");
    }
}
