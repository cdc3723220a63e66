use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{DeliveryError, LoaderError};
use crate::model::QueuedAction;

/// Remote endpoint that accepts queued actions. Retries resend the same
/// action id, so implementations should be idempotent on it.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, action: &QueuedAction) -> Result<(), DeliveryError>;
}

/// External source of a reference dataset.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<Value>, LoaderError>;
}

/// HTTP client for the application backend.
#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        // join() drops the last path segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).context("invalid remote base URL")?;
        let http = Client::builder()
            .user_agent(concat!("careerpath-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.remote.base_url, cfg.remote.api_key.clone())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    pub fn build_delivery_request(&self, action: &QueuedAction) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("actions/{}", action.kind.as_str()))?;
        self.authorized(self.http.post(url))
            .header("Idempotency-Key", &action.id)
            .json(&action.payload)
            .build()
            .context("failed to build delivery request")
    }

    async fn post_action(&self, action: &QueuedAction) -> Result<()> {
        let request = self.build_delivery_request(action)?;
        debug!(url = %request.url(), id = %action.id, "delivering action");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach remote endpoint")?;
        let status = res.status();
        if status == StatusCode::CONFLICT {
            // Server already holds this idempotency key.
            debug!(id = %action.id, "remote reports duplicate delivery");
            return Ok(());
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, id = %action.id, "remote rejected action");
            return Err(anyhow!("remote error {}: {}", status, body));
        }
        Ok(())
    }

    async fn get_dataset(&self, key: &str) -> Result<Vec<Value>> {
        let url = self.endpoint(&format!("datasets/{key}"))?;
        let res = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("failed to reach remote endpoint")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("remote error {}: {}", status, body));
        }
        let body: Value = res.json().await.context("invalid dataset JSON")?;
        match body {
            Value::Array(records) => Ok(records),
            other => Err(anyhow!(
                "dataset {key} is not a JSON array (got {})",
                json_type(&other)
            )),
        }
    }

    /// GET `{base}/health` with a short timeout; any 2xx means online.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let Ok(url) = self.endpoint("health") else {
            return false;
        };
        match self.http.get(url).timeout(timeout).send().await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                debug!(?err, "health probe failed");
                false
            }
        }
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl Delivery for RemoteClient {
    async fn deliver(&self, action: &QueuedAction) -> Result<(), DeliveryError> {
        self.post_action(action)
            .await
            .map_err(|err| DeliveryError::Failed(format!("{err:#}")))
    }
}

#[async_trait]
impl DatasetLoader for RemoteClient {
    async fn load(&self, key: &str) -> Result<Vec<Value>, LoaderError> {
        self.get_dataset(key)
            .await
            .map_err(|err| LoaderError::Failed(format!("{err:#}")))
    }
}
