//! Durable action store: the single owner of queued actions and cached datasets.
//!
//! Every mutation is committed to SQLite before the call returns. Other
//! components never hold a pool of their own; they go through `ActionStore`.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, Pool};
use crate::error::StoreError;
use crate::model::{ActionKind, ActionStatus, CachedDataset, QueuedAction};
use crate::staleness;

pub const DEFAULT_RETRY_LIMIT: u32 = 5;

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug)]
pub struct ActionStore {
    database_url: String,
    retry_limit: u32,
    pool: OnceCell<Pool>,
}

impl ActionStore {
    pub fn new(database_url: impl Into<String>, retry_limit: u32) -> Self {
        Self {
            database_url: database_url.into(),
            retry_limit: retry_limit.max(1),
            pool: OnceCell::new(),
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Connects, migrates and recovers actions orphaned in flight by an earlier
    /// process. Later calls return immediately.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<()> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::init_pool(&self.database_url).await?;
                db::run_migrations(&pool).await?;
                let recovered = db::recover_in_flight(&pool).await?;
                if recovered > 0 {
                    warn!(recovered, "returned orphaned in-flight actions to pending");
                }
                info!("action store ready");
                Ok::<_, StoreError>(pool)
            })
            .await?;
        Ok(())
    }

    /// Closes the underlying pool. The store is unusable afterwards.
    pub async fn dispose(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&Pool> {
        self.pool
            .get()
            .ok_or_else(|| StoreError::StorageUnavailable("store not initialized".into()))
    }

    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn enqueue(&self, kind: ActionKind, payload: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        db::insert_action(self.pool()?, &id, kind, &payload, Utc::now()).await?;
        info!(id = %id, "action queued");
        Ok(id)
    }

    pub async fn get_action(&self, id: &str) -> Result<QueuedAction> {
        db::fetch_action(self.pool()?, id)
            .await?
            .ok_or_else(|| not_found("action", id))
    }

    /// Pending and retryable failed actions, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<QueuedAction>> {
        db::list_deliverable(self.pool()?, self.retry_limit).await
    }

    /// Actions parked after exhausting their retries.
    pub async fn list_failed(&self) -> Result<Vec<QueuedAction>> {
        let failed = db::list_by_status(self.pool()?, ActionStatus::Failed).await?;
        Ok(failed
            .into_iter()
            .filter(|a| a.attempts >= self.retry_limit)
            .collect())
    }

    pub async fn count_remaining(&self) -> Result<u64> {
        db::count_remaining(self.pool()?).await
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn mark_in_flight(&self, id: &str) -> Result<()> {
        let pool = self.pool()?;
        if db::claim_action(pool, id, self.retry_limit).await? {
            return Ok(());
        }
        let current = self.existing_status(id).await?;
        Err(StoreError::InvalidTransition {
            id: id.to_string(),
            from: current.as_str().to_string(),
            to: ActionStatus::InFlight.as_str(),
        })
    }

    /// Completed actions stay archived and are never listed as pending again.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        if db::complete_action(self.pool()?, id).await? {
            return Ok(());
        }
        // Already completed is fine; only a missing id is an error.
        self.existing_status(id).await.map(|_| ())
    }

    /// Records a failed delivery attempt and returns the resulting status.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<ActionStatus> {
        match db::fail_action(self.pool()?, id, error, self.retry_limit).await? {
            Some((status, attempts)) => {
                if status == ActionStatus::Failed {
                    warn!(id, attempts, error, "action exhausted retries; parked as failed");
                }
                Ok(status)
            }
            None => {
                let current = self.existing_status(id).await?;
                Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: current.as_str().to_string(),
                    to: ActionStatus::Failed.as_str(),
                })
            }
        }
    }

    /// Gives every parked action a fresh set of attempts.
    pub async fn retry_failed(&self) -> Result<u64> {
        let requeued = db::requeue_failed(self.pool()?).await?;
        info!(requeued, "failed actions requeued");
        Ok(requeued)
    }

    #[instrument(skip_all, fields(key = %key, count = records.len()))]
    pub async fn save_dataset(&self, key: &str, records: Vec<Value>) -> Result<()> {
        db::upsert_dataset(self.pool()?, key, &records, Utc::now()).await
    }

    pub async fn get_dataset(&self, key: &str) -> Result<Option<CachedDataset>> {
        db::fetch_dataset(self.pool()?, key).await
    }

    pub async fn is_stale(&self, key: &str, max_age: Duration) -> Result<bool> {
        let last = db::dataset_refreshed_at(self.pool()?, key).await?;
        Ok(staleness::is_stale(last, max_age, Utc::now()))
    }

    async fn existing_status(&self, id: &str) -> Result<ActionStatus> {
        match db::fetch_action(self.pool()?, id).await? {
            Some(action) => Ok(action.status),
            None => Err(not_found("action", id)),
        }
    }
}

fn not_found(what: &'static str, key: &str) -> StoreError {
    warn!(what, key, "not found");
    StoreError::NotFound {
        what,
        key: key.to_string(),
    }
}
