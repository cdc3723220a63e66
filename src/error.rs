//! Error taxonomy shared by the store, the sync engine and the bootstrapper.
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    /// The action exists but is not in a state that allows the transition.
    #[error("action {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: &'static str,
    },
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery failed: {0}")]
    Failed(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    #[error("loader failed: {0}")]
    Failed(String),
    #[error("loader timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by `SyncEngine::trigger_sync`. Cloneable so every caller
/// awaiting the same pass observes the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("offline")]
    Offline,
    #[error("sync aborted by storage error: {0}")]
    Storage(String),
    #[error("sync pass ended unexpectedly: {0}")]
    Unexpected(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Storage(err.to_string())
    }
}
