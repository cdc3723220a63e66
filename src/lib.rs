//! Offline-first action queue with connectivity-aware replay for the
//! career-guidance app, plus a startup cache of reference datasets.

pub mod bootstrap;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod model;
pub mod monitor;
pub mod probe;
pub mod remote;
pub mod staleness;
pub mod store;
pub mod sync;

pub use error::{DeliveryError, LoaderError, StoreError, SyncError};
pub use model::{ActionKind, ActionStatus, CachedDataset, QueuedAction, SyncReport};
pub use store::ActionStore;
