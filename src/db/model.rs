//! Row shapes read back from the `actions` and `datasets` tables.
//!
//! Conversion into the domain types lives here so the repository functions
//! stay focused on SQL.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::StoreError;
use crate::model::{ActionKind, ActionStatus, CachedDataset, QueuedAction};

pub(crate) fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

pub(crate) fn action_from_row(row: &SqliteRow) -> Result<QueuedAction, StoreError> {
    let id: String = row.try_get("id")?;
    let kind_str: String = row.try_get("kind")?;
    let kind = ActionKind::parse_kind(&kind_str)
        .ok_or_else(|| StoreError::Corrupt(format!("action {id} has unknown kind {kind_str}")))?;
    let status_str: String = row.try_get("status")?;
    let status = ActionStatus::parse_status(&status_str).ok_or_else(|| {
        StoreError::Corrupt(format!("action {id} has unknown status {status_str}"))
    })?;
    let payload: String = row.try_get("payload")?;
    let attempts: i64 = row.try_get("attempts")?;
    let completed_at = row
        .try_get::<Option<i64>, _>("completed_at_ms")?
        .map(ms_to_datetime)
        .transpose()?;

    Ok(QueuedAction {
        payload: serde_json::from_str(&payload)?,
        kind,
        status,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Corrupt(format!("action {id} has attempts {attempts}")))?,
        last_error: row.try_get("last_error")?,
        created_at: ms_to_datetime(row.try_get("created_at_ms")?)?,
        completed_at,
        id,
    })
}

pub(crate) fn dataset_from_row(row: &SqliteRow) -> Result<CachedDataset, StoreError> {
    let records: String = row.try_get("records")?;
    Ok(CachedDataset {
        key: row.try_get("key")?,
        records: serde_json::from_str(&records)?,
        last_refreshed_at: ms_to_datetime(row.try_get("last_refreshed_at_ms")?)?,
    })
}
