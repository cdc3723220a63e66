use super::model::{action_from_row, dataset_from_row};
use crate::error::StoreError;
use crate::model::{ActionKind, ActionStatus, CachedDataset, QueuedAction};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;
type Result<T> = std::result::Result<T, StoreError>;

const ACTION_COLUMNS: &str =
    "id, kind, payload, status, attempts, last_error, created_at_ms, completed_at_ms";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .synchronous(SqliteSynchronous::Full);
    // WAL needs a file; every pooled in-memory connection would see its own database.
    if !in_memory {
        create_parent_dir(&options.clone().get_filename())?;
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    let mut pool_options = SqlitePoolOptions::new().max_connections(4);
    if in_memory {
        // The database lives only as long as its single connection.
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;
    Ok(pool)
}

/// SQLite creates the database file on connect but not its directory.
fn create_parent_dir(db_file: &Path) -> Result<()> {
    match db_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir).map_err(|err| {
            StoreError::StorageUnavailable(format!("cannot create {}: {err}", dir.display()))
        }),
        _ => Ok(()),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_action(
    pool: &Pool,
    id: &str,
    kind: ActionKind,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<()> {
    let now_ms = now.timestamp_millis();
    sqlx::query(
        "INSERT INTO actions (id, kind, payload, status, attempts, created_at_ms, updated_at_ms) \
         VALUES (?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(id)
    .bind(kind.as_str())
    .bind(serde_json::to_string(payload)?)
    .bind(now_ms)
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_action(pool: &Pool, id: &str) -> Result<Option<QueuedAction>> {
    let row = sqlx::query(&format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(action_from_row).transpose()
}

/// Pending actions plus failed ones still under the retry limit, oldest first.
#[instrument(skip_all)]
pub async fn list_deliverable(pool: &Pool, retry_limit: u32) -> Result<Vec<QueuedAction>> {
    let rows = sqlx::query(&format!(
        "SELECT {ACTION_COLUMNS} FROM actions \
         WHERE status = 'pending' OR (status = 'failed' AND attempts < ?) \
         ORDER BY created_at_ms ASC, seq ASC"
    ))
    .bind(i64::from(retry_limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(action_from_row).collect()
}

#[instrument(skip_all)]
pub async fn list_by_status(pool: &Pool, status: ActionStatus) -> Result<Vec<QueuedAction>> {
    let rows = sqlx::query(&format!(
        "SELECT {ACTION_COLUMNS} FROM actions WHERE status = ? ORDER BY created_at_ms ASC, seq ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(action_from_row).collect()
}

/// Moves a deliverable action to `in_flight`. Returns false when the action is
/// missing or not deliverable (already claimed, completed or parked).
#[instrument(skip_all)]
pub async fn claim_action(pool: &Pool, id: &str, retry_limit: u32) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE actions SET status = 'in_flight', updated_at_ms = ? \
         WHERE id = ? AND (status = 'pending' OR (status = 'failed' AND attempts < ?))",
    )
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .bind(i64::from(retry_limit))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn complete_action(pool: &Pool, id: &str) -> Result<bool> {
    let now_ms = Utc::now().timestamp_millis();
    let res = sqlx::query(
        "UPDATE actions SET status = 'completed', completed_at_ms = ?, updated_at_ms = ?, last_error = NULL \
         WHERE id = ? AND status != 'completed'",
    )
    .bind(now_ms)
    .bind(now_ms)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Records a failed attempt in one statement. The action returns to `pending`
/// while the incremented attempt count is below `retry_limit`.
#[instrument(skip_all)]
pub async fn fail_action(
    pool: &Pool,
    id: &str,
    error: &str,
    retry_limit: u32,
) -> Result<Option<(ActionStatus, u32)>> {
    let row = sqlx::query(
        "UPDATE actions SET attempts = attempts + 1, \
             status = CASE WHEN attempts + 1 < ? THEN 'pending' ELSE 'failed' END, \
             last_error = ?, updated_at_ms = ? \
         WHERE id = ? AND status IN ('pending', 'in_flight') \
         RETURNING status, attempts",
    )
    .bind(i64::from(retry_limit))
    .bind(error)
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let status: String = row.get("status");
    let attempts: i64 = row.get("attempts");
    let status = ActionStatus::parse_status(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("action {id} has unknown status {status}")))?;
    Ok(Some((status, u32::try_from(attempts).unwrap_or(u32::MAX))))
}

/// Returns actions stranded `in_flight` by a process that died mid-delivery.
#[instrument(skip_all)]
pub async fn recover_in_flight(pool: &Pool) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE actions SET status = 'pending', updated_at_ms = ? WHERE status = 'in_flight'",
    )
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn requeue_failed(pool: &Pool) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE actions SET status = 'pending', attempts = 0, updated_at_ms = ? WHERE status = 'failed'",
    )
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_remaining(pool: &Pool) -> Result<u64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM actions WHERE status IN ('pending', 'failed')")
            .fetch_one(pool)
            .await?;
    u64::try_from(count)
        .map_err(|_| StoreError::Corrupt(format!("negative action count {count}")))
}

/// Replaces a dataset in a single upsert so readers see either the old or the
/// new records, never a mix.
#[instrument(skip_all)]
pub async fn upsert_dataset(
    pool: &Pool,
    key: &str,
    records: &[Value],
    now: DateTime<Utc>,
) -> Result<()> {
    let encoded = serde_json::to_string(records)?;
    sqlx::query(
        "INSERT INTO datasets (key, records, record_count, last_refreshed_at_ms) VALUES (?, ?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET records = excluded.records, \
             record_count = excluded.record_count, \
             last_refreshed_at_ms = excluded.last_refreshed_at_ms",
    )
    .bind(key)
    .bind(encoded)
    .bind(records.len() as i64)
    .bind(now.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_dataset(pool: &Pool, key: &str) -> Result<Option<CachedDataset>> {
    let row =
        sqlx::query("SELECT key, records, last_refreshed_at_ms FROM datasets WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    row.as_ref().map(dataset_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn dataset_refreshed_at(pool: &Pool, key: &str) -> Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> =
        sqlx::query_scalar("SELECT last_refreshed_at_ms FROM datasets WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    ms.map(super::model::ms_to_datetime).transpose()
}
