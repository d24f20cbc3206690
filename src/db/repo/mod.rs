//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `pair.rs` - Swaps, liquidity positions and pair reserves
//! - `farm.rs` - Farm pools, stakes and reward claims
//! - `locker.rs` - Token locks, reward claims and weekly epochs
//! - `checkpoint.rs` - Per-domain resume cursors
//! - `dead_letter.rs` - Envelopes that exhausted their delivery attempts
//!
//! Every `apply_*` method runs in one transaction and is safe to call twice:
//! derived state changes only when the event row itself was newly inserted.
//! Upsert-only events have no table of their own and are marked in
//! `applied_events` instead.

mod checkpoint;
mod dead_letter;
mod farm;
mod locker;
mod pair;

pub use dead_letter::{DeadLetter, DeadLetterRow};
pub use farm::{FarmPoolRow, FarmPoolUpsert, FarmPositionRow};
pub use locker::{LockerEpochRow, LockerPositionRow};
pub use pair::{LpPositionRow, PairRow};

use crate::domain::{Amount, EventId, EventMeta, TimeMs};
use crate::retry::{classify_sqlx, LinearBackoff};
use backoff::future::retry_notify;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts per storage operation, including the first.
pub const STORE_RETRY_ATTEMPTS: u32 = 3;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    retry_delay: Duration,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository {
            pool,
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Base delay between storage retries; the n-th retry waits `delay * n`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run a storage operation, retrying transient failures with linear backoff.
    ///
    /// # Errors
    /// Returns the last error once attempts are exhausted, or the first
    /// permanent error.
    pub async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        retry_notify(
            LinearBackoff::new(self.retry_delay, STORE_RETRY_ATTEMPTS),
            || {
                let fut = f();
                async move { fut.await.map_err(classify_sqlx) }
            },
            |err: sqlx::Error, delay: Duration| {
                warn!(op, error = %err, ?delay, "Transient storage error, retrying");
            },
        )
        .await
    }
}

pub(crate) fn ms(time: TimeMs) -> i64 {
    time.as_i64()
}

/// SQLite integers are signed; chain values beyond i64 saturate.
pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn now_ms() -> i64 {
    TimeMs::now().as_i64()
}

pub(crate) fn amount_col(row: &SqliteRow, col: &str) -> Result<Amount, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Amount::from_str_canonical(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn opt_amount_col(row: &SqliteRow, col: &str) -> Result<Option<Amount>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        Amount::from_str_canonical(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: col.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

pub(crate) fn event_key(id: &EventId) -> (&str, &str) {
    (id.tx_digest.as_str(), id.event_seq.as_str())
}

/// Mark an upsert-only event as applied. Returns false if it already was.
pub(crate) async fn mark_applied(
    tx: &mut Transaction<'_, Sqlite>,
    meta: &EventMeta,
    kind: &'static str,
) -> Result<bool, sqlx::Error> {
    let (tx_digest, event_seq) = event_key(&meta.id);
    let result = sqlx::query(
        r#"
        INSERT INTO applied_events (tx_digest, event_seq, kind, event_time, applied_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(tx_digest, event_seq) DO NOTHING
        "#,
    )
    .bind(tx_digest)
    .bind(event_seq)
    .bind(kind)
    .bind(ms(meta.event_time))
    .bind(now_ms())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::db::init_db;
    use crate::domain::{Address, EventId, EventMeta, TimeMs};
    use tempfile::TempDir;

    pub async fn setup_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path, 2).await.unwrap();
        (Repository::new(pool), temp_dir)
    }

    pub fn meta(tx: &str, seq: &str, time_ms: i64) -> EventMeta {
        EventMeta {
            id: EventId::new(tx, seq),
            package_id: "0xpkg".to_string(),
            sender: Address::new("0xsender"),
            event_time: TimeMs::new(time_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_repo;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_passes_through_success() {
        let (repo, _dir) = setup_repo().await;
        let calls = AtomicU32::new(0);
        let value = repo
            .with_retry("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, sqlx::Error>(7) }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_three_attempts() {
        let (repo, _dir) = setup_repo().await;
        let repo = repo.with_retry_delay(std::time::Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = repo
            .with_retry("busy", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(sqlx::Error::PoolTimedOut) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
