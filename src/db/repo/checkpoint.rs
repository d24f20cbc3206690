//! Checkpoint persistence on the single-row `indexer_checkpoint` table, plus
//! the per-filter native positions in `filter_positions`.

use super::{now_ms, Repository};
use crate::checkpoint::{CheckpointEntry, CheckpointError, CheckpointPersistence, Cursor};
use crate::domain::{Domain, EventId};
use async_trait::async_trait;
use sqlx::Row;

fn columns(domain: Domain) -> (&'static str, &'static str) {
    match domain {
        Domain::Pair => ("pair_checkpoint", "pair_tx_digest"),
        Domain::Farm => ("farm_checkpoint", "farm_tx_digest"),
        Domain::Locker => ("locker_checkpoint", "locker_tx_digest"),
    }
}

#[async_trait]
impl CheckpointPersistence for Repository {
    async fn load_checkpoints(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let row = sqlx::query("SELECT * FROM indexer_checkpoint WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(Domain::ALL.len());
        for domain in Domain::ALL {
            let (cursor_col, tx_col) = columns(domain);
            let raw: String = row.try_get(cursor_col)?;
            let cursor: Cursor = raw.parse().map_err(|_| CheckpointError::InvalidCursor {
                domain,
                value: raw.clone(),
            })?;
            entries.push(CheckpointEntry {
                domain,
                cursor,
                last_tx_id: row.try_get(tx_col)?,
            });
        }
        Ok(entries)
    }

    async fn persist_checkpoint(&self, entry: &CheckpointEntry) -> Result<(), CheckpointError> {
        let (cursor_col, tx_col) = columns(entry.domain);
        let sql = format!(
            r#"
            INSERT INTO indexer_checkpoint (id, {cursor_col}, {tx_col}, last_sync_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                {cursor_col} = excluded.{cursor_col},
                {tx_col} = excluded.{tx_col},
                last_sync_at = excluded.last_sync_at
            "#
        );
        sqlx::query(&sql)
            .bind(entry.cursor.to_string())
            .bind(entry.last_tx_id.as_deref())
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl Repository {
    /// Record the last envelope a filter finished with.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn save_filter_position(
        &self,
        event_type: &str,
        id: &EventId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO filter_positions (event_type, tx_digest, event_seq, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(event_type) DO UPDATE SET
                tx_digest = excluded.tx_digest,
                event_seq = excluded.event_seq,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event_type)
        .bind(&id.tx_digest)
        .bind(&id.event_seq)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_filter_position(
        &self,
        event_type: &str,
    ) -> Result<Option<EventId>, sqlx::Error> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT tx_digest, event_seq FROM filter_positions WHERE event_type = ?",
        )
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(tx_digest, event_seq)| EventId::new(tx_digest, event_seq)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_repo;
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fresh_database_loads_genesis() {
        let (repo, _dir) = setup_repo().await;
        let entries = repo.load_checkpoints().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.cursor == Cursor::GENESIS));
    }

    #[tokio::test]
    async fn test_domains_persist_independently() {
        let (repo, _dir) = setup_repo().await;
        repo.persist_checkpoint(&CheckpointEntry {
            domain: Domain::Farm,
            cursor: Cursor::new(1_700_000_000_123),
            last_tx_id: Some("farmtx".to_string()),
        })
        .await
        .unwrap();

        let store = CheckpointStore::new(Arc::new(repo));
        store.load().await.unwrap();
        assert_eq!(store.get(Domain::Farm), Cursor::new(1_700_000_000_123));
        assert_eq!(store.get(Domain::Pair), Cursor::GENESIS);
        assert_eq!(store.get(Domain::Locker), Cursor::GENESIS);
    }

    #[tokio::test]
    async fn test_corrupt_cursor_is_reported() {
        let (repo, _dir) = setup_repo().await;
        sqlx::query("UPDATE indexer_checkpoint SET locker_checkpoint = 'garbage' WHERE id = 1")
            .execute(repo.pool())
            .await
            .unwrap();

        let err = repo.load_checkpoints().await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::InvalidCursor {
                domain: Domain::Locker,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_filter_position_overwrites() {
        let (repo, _dir) = setup_repo().await;
        let swap = "0xpair::pair::Swap";
        assert!(repo.load_filter_position(swap).await.unwrap().is_none());

        repo.save_filter_position(swap, &EventId::new("a", "0")).await.unwrap();
        repo.save_filter_position(swap, &EventId::new("b", "3")).await.unwrap();
        repo.save_filter_position("0xfarm::farm::Staked", &EventId::new("c", "1"))
            .await
            .unwrap();

        assert_eq!(
            repo.load_filter_position(swap).await.unwrap(),
            Some(EventId::new("b", "3"))
        );
    }
}
