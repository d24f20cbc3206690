//! Envelopes that could not be applied after every delivery attempt.

use super::{now_ms, Repository};
use crate::domain::{Domain, RawEvent};
use sqlx::Row;

/// An envelope parked after its final failed attempt.
#[derive(Debug, Clone)]
pub struct DeadLetter<'a> {
    pub envelope: &'a RawEvent,
    pub domain: Domain,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRow {
    pub tx_digest: String,
    pub event_seq: String,
    pub domain: String,
    pub event_type: String,
    pub envelope: serde_json::Value,
    pub error: String,
    pub attempts: i64,
    pub first_failed_at: i64,
    pub last_failed_at: i64,
}

impl Repository {
    /// Park an envelope. Parking the same event again accumulates attempts and
    /// keeps the latest error.
    ///
    /// # Errors
    /// Returns an error if serialization or the insert fails.
    pub async fn insert_dead_letter(&self, letter: &DeadLetter<'_>) -> Result<(), sqlx::Error> {
        let envelope = serde_json::to_string(letter.envelope)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to encode envelope: {}", e)))?;
        let now = now_ms();

        sqlx::query(
            r#"
            INSERT INTO dead_letters (tx_digest, event_seq, domain, event_type, envelope, error,
                attempts, first_failed_at, last_failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO UPDATE SET
                error = excluded.error,
                attempts = dead_letters.attempts + excluded.attempts,
                last_failed_at = excluded.last_failed_at
            "#,
        )
        .bind(&letter.envelope.id.tx_digest)
        .bind(&letter.envelope.id.event_seq)
        .bind(letter.domain.as_str())
        .bind(&letter.envelope.event_type)
        .bind(envelope)
        .bind(&letter.error)
        .bind(i64::from(letter.attempts))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT tx_digest, event_seq, domain, event_type, envelope, error, attempts,
                first_failed_at, last_failed_at
            FROM dead_letters ORDER BY first_failed_at ASC, tx_digest ASC, event_seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DeadLetterRow, sqlx::Error> {
                let envelope: String = row.try_get("envelope")?;
                Ok(DeadLetterRow {
                    tx_digest: row.try_get("tx_digest")?,
                    event_seq: row.try_get("event_seq")?,
                    domain: row.try_get("domain")?,
                    event_type: row.try_get("event_type")?,
                    envelope: serde_json::from_str(&envelope).map_err(|e| {
                        sqlx::Error::ColumnDecode {
                            index: "envelope".to_string(),
                            source: Box::new(e),
                        }
                    })?,
                    error: row.try_get("error")?,
                    attempts: row.try_get("attempts")?,
                    first_failed_at: row.try_get("first_failed_at")?,
                    last_failed_at: row.try_get("last_failed_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_repo;
    use super::*;
    use crate::domain::EventId;

    fn raw() -> RawEvent {
        RawEvent {
            id: EventId::new("badtx", "3"),
            package_id: "0xpkg".to_string(),
            transaction_module: "pair".to_string(),
            sender: "0xsender".to_string(),
            event_type: "0xpkg::pair::Swap<0x2::sui::SUI, 0xc::c::C>".to_string(),
            parsed_json: serde_json::json!({ "amount0_in": "not a number" }),
            timestamp_ms: Some("1700000000000".to_string()),
            bcs: None,
        }
    }

    #[tokio::test]
    async fn test_dead_letter_accumulates_attempts() {
        let (repo, _dir) = setup_repo().await;
        let envelope = raw();
        let letter = DeadLetter {
            envelope: &envelope,
            domain: Domain::Pair,
            error: "first".to_string(),
            attempts: 5,
        };
        repo.insert_dead_letter(&letter).await.unwrap();
        repo.insert_dead_letter(&DeadLetter {
            error: "second".to_string(),
            ..letter.clone()
        })
        .await
        .unwrap();

        let rows = repo.list_dead_letters().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 10);
        assert_eq!(rows[0].error, "second");
        assert_eq!(rows[0].domain, "pair");
        assert_eq!(rows[0].envelope["id"]["txDigest"], "badtx");
    }
}
