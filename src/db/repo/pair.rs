//! Pair-domain operations: swaps, liquidity positions and reserves.

use super::{amount_col, event_key, mark_applied, ms, now_ms, to_i64, Repository};
use crate::domain::{
    Address, Amount, LiquidityEvent, PairCreatedEvent, PositionStatus, SwapEvent, SyncEvent,
    TimeMs,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRow {
    pub address: Address,
    pub token0: String,
    pub token1: String,
    pub reserve0: Amount,
    pub reserve1: Amount,
    pub total_supply: Amount,
    pub pair_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpPositionRow {
    pub lp_coin_id: String,
    pub owner: Address,
    pub pair_address: Address,
    pub token0_amount: Amount,
    pub token1_amount: Amount,
    pub liquidity: Amount,
    pub status: PositionStatus,
    pub opened_at: TimeMs,
    pub closed_at: Option<TimeMs>,
}

impl Repository {
    // =========================================================================
    // Event application
    // =========================================================================

    /// Record a swap.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn apply_swap(&self, event: &SwapEvent) -> Result<bool, sqlx::Error> {
        let (tx_digest, event_seq) = event_key(&event.meta.id);
        let result = sqlx::query(
            r#"
            INSERT INTO swap_events (tx_digest, event_seq, event_time, pair_address, sender,
                amount0_in, amount1_in, amount0_out, amount1_out)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.pair_address.as_str())
        .bind(event.sender.as_str())
        .bind(event.amount0_in.to_canonical_string())
        .bind(event.amount1_in.to_canonical_string())
        .bind(event.amount0_out.to_canonical_string())
        .bind(event.amount1_out.to_canonical_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a mint, make sure the pair exists, and open the LP position.
    ///
    /// The pair's total supply only moves forward in event time, since mints
    /// and burns arrive on separate filters.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_lp_mint(&self, event: &LiquidityEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !insert_liquidity_event(&mut tx, "lp_mint_events", event).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO pairs (address, token0, token1, reserve0, reserve1, total_supply,
                supply_event_time, created_at, updated_at)
            VALUES (?, ?, ?, '0', '0', ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                total_supply = CASE WHEN pairs.supply_event_time IS NULL
                        OR excluded.supply_event_time >= pairs.supply_event_time
                    THEN excluded.total_supply ELSE pairs.total_supply END,
                supply_event_time = MAX(COALESCE(pairs.supply_event_time, excluded.supply_event_time),
                    excluded.supply_event_time),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.pair_address.as_str())
        .bind(&event.token0)
        .bind(&event.token1)
        .bind(event.total_supply.to_canonical_string())
        .bind(ms(event.meta.event_time))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO lp_positions (lp_coin_id, owner, pair_address, token0, token1,
                token0_amount, token1_amount, liquidity, status, opened_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
            ON CONFLICT(lp_coin_id) DO NOTHING
            "#,
        )
        .bind(&event.lp_coin_id)
        .bind(event.sender.as_str())
        .bind(event.pair_address.as_str())
        .bind(&event.token0)
        .bind(&event.token1)
        .bind(event.amount0.to_canonical_string())
        .bind(event.amount1.to_canonical_string())
        .bind(event.liquidity.to_canonical_string())
        .bind(ms(event.meta.event_time))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a burn and close the LP position if it is still active.
    ///
    /// A burn for an unknown position is recorded but creates no position.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_lp_burn(&self, event: &LiquidityEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !insert_liquidity_event(&mut tx, "lp_burn_events", event).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let closed = sqlx::query(
            r#"
            UPDATE lp_positions SET status = 'closed', closed_at = ?
            WHERE lp_coin_id = ? AND status = 'active'
            "#,
        )
        .bind(ms(event.meta.event_time))
        .bind(&event.lp_coin_id)
        .execute(&mut *tx)
        .await?;
        if closed.rows_affected() == 0 {
            debug!(lp_coin_id = %event.lp_coin_id, "Burn for unknown or closed LP position");
        }

        let event_time = ms(event.meta.event_time);
        sqlx::query(
            r#"
            UPDATE pairs SET total_supply = ?, supply_event_time = ?, updated_at = ?
            WHERE address = ? AND (supply_event_time IS NULL OR supply_event_time <= ?)
            "#,
        )
        .bind(event.total_supply.to_canonical_string())
        .bind(event_time)
        .bind(now_ms())
        .bind(event.pair_address.as_str())
        .bind(event_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a reserve sync and set the pair's reserves.
    ///
    /// Pairs are only created by `PairCreated` or a mint; a sync for an
    /// unknown pair is recorded without touching `pairs`.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_sync(&self, event: &SyncEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let (tx_digest, event_seq) = event_key(&event.meta.id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_events (tx_digest, event_seq, event_time, pair_address, reserve0, reserve1)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.pair_address.as_str())
        .bind(event.reserve0.to_canonical_string())
        .bind(event.reserve1.to_canonical_string())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let updated = sqlx::query(
            "UPDATE pairs SET reserve0 = ?, reserve1 = ?, updated_at = ? WHERE address = ?",
        )
        .bind(event.reserve0.to_canonical_string())
        .bind(event.reserve1.to_canonical_string())
        .bind(now_ms())
        .bind(event.pair_address.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            debug!(pair = %event.pair_address, "Sync for unknown pair");
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Create the pair with zero reserves, or set its token types and index if
    /// a mint created it first. Existing reserves and supply are kept.
    ///
    /// Returns false if this event was already applied.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_pair_created(&self, event: &PairCreatedEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !mark_applied(&mut tx, &event.meta, "PairCreated").await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO pairs (address, token0, token1, reserve0, reserve1, total_supply,
                pair_index, created_at, updated_at)
            VALUES (?, ?, ?, '0', '0', '0', ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                token0 = excluded.token0,
                token1 = excluded.token1,
                pair_index = COALESCE(excluded.pair_index, pairs.pair_index),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.pair_address.as_str())
        .bind(&event.token0)
        .bind(&event.token1)
        .bind(event.pair_len.map(to_i64))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a pair by address.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored amount is corrupt.
    pub async fn get_pair(&self, address: &Address) -> Result<Option<PairRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT address, token0, token1, reserve0, reserve1, total_supply, pair_index
            FROM pairs WHERE address = ?
            "#,
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<PairRow, sqlx::Error> {
            Ok(PairRow {
                address: Address::new(row.try_get::<String, _>("address")?),
                token0: row.try_get("token0")?,
                token1: row.try_get("token1")?,
                reserve0: amount_col(&row, "reserve0")?,
                reserve1: amount_col(&row, "reserve1")?,
                total_supply: amount_col(&row, "total_supply")?,
                pair_index: row.try_get("pair_index")?,
            })
        })
        .transpose()
    }

    /// Get an LP position by LP coin id.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value is corrupt.
    pub async fn get_lp_position(
        &self,
        lp_coin_id: &str,
    ) -> Result<Option<LpPositionRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT lp_coin_id, owner, pair_address, token0_amount, token1_amount, liquidity,
                status, opened_at, closed_at
            FROM lp_positions WHERE lp_coin_id = ?
            "#,
        )
        .bind(lp_coin_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_lp_position(&row)).transpose()
    }

    pub async fn count_lp_burn_events(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lp_burn_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn insert_liquidity_event(
    tx: &mut Transaction<'_, Sqlite>,
    table: &'static str,
    event: &LiquidityEvent,
) -> Result<bool, sqlx::Error> {
    let (tx_digest, event_seq) = event_key(&event.meta.id);
    let sql = format!(
        r#"
        INSERT INTO {} (tx_digest, event_seq, event_time, lp_coin_id, pair_address, sender,
            token0, token1, amount0, amount1, liquidity, total_supply)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tx_digest, event_seq) DO NOTHING
        "#,
        table
    );

    let result = sqlx::query(&sql)
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(&event.lp_coin_id)
        .bind(event.pair_address.as_str())
        .bind(event.sender.as_str())
        .bind(&event.token0)
        .bind(&event.token1)
        .bind(event.amount0.to_canonical_string())
        .bind(event.amount1.to_canonical_string())
        .bind(event.liquidity.to_canonical_string())
        .bind(event.total_supply.to_canonical_string())
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn decode_lp_position(row: &SqliteRow) -> Result<LpPositionRow, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(LpPositionRow {
        lp_coin_id: row.try_get("lp_coin_id")?,
        owner: Address::new(row.try_get::<String, _>("owner")?),
        pair_address: Address::new(row.try_get::<String, _>("pair_address")?),
        token0_amount: amount_col(row, "token0_amount")?,
        token1_amount: amount_col(row, "token1_amount")?,
        liquidity: amount_col(row, "liquidity")?,
        status: PositionStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: e.into(),
        })?,
        opened_at: TimeMs::new(row.try_get("opened_at")?),
        closed_at: row.try_get::<Option<i64>, _>("closed_at")?.map(TimeMs::new),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{meta, setup_repo};
    use super::*;

    fn liquidity(tx: &str, lp_coin_id: &str, time_ms: i64) -> LiquidityEvent {
        LiquidityEvent {
            meta: meta(tx, "0", time_ms),
            lp_coin_id: lp_coin_id.to_string(),
            pair_address: Address::new("0xpair"),
            sender: Address::new("0xuser"),
            token0: "0x2::sui::SUI".to_string(),
            token1: "0xdef::usdc::USDC".to_string(),
            amount0: Amount::from(1000u64),
            amount1: Amount::from(2000u64),
            liquidity: Amount::from(1414u64),
            total_supply: Amount::from(5000u64),
        }
    }

    #[tokio::test]
    async fn test_lp_lifecycle() {
        let (repo, _dir) = setup_repo().await;

        assert!(repo.apply_lp_mint(&liquidity("mint", "L1", 1_000)).await.unwrap());
        let position = repo.get_lp_position("L1").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Active);
        assert_eq!(position.owner.as_str(), "0xuser");

        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert!(pair.reserve0.is_zero());
        assert_eq!(pair.token0, "0x2::sui::SUI");

        assert!(repo.apply_lp_burn(&liquidity("burn", "L1", 2_000)).await.unwrap());
        let position = repo.get_lp_position("L1").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.closed_at, Some(TimeMs::new(2_000)));

        // a second close never happens
        assert!(repo.apply_lp_burn(&liquidity("burn2", "L1", 3_000)).await.unwrap());
        let position = repo.get_lp_position("L1").await.unwrap().unwrap();
        assert_eq!(position.closed_at, Some(TimeMs::new(2_000)));
    }

    #[tokio::test]
    async fn test_burn_without_mint_creates_nothing() {
        let (repo, _dir) = setup_repo().await;

        assert!(repo.apply_lp_burn(&liquidity("burn", "L9", 1_000)).await.unwrap());
        assert!(repo.get_lp_position("L9").await.unwrap().is_none());

        assert!(!repo.apply_lp_burn(&liquidity("burn", "L9", 1_000)).await.unwrap());
        assert_eq!(repo.count_lp_burn_events().await.unwrap(), 1);
    }

    fn sync(tx: &str, time_ms: i64, reserve0: u64, reserve1: u64) -> SyncEvent {
        SyncEvent {
            meta: meta(tx, "0", time_ms),
            pair_address: Address::new("0xpair"),
            reserve0: Amount::from(reserve0),
            reserve1: Amount::from(reserve1),
        }
    }

    fn created(tx: &str) -> PairCreatedEvent {
        PairCreatedEvent {
            meta: meta(tx, "0", 500),
            pair_address: Address::new("0xpair"),
            token0: "A".to_string(),
            token1: "B".to_string(),
            pair_len: Some(1),
        }
    }

    #[tokio::test]
    async fn test_sync_never_creates_pair() {
        let (repo, _dir) = setup_repo().await;

        let early = sync("sync1", 1_000, 10, 20);
        assert!(repo.apply_sync(&early).await.unwrap());
        assert!(!repo.apply_sync(&early).await.unwrap());
        assert!(repo.get_pair(&Address::new("0xpair")).await.unwrap().is_none());

        assert!(repo.upsert_pair_created(&created("create")).await.unwrap());
        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert!(pair.reserve0.is_zero());

        assert!(repo.apply_sync(&sync("sync2", 2_000, 30, 40)).await.unwrap());
        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert_eq!(pair.token0, "A");
        assert_eq!(pair.reserve0.to_canonical_string(), "30");
        assert_eq!(pair.reserve1.to_canonical_string(), "40");
        assert_eq!(pair.pair_index, Some(1));
    }

    #[tokio::test]
    async fn test_pair_created_after_mint_keeps_supply_and_reserves() {
        let (repo, _dir) = setup_repo().await;
        repo.apply_lp_mint(&liquidity("mint", "L1", 2_000)).await.unwrap();
        repo.apply_sync(&sync("sync", 2_000, 10, 20)).await.unwrap();

        assert!(repo.upsert_pair_created(&created("create")).await.unwrap());
        assert!(!repo.upsert_pair_created(&created("create")).await.unwrap());
        repo.apply_lp_mint(&liquidity("mint2", "L2", 3_000)).await.unwrap();

        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert_eq!(pair.token0, "A");
        assert_eq!(pair.reserve0.to_canonical_string(), "10");
        assert_eq!(pair.total_supply.to_canonical_string(), "5000");
    }

    #[tokio::test]
    async fn test_older_liquidity_event_does_not_overwrite_supply() {
        let (repo, _dir) = setup_repo().await;

        let mut mint = liquidity("mint", "L1", 1_000);
        mint.total_supply = Amount::from(1000u64);
        repo.apply_lp_mint(&mint).await.unwrap();

        let mut late_mint = liquidity("mint2", "L2", 3_000);
        late_mint.total_supply = Amount::from(3000u64);
        repo.apply_lp_mint(&late_mint).await.unwrap();

        // Burn from between the two mints, delivered last.
        let mut burn = liquidity("burn", "L1", 2_000);
        burn.total_supply = Amount::from(500u64);
        assert!(repo.apply_lp_burn(&burn).await.unwrap());

        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert_eq!(pair.total_supply.to_canonical_string(), "3000");
        // The position still closes.
        let position = repo.get_lp_position("L1").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);

        // Same for a stale mint arriving after a newer burn.
        let mut burn2 = liquidity("burn2", "L2", 4_000);
        burn2.total_supply = Amount::from(2000u64);
        repo.apply_lp_burn(&burn2).await.unwrap();
        let mut stale_mint = liquidity("mint3", "L3", 3_500);
        stale_mint.total_supply = Amount::from(9999u64);
        repo.apply_lp_mint(&stale_mint).await.unwrap();

        let pair = repo.get_pair(&Address::new("0xpair")).await.unwrap().unwrap();
        assert_eq!(pair.total_supply.to_canonical_string(), "2000");
    }

    #[tokio::test]
    async fn test_swap_is_idempotent() {
        let (repo, _dir) = setup_repo().await;
        let swap = SwapEvent {
            meta: meta("swap", "3", 1_000),
            pair_address: Address::new("0xpair"),
            sender: Address::new("0xuser"),
            amount0_in: Amount::from(5u64),
            amount1_in: Amount::zero(),
            amount0_out: Amount::zero(),
            amount1_out: Amount::from(9u64),
        };
        assert!(repo.apply_swap(&swap).await.unwrap());
        assert!(!repo.apply_swap(&swap).await.unwrap());
    }
}
