//! Farm-domain operations: pools, stakes and reward claims.

use super::{amount_col, event_key, mark_applied, ms, now_ms, to_i64, Repository};
use crate::domain::{Address, Amount, EventMeta, FarmEvent, PositionStatus, TimeMs};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::debug;

/// Authoritative pool parameters, fees already in basis points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmPoolUpsert {
    pub pool_type: String,
    pub allocation_points: Amount,
    pub deposit_fee_bps: u64,
    pub withdrawal_fee_bps: u64,
    pub is_native_pair: bool,
    pub is_lp_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmPoolRow {
    pub pool_type: String,
    pub allocation_points: Amount,
    pub deposit_fee_bps: i64,
    pub withdrawal_fee_bps: i64,
    pub is_native_pair: bool,
    pub is_lp_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmPositionRow {
    pub user: Address,
    pub pool_type: String,
    pub staked_amount: Amount,
    pub rewards_claimed: Amount,
    pub status: PositionStatus,
    pub opened_at: TimeMs,
    pub closed_at: Option<TimeMs>,
}

impl Repository {
    // =========================================================================
    // Event application
    // =========================================================================

    /// Record a stake and mark the position active with the staked amount.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_farm_staked(&self, event: &FarmEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !insert_farm_event(&mut tx, "farm_staked_events", event).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        ensure_pool(&mut tx, &event.pool_type).await?;

        sqlx::query(
            r#"
            INSERT INTO farm_positions (user_address, pool_type, staked_amount, status, opened_at, updated_at)
            VALUES (?, ?, ?, 'active', ?, ?)
            ON CONFLICT(user_address, pool_type) DO UPDATE SET
                staked_amount = excluded.staked_amount,
                status = 'active',
                closed_at = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.staker.as_str())
        .bind(&event.pool_type)
        .bind(event.amount.to_canonical_string())
        .bind(ms(event.meta.event_time))
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record an unstake and close the position with a zero balance.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_farm_unstaked(&self, event: &FarmEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !insert_farm_event(&mut tx, "farm_unstaked_events", event).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        ensure_pool(&mut tx, &event.pool_type).await?;

        let at = ms(event.meta.event_time);
        sqlx::query(
            r#"
            INSERT INTO farm_positions (user_address, pool_type, staked_amount, status,
                opened_at, closed_at, updated_at)
            VALUES (?, ?, '0', 'closed', ?, ?, ?)
            ON CONFLICT(user_address, pool_type) DO UPDATE SET
                staked_amount = '0',
                status = 'closed',
                closed_at = excluded.closed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.staker.as_str())
        .bind(&event.pool_type)
        .bind(at)
        .bind(at)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a reward claim and add it to the position's claimed total.
    ///
    /// A claim for a position not seen yet is recorded without touching
    /// position state.
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the stored total is corrupt.
    pub async fn apply_farm_reward_claimed(&self, event: &FarmEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !insert_farm_event(&mut tx, "farm_reward_claimed_events", event).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        ensure_pool(&mut tx, &event.pool_type).await?;

        let row = sqlx::query(
            "SELECT rewards_claimed FROM farm_positions WHERE user_address = ? AND pool_type = ?",
        )
        .bind(event.staker.as_str())
        .bind(&event.pool_type)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => {
                let total = amount_col(&row, "rewards_claimed")? + event.amount.clone();
                sqlx::query(
                    r#"
                    UPDATE farm_positions SET rewards_claimed = ?, updated_at = ?
                    WHERE user_address = ? AND pool_type = ?
                    "#,
                )
                .bind(total.to_canonical_string())
                .bind(now_ms())
                .bind(event.staker.as_str())
                .bind(&event.pool_type)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                debug!(
                    staker = %event.staker,
                    pool_type = %event.pool_type,
                    "Reward claim for unknown farm position"
                );
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Create or overwrite a pool's parameters.
    ///
    /// Returns false if the event in `meta` was already applied.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_farm_pool(
        &self,
        meta: &EventMeta,
        pool: &FarmPoolUpsert,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !mark_applied(&mut tx, meta, "PoolCreated").await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO farm_pools (pool_type, allocation_points, deposit_fee_bps, withdrawal_fee_bps,
                is_native_pair, is_lp_token, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pool_type) DO UPDATE SET
                allocation_points = excluded.allocation_points,
                deposit_fee_bps = excluded.deposit_fee_bps,
                withdrawal_fee_bps = excluded.withdrawal_fee_bps,
                is_native_pair = excluded.is_native_pair,
                is_lp_token = excluded.is_lp_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pool.pool_type)
        .bind(pool.allocation_points.to_canonical_string())
        .bind(to_i64(pool.deposit_fee_bps))
        .bind(to_i64(pool.withdrawal_fee_bps))
        .bind(pool.is_native_pair)
        .bind(pool.is_lp_token)
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

    pub async fn get_farm_pool(&self, pool_type: &str) -> Result<Option<FarmPoolRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT pool_type, allocation_points, deposit_fee_bps, withdrawal_fee_bps,
                is_native_pair, is_lp_token
            FROM farm_pools WHERE pool_type = ?
            "#,
        )
        .bind(pool_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<FarmPoolRow, sqlx::Error> {
            Ok(FarmPoolRow {
                pool_type: row.try_get("pool_type")?,
                allocation_points: amount_col(&row, "allocation_points")?,
                deposit_fee_bps: row.try_get("deposit_fee_bps")?,
                withdrawal_fee_bps: row.try_get("withdrawal_fee_bps")?,
                is_native_pair: row.try_get("is_native_pair")?,
                is_lp_token: row.try_get("is_lp_token")?,
            })
        })
        .transpose()
    }

    pub async fn get_farm_position(
        &self,
        user: &Address,
        pool_type: &str,
    ) -> Result<Option<FarmPositionRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT user_address, pool_type, staked_amount, rewards_claimed, status, opened_at, closed_at
            FROM farm_positions WHERE user_address = ? AND pool_type = ?
            "#,
        )
        .bind(user.as_str())
        .bind(pool_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<FarmPositionRow, sqlx::Error> {
            let status: String = row.try_get("status")?;
            Ok(FarmPositionRow {
                user: Address::new(row.try_get::<String, _>("user_address")?),
                pool_type: row.try_get("pool_type")?,
                staked_amount: amount_col(&row, "staked_amount")?,
                rewards_claimed: amount_col(&row, "rewards_claimed")?,
                status: PositionStatus::from_str(&status).map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "status".to_string(),
                        source: e.into(),
                    }
                })?,
                opened_at: TimeMs::new(row.try_get("opened_at")?),
                closed_at: row.try_get::<Option<i64>, _>("closed_at")?.map(TimeMs::new),
            })
        })
        .transpose()
    }
}

async fn insert_farm_event(
    tx: &mut Transaction<'_, Sqlite>,
    table: &'static str,
    event: &FarmEvent,
) -> Result<bool, sqlx::Error> {
    let (tx_digest, event_seq) = event_key(&event.meta.id);
    let sql = format!(
        r#"
        INSERT INTO {} (tx_digest, event_seq, event_time, staker, pool_type, amount, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tx_digest, event_seq) DO NOTHING
        "#,
        table
    );

    let result = sqlx::query(&sql)
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.staker.as_str())
        .bind(&event.pool_type)
        .bind(event.amount.to_canonical_string())
        .bind(event.timestamp.map(to_i64))
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Lazily create a zeroed pool so positions always reference a known pool.
/// An existing pool is left untouched.
async fn ensure_pool(tx: &mut Transaction<'_, Sqlite>, pool_type: &str) -> Result<(), sqlx::Error> {
    let now = now_ms();
    sqlx::query(
        r#"
        INSERT INTO farm_pools (pool_type, allocation_points, deposit_fee_bps, withdrawal_fee_bps,
            is_native_pair, is_lp_token, created_at, updated_at)
        VALUES (?, '0', 0, 0, 0, 1, ?, ?)
        ON CONFLICT(pool_type) DO NOTHING
        "#,
    )
    .bind(pool_type)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
