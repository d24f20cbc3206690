//! Locker-domain operations: locks, reward claims and weekly epochs.

use super::{
    amount_col, event_key, mark_applied, ms, now_ms, opt_amount_col, to_i64, Repository,
};
use crate::domain::{
    Address, Amount, BucketValues, EpochCreatedEvent, LockPeriod, PoolSuiClaimedEvent,
    PositionStatus, TimeMs, TokensLockedEvent, TokensUnlockedEvent, VictoryRewardsClaimedEvent,
    WeeklyRevenueAddedEvent,
};
use crate::emission::WeekWindow;
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerPositionRow {
    pub user: Address,
    pub lock_id: String,
    pub amount: Amount,
    pub lock_period: LockPeriod,
    pub lock_end: TimeMs,
    pub victory_rewards_claimed: Amount,
    pub sui_rewards_claimed: Amount,
    pub status: PositionStatus,
    pub opened_at: TimeMs,
    pub closed_at: Option<TimeMs>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerEpochRow {
    pub epoch_id: String,
    pub week_number: i64,
    pub week_start: TimeMs,
    pub week_end: TimeMs,
    pub total_revenue: Option<Amount>,
    pub pool_sui: BucketValues<Option<Amount>>,
    pub pool_total_staked: BucketValues<Option<Amount>>,
    pub allocation_bps: BucketValues<Option<i64>>,
    pub dynamic_allocations_used: Option<bool>,
    pub is_claimable: bool,
}

#[derive(Debug, Clone, Copy)]
enum RewardColumn {
    Victory,
    Sui,
}

impl RewardColumn {
    fn name(self) -> &'static str {
        match self {
            RewardColumn::Victory => "victory_rewards_claimed",
            RewardColumn::Sui => "sui_rewards_claimed",
        }
    }
}

impl Repository {
    // =========================================================================
    // Event application
    // =========================================================================

    /// Record a lock and open the locker position.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_tokens_locked(
        &self,
        event: &TokensLockedEvent,
        bucket: LockPeriod,
        lock_end: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let (tx_digest, event_seq) = event_key(&event.meta.id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO locker_locked_events (tx_digest, event_seq, event_time, user_address, lock_id,
                amount, lock_period, lock_end)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.user.as_str())
        .bind(&event.lock_id)
        .bind(event.amount.to_canonical_string())
        .bind(to_i64(event.lock_period))
        .bind(to_i64(event.lock_end))
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO locker_positions (user_address, lock_id, amount, lock_period, lock_end,
                status, opened_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?)
            ON CONFLICT(user_address, lock_id) DO NOTHING
            "#,
        )
        .bind(event.user.as_str())
        .bind(&event.lock_id)
        .bind(event.amount.to_canonical_string())
        .bind(bucket.as_str())
        .bind(ms(lock_end))
        .bind(ms(event.meta.event_time))
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record an unlock and close the position if it is still active.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn apply_tokens_unlocked(
        &self,
        event: &TokensUnlockedEvent,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let (tx_digest, event_seq) = event_key(&event.meta.id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO locker_unlocked_events (tx_digest, event_seq, event_time, user_address, lock_id,
                amount, victory_rewards, sui_rewards, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.user.as_str())
        .bind(&event.lock_id)
        .bind(event.amount.to_canonical_string())
        .bind(event.victory_rewards.to_canonical_string())
        .bind(event.sui_rewards.to_canonical_string())
        .bind(event.timestamp.map(to_i64))
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = now_ms();
        sqlx::query(
            r#"
            UPDATE locker_positions SET status = 'closed', closed_at = ?, updated_at = ?
            WHERE user_address = ? AND lock_id = ? AND status = 'active'
            "#,
        )
        .bind(ms(event.meta.event_time))
        .bind(now)
        .bind(event.user.as_str())
        .bind(&event.lock_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a VICTORY claim and add it to the lock's claimed total.
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the stored total is corrupt.
    pub async fn apply_victory_claimed(
        &self,
        event: &VictoryRewardsClaimedEvent,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let (tx_digest, event_seq) = event_key(&event.meta.id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO locker_victory_claimed_events (tx_digest, event_seq, event_time, user_address,
                lock_id, amount, timestamp, total_claimed_for_lock)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.user.as_str())
        .bind(&event.lock_id)
        .bind(event.amount.to_canonical_string())
        .bind(event.timestamp.map(to_i64))
        .bind(
            event
                .total_claimed_for_lock
                .as_ref()
                .map(|a| a.to_canonical_string()),
        )
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        increment_reward(
            &mut tx,
            RewardColumn::Victory,
            &event.user,
            &event.lock_id,
            &event.amount,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a SUI revenue claim and add it to the lock's claimed total.
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the stored total is corrupt.
    pub async fn apply_sui_claimed(&self, event: &PoolSuiClaimedEvent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let (tx_digest, event_seq) = event_key(&event.meta.id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO locker_sui_claimed_events (tx_digest, event_seq, event_time, user_address,
                epoch_id, lock_id, lock_period, pool_type, amount_staked, sui_claimed, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_digest, event_seq) DO NOTHING
            "#,
        )
        .bind(tx_digest)
        .bind(event_seq)
        .bind(ms(event.meta.event_time))
        .bind(event.user.as_str())
        .bind(&event.epoch_id)
        .bind(&event.lock_id)
        .bind(to_i64(event.lock_period))
        .bind(i64::from(event.pool_type))
        .bind(event.amount_staked.to_canonical_string())
        .bind(event.sui_claimed.to_canonical_string())
        .bind(event.timestamp.map(to_i64))
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        increment_reward(
            &mut tx,
            RewardColumn::Sui,
            &event.user,
            &event.lock_id,
            &event.sui_claimed,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Create the epoch with its week window, or refresh the window of an
    /// epoch that revenue already created. Revenue fields are untouched.
    ///
    /// Returns false if this event was already applied.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_epoch_created(
        &self,
        event: &EpochCreatedEvent,
        window: WeekWindow,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !mark_applied(&mut tx, &event.meta, "EpochCreated").await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO locker_epochs (epoch_id, week_number, week_start, week_end, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(epoch_id) DO UPDATE SET
                week_number = excluded.week_number,
                week_start = excluded.week_start,
                week_end = excluded.week_end,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.epoch_id)
        .bind(to_i64(event.week_number))
        .bind(window.start_ms())
        .bind(window.end_ms())
        .bind(ms(event.meta.event_time))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Merge revenue figures into the epoch. Fields absent from the event keep
    /// their stored value.
    ///
    /// Returns false if this event was already applied.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn merge_weekly_revenue(
        &self,
        event: &WeeklyRevenueAddedEvent,
        window: WeekWindow,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if !mark_applied(&mut tx, &event.meta, "WeeklyRevenueAdded").await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let text = |a: &Option<Amount>| a.as_ref().map(|a| a.to_canonical_string());
        let now = now_ms();

        sqlx::query(
            r#"
            INSERT INTO locker_epochs (epoch_id, week_number, week_start, week_end, total_revenue,
                week_pool_sui, three_month_pool_sui, year_pool_sui, three_year_pool_sui,
                week_pool_total_staked, three_month_pool_total_staked, year_pool_total_staked,
                three_year_pool_total_staked,
                week_allocation_bps, three_month_allocation_bps, year_allocation_bps,
                three_year_allocation_bps, dynamic_allocations_used, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(epoch_id) DO UPDATE SET
                week_number = excluded.week_number,
                week_start = excluded.week_start,
                week_end = excluded.week_end,
                total_revenue = COALESCE(excluded.total_revenue, locker_epochs.total_revenue),
                week_pool_sui = COALESCE(excluded.week_pool_sui, locker_epochs.week_pool_sui),
                three_month_pool_sui = COALESCE(excluded.three_month_pool_sui, locker_epochs.three_month_pool_sui),
                year_pool_sui = COALESCE(excluded.year_pool_sui, locker_epochs.year_pool_sui),
                three_year_pool_sui = COALESCE(excluded.three_year_pool_sui, locker_epochs.three_year_pool_sui),
                week_pool_total_staked = COALESCE(excluded.week_pool_total_staked, locker_epochs.week_pool_total_staked),
                three_month_pool_total_staked = COALESCE(excluded.three_month_pool_total_staked, locker_epochs.three_month_pool_total_staked),
                year_pool_total_staked = COALESCE(excluded.year_pool_total_staked, locker_epochs.year_pool_total_staked),
                three_year_pool_total_staked = COALESCE(excluded.three_year_pool_total_staked, locker_epochs.three_year_pool_total_staked),
                week_allocation_bps = COALESCE(excluded.week_allocation_bps, locker_epochs.week_allocation_bps),
                three_month_allocation_bps = COALESCE(excluded.three_month_allocation_bps, locker_epochs.three_month_allocation_bps),
                year_allocation_bps = COALESCE(excluded.year_allocation_bps, locker_epochs.year_allocation_bps),
                three_year_allocation_bps = COALESCE(excluded.three_year_allocation_bps, locker_epochs.three_year_allocation_bps),
                dynamic_allocations_used = COALESCE(excluded.dynamic_allocations_used, locker_epochs.dynamic_allocations_used),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.epoch_id)
        .bind(to_i64(event.week_number))
        .bind(window.start_ms())
        .bind(window.end_ms())
        .bind(text(&event.total_week_revenue))
        .bind(text(&event.pool_sui.week))
        .bind(text(&event.pool_sui.three_month))
        .bind(text(&event.pool_sui.year))
        .bind(text(&event.pool_sui.three_year))
        .bind(text(&event.pool_total_staked.week))
        .bind(text(&event.pool_total_staked.three_month))
        .bind(text(&event.pool_total_staked.year))
        .bind(text(&event.pool_total_staked.three_year))
        .bind(event.allocation_bps.week.map(to_i64))
        .bind(event.allocation_bps.three_month.map(to_i64))
        .bind(event.allocation_bps.year.map(to_i64))
        .bind(event.allocation_bps.three_year.map(to_i64))
        .bind(event.dynamic_allocations_used)
        .bind(ms(event.meta.event_time))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_locker_position(
        &self,
        user: &Address,
        lock_id: &str,
    ) -> Result<Option<LockerPositionRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT user_address, lock_id, amount, lock_period, lock_end, victory_rewards_claimed,
                sui_rewards_claimed, status, opened_at, closed_at
            FROM locker_positions WHERE user_address = ? AND lock_id = ?
            "#,
        )
        .bind(user.as_str())
        .bind(lock_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<LockerPositionRow, sqlx::Error> {
            let lock_period: String = row.try_get("lock_period")?;
            let status: String = row.try_get("status")?;
            Ok(LockerPositionRow {
                user: Address::new(row.try_get::<String, _>("user_address")?),
                lock_id: row.try_get("lock_id")?,
                amount: amount_col(&row, "amount")?,
                lock_period: LockPeriod::from_str(&lock_period).map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "lock_period".to_string(),
                        source: e.into(),
                    }
                })?,
                lock_end: TimeMs::new(row.try_get("lock_end")?),
                victory_rewards_claimed: amount_col(&row, "victory_rewards_claimed")?,
                sui_rewards_claimed: amount_col(&row, "sui_rewards_claimed")?,
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

    pub async fn get_epoch(&self, epoch_id: &str) -> Result<Option<LockerEpochRow>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM locker_epochs WHERE epoch_id = ?")
            .bind(epoch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<LockerEpochRow, sqlx::Error> {
            Ok(LockerEpochRow {
                epoch_id: row.try_get("epoch_id")?,
                week_number: row.try_get("week_number")?,
                week_start: TimeMs::new(row.try_get("week_start")?),
                week_end: TimeMs::new(row.try_get("week_end")?),
                total_revenue: opt_amount_col(&row, "total_revenue")?,
                pool_sui: BucketValues {
                    week: opt_amount_col(&row, "week_pool_sui")?,
                    three_month: opt_amount_col(&row, "three_month_pool_sui")?,
                    year: opt_amount_col(&row, "year_pool_sui")?,
                    three_year: opt_amount_col(&row, "three_year_pool_sui")?,
                },
                pool_total_staked: BucketValues {
                    week: opt_amount_col(&row, "week_pool_total_staked")?,
                    three_month: opt_amount_col(&row, "three_month_pool_total_staked")?,
                    year: opt_amount_col(&row, "year_pool_total_staked")?,
                    three_year: opt_amount_col(&row, "three_year_pool_total_staked")?,
                },
                allocation_bps: BucketValues {
                    week: row.try_get("week_allocation_bps")?,
                    three_month: row.try_get("three_month_allocation_bps")?,
                    year: row.try_get("year_allocation_bps")?,
                    three_year: row.try_get("three_year_allocation_bps")?,
                },
                dynamic_allocations_used: row.try_get("dynamic_allocations_used")?,
                is_claimable: row.try_get("is_claimable")?,
            })
        })
        .transpose()
    }
}

async fn increment_reward(
    tx: &mut Transaction<'_, Sqlite>,
    column: RewardColumn,
    user: &Address,
    lock_id: &str,
    amount: &Amount,
) -> Result<(), sqlx::Error> {
    let select = format!(
        "SELECT {} FROM locker_positions WHERE user_address = ? AND lock_id = ?",
        column.name()
    );
    let row = sqlx::query(&select)
        .bind(user.as_str())
        .bind(lock_id)
        .fetch_optional(&mut **tx)
        .await?;

    let Some(row) = row else {
        debug!(%user, lock_id, column = column.name(), "Reward claim for unknown lock");
        return Ok(());
    };

    let total = &amount_col(&row, column.name())? + amount;
    let update = format!(
        "UPDATE locker_positions SET {} = ?, updated_at = ? WHERE user_address = ? AND lock_id = ?",
        column.name()
    );
    sqlx::query(&update)
        .bind(total.to_canonical_string())
        .bind(now_ms())
        .bind(user.as_str())
        .bind(lock_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{meta, setup_repo};
    use super::*;
    use crate::emission::EmissionConfig;

    fn locked(tx: &str) -> TokensLockedEvent {
        TokensLockedEvent {
            meta: meta(tx, "0", 1_000),
            user: Address::new("0xuser"),
            lock_id: "7".to_string(),
            amount: Amount::from(1_000_000u64),
            lock_period: 604_800,
            lock_end: 1_700_604_800,
        }
    }

    fn victory_claim(tx: &str, amount: u64) -> VictoryRewardsClaimedEvent {
        VictoryRewardsClaimedEvent {
            meta: meta(tx, "0", 2_000),
            user: Address::new("0xuser"),
            lock_id: "7".to_string(),
            amount: Amount::from(amount),
            timestamp: None,
            total_claimed_for_lock: None,
        }
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let (repo, _dir) = setup_repo().await;
        let user = Address::new("0xuser");

        assert!(repo
            .apply_tokens_locked(&locked("l1"), LockPeriod::Week, TimeMs::from_secs(1_700_604_800))
            .await
            .unwrap());
        let position = repo.get_locker_position(&user, "7").await.unwrap().unwrap();
        assert_eq!(position.lock_period, LockPeriod::Week);
        assert_eq!(position.lock_end, TimeMs::new(1_700_604_800_000));
        assert_eq!(position.status, PositionStatus::Active);

        let unlock = TokensUnlockedEvent {
            meta: meta("u1", "0", 5_000),
            user: user.clone(),
            lock_id: "7".to_string(),
            amount: Amount::from(1_000_000u64),
            victory_rewards: Amount::zero(),
            sui_rewards: Amount::zero(),
            timestamp: None,
        };
        assert!(repo.apply_tokens_unlocked(&unlock).await.unwrap());
        assert!(!repo.apply_tokens_unlocked(&unlock).await.unwrap());

        let position = repo.get_locker_position(&user, "7").await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.closed_at, Some(TimeMs::new(5_000)));
    }

    #[tokio::test]
    async fn test_victory_rewards_accumulate_idempotently() {
        let (repo, _dir) = setup_repo().await;
        let user = Address::new("0xuser");
        repo.apply_tokens_locked(&locked("l1"), LockPeriod::Week, TimeMs::new(0))
            .await
            .unwrap();

        let first = victory_claim("c1", 100);
        assert!(repo.apply_victory_claimed(&first).await.unwrap());
        assert!(!repo.apply_victory_claimed(&first).await.unwrap());
        assert!(repo.apply_victory_claimed(&victory_claim("c2", 50)).await.unwrap());

        let position = repo.get_locker_position(&user, "7").await.unwrap().unwrap();
        assert_eq!(position.victory_rewards_claimed.to_canonical_string(), "150");
        assert!(position.sui_rewards_claimed.is_zero());
    }

    #[tokio::test]
    async fn test_epoch_merge_keeps_boundaries_and_fields() {
        let (repo, _dir) = setup_repo().await;
        let emission = EmissionConfig::with_start(1_700_000_000);
        let window = emission.week_boundaries(4).unwrap();

        let created = EpochCreatedEvent {
            meta: meta("e1", "0", 1_000),
            epoch_id: "7".to_string(),
            week_number: 4,
            timestamp: None,
        };
        assert!(repo.upsert_epoch_created(&created, window).await.unwrap());
        assert!(!repo.upsert_epoch_created(&created, window).await.unwrap());

        let mut revenue = WeeklyRevenueAddedEvent {
            meta: meta("r1", "0", 2_000),
            epoch_id: "7".to_string(),
            week_number: 4,
            amount: Some(Amount::from(900u64)),
            total_week_revenue: Some(Amount::from(900u64)),
            pool_sui: BucketValues {
                week: Some(Amount::from(900u64)),
                three_month: None,
                year: None,
                three_year: None,
            },
            pool_total_staked: BucketValues::default(),
            allocation_bps: BucketValues {
                week: Some(1000),
                three_month: None,
                year: None,
                three_year: None,
            },
            dynamic_allocations_used: Some(false),
            timestamp: None,
        };
        assert!(repo.merge_weekly_revenue(&revenue, window).await.unwrap());
        assert!(!repo.merge_weekly_revenue(&revenue, window).await.unwrap());

        revenue.meta = meta("r2", "0", 3_000);
        revenue.total_week_revenue = None;
        revenue.pool_sui.week = None;
        revenue.pool_sui.year = Some(Amount::from(40u64));
        repo.merge_weekly_revenue(&revenue, window).await.unwrap();

        let epoch = repo.get_epoch("7").await.unwrap().unwrap();
        assert_eq!(epoch.week_start, TimeMs::new(1_701_814_400_000));
        assert_eq!(epoch.week_end, TimeMs::new(1_702_419_200_000));
        assert_eq!(epoch.total_revenue.unwrap().to_canonical_string(), "900");
        assert_eq!(epoch.pool_sui.week.unwrap().to_canonical_string(), "900");
        assert_eq!(epoch.pool_sui.year.unwrap().to_canonical_string(), "40");
        assert_eq!(epoch.allocation_bps.week, Some(1000));
        assert_eq!(epoch.dynamic_allocations_used, Some(false));
        assert!(!epoch.is_claimable);
    }
}
