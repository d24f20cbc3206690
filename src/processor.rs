//! Dispatch of parsed events to their storage handlers.
//!
//! Every handler is one repository call, and every repository call is one
//! transaction. Redelivering an envelope therefore changes nothing.

use crate::db::{FarmPoolUpsert, Repository};
use crate::domain::{DexEvent, Domain, LockPeriod, RawEvent, TimeMs};
use crate::emission::{EmissionConfig, EmissionError};
use crate::parser::{self, ParseError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Derived state was written.
    Applied,
    /// The event row already existed; nothing changed.
    Duplicate,
    /// Unknown event kind.
    Skipped,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Emission(#[from] EmissionError),
}

impl ProcessError {
    /// Whether redelivering the same envelope could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::Db(_))
    }
}

/// Fee fields arrive as percentage x 100; storage keeps whole basis points.
pub fn fee_bps(raw: u64) -> u64 {
    raw / 100
}

#[derive(Clone)]
pub struct EventProcessor {
    repo: Arc<Repository>,
    emission: Arc<EmissionConfig>,
}

impl EventProcessor {
    pub fn new(repo: Arc<Repository>, emission: Arc<EmissionConfig>) -> Self {
        Self { repo, emission }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Classify, parse and apply one envelope.
    ///
    /// # Errors
    /// Returns a `ProcessError` when the payload is malformed, the emission
    /// start is unknown, or storage fails after its own retries.
    pub async fn process(
        &self,
        raw: &RawEvent,
        domain: Domain,
    ) -> Result<ProcessOutcome, ProcessError> {
        let Some(kind) = parser::classify(raw)? else {
            warn!(
                %domain,
                event_type = %raw.event_type,
                tx = %raw.id,
                "Unknown event kind, skipping"
            );
            return Ok(ProcessOutcome::Skipped);
        };

        if kind.domain() != domain {
            debug!(%domain, %kind, "Event kind belongs to another domain");
        }

        let event = parser::parse(raw, kind)?;
        let outcome = self.dispatch(&event).await?;
        debug!(%domain, %kind, tx = %raw.id, ?outcome, "Processed event");
        Ok(outcome)
    }

    async fn dispatch(&self, event: &DexEvent) -> Result<ProcessOutcome, ProcessError> {
        let repo = &self.repo;
        let fresh = match event {
            DexEvent::Swap(e) => repo.with_retry("apply_swap", || repo.apply_swap(e)).await?,
            DexEvent::LPMint(e) => {
                repo.with_retry("apply_lp_mint", || repo.apply_lp_mint(e))
                    .await?
            }
            DexEvent::LPBurn(e) => {
                repo.with_retry("apply_lp_burn", || repo.apply_lp_burn(e))
                    .await?
            }
            DexEvent::Sync(e) => repo.with_retry("apply_sync", || repo.apply_sync(e)).await?,
            DexEvent::PairCreated(e) => {
                repo.with_retry("upsert_pair_created", || repo.upsert_pair_created(e))
                    .await?
            }
            DexEvent::Staked(e) => {
                repo.with_retry("apply_farm_staked", || repo.apply_farm_staked(e))
                    .await?
            }
            DexEvent::Unstaked(e) => {
                repo.with_retry("apply_farm_unstaked", || repo.apply_farm_unstaked(e))
                    .await?
            }
            DexEvent::RewardClaimed(e) => {
                repo.with_retry("apply_farm_reward_claimed", || {
                    repo.apply_farm_reward_claimed(e)
                })
                .await?
            }
            DexEvent::PoolCreated(e) => {
                let pool = FarmPoolUpsert {
                    pool_type: e.pool_type.clone(),
                    allocation_points: e.allocation_points.clone(),
                    deposit_fee_bps: fee_bps(e.deposit_fee),
                    withdrawal_fee_bps: fee_bps(e.withdrawal_fee),
                    is_native_pair: e.is_native_pair,
                    is_lp_token: e.is_lp_token,
                };
                repo.with_retry("upsert_farm_pool", || repo.upsert_farm_pool(&e.meta, &pool))
                    .await?
            }
            DexEvent::TokensLocked(e) => {
                let bucket = LockPeriod::from_duration_secs(e.lock_period);
                let lock_end = TimeMs::from_secs(i64::try_from(e.lock_end).unwrap_or(i64::MAX));
                repo.with_retry("apply_tokens_locked", || {
                    repo.apply_tokens_locked(e, bucket, lock_end)
                })
                .await?
            }
            DexEvent::TokensUnlocked(e) => {
                repo.with_retry("apply_tokens_unlocked", || repo.apply_tokens_unlocked(e))
                    .await?
            }
            DexEvent::VictoryRewardsClaimed(e) => {
                repo.with_retry("apply_victory_claimed", || repo.apply_victory_claimed(e))
                    .await?
            }
            DexEvent::PoolSUIClaimed(e) => {
                repo.with_retry("apply_sui_claimed", || repo.apply_sui_claimed(e))
                    .await?
            }
            DexEvent::EpochCreated(e) => {
                let window = self.emission.week_boundaries(e.week_number)?;
                repo.with_retry("upsert_epoch_created", || {
                    repo.upsert_epoch_created(e, window)
                })
                .await?
            }
            DexEvent::WeeklyRevenueAdded(e) => {
                let window = self.emission.week_boundaries(e.week_number)?;
                repo.with_retry("merge_weekly_revenue", || {
                    repo.merge_weekly_revenue(e, window)
                })
                .await?
            }
        };

        Ok(if fresh {
            ProcessOutcome::Applied
        } else {
            ProcessOutcome::Duplicate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_repo;
    use crate::domain::{Address, EventId};
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (EventProcessor, TempDir) {
        let (repo, dir) = setup_repo().await;
        let emission = EmissionConfig::with_start(1_700_000_000);
        (
            EventProcessor::new(Arc::new(repo), Arc::new(emission)),
            dir,
        )
    }

    fn raw(tx: &str, event_type: &str, payload: serde_json::Value) -> RawEvent {
        RawEvent {
            id: EventId::new(tx, "0"),
            package_id: "0xpkg".to_string(),
            transaction_module: "router".to_string(),
            sender: "0xsender".to_string(),
            event_type: event_type.to_string(),
            parsed_json: payload,
            timestamp_ms: Some("1700000000000".to_string()),
            bcs: None,
        }
    }

    #[test]
    fn test_fee_truncates() {
        assert_eq!(fee_bps(250), 2);
        assert_eq!(fee_bps(99), 0);
        assert_eq!(fee_bps(1000), 10);
    }

    #[tokio::test]
    async fn test_pool_created_stores_bps() {
        let (processor, _dir) = setup().await;
        let envelope = raw(
            "p1",
            "0xfarm::farm::PoolCreated",
            json!({
                "pool_type": "0x2::sui::SUI",
                "allocation_points": "1000",
                "deposit_fee": "250",
                "withdrawal_fee": "100",
                "is_native_pair": true,
                "is_lp_token": false
            }),
        );

        let outcome = processor.process(&envelope, Domain::Farm).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied);
        assert_eq!(
            processor.process(&envelope, Domain::Farm).await.unwrap(),
            ProcessOutcome::Duplicate
        );

        let pool = processor
            .repo()
            .get_farm_pool("0x2::sui::SUI")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.deposit_fee_bps, 2);
        assert_eq!(pool.withdrawal_fee_bps, 1);
        assert!(pool.is_native_pair);
        assert!(!pool.is_lp_token);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_skipped() {
        let (processor, _dir) = setup().await;
        let envelope = raw("u1", "0xpkg::pair::FeesCollected", json!({}));
        let outcome = processor.process(&envelope, Domain::Pair).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retryable() {
        let (processor, _dir) = setup().await;
        let envelope = raw(
            "m1",
            "0xpkg::pair::Sync<0x2::sui::SUI, 0xc::c::C>",
            json!({ "reserve0": "not-a-number", "reserve1": "1" }),
        );
        let err = processor.process(&envelope, Domain::Pair).await.unwrap_err();
        assert!(matches!(err, ProcessError::Parse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_redelivery_is_duplicate() {
        let (processor, _dir) = setup().await;
        let envelope = raw(
            "l1",
            "0xlock::victory_token_locker::TokensLocked",
            json!({
                "user": "0xuser",
                "lock_id": "1",
                "amount": "5000",
                "lock_period": "7776000",
                "lock_end": "1707776000"
            }),
        );

        assert_eq!(
            processor.process(&envelope, Domain::Locker).await.unwrap(),
            ProcessOutcome::Applied
        );
        assert_eq!(
            processor.process(&envelope, Domain::Locker).await.unwrap(),
            ProcessOutcome::Duplicate
        );

        let position = processor
            .repo()
            .get_locker_position(&Address::new("0xuser"), "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.lock_period, LockPeriod::ThreeMonth);
        assert_eq!(position.lock_end, TimeMs::new(1_707_776_000_000));
    }

    #[tokio::test]
    async fn test_epoch_without_emission_start_fails() {
        let (repo, _dir) = setup_repo().await;
        let processor = EventProcessor::new(Arc::new(repo), Arc::new(EmissionConfig::new()));
        let envelope = raw(
            "e1",
            "0xlock::victory_token_locker::EpochCreated",
            json!({ "epoch_id": "1", "week_number": "1" }),
        );
        let err = processor.process(&envelope, Domain::Locker).await.unwrap_err();
        assert!(matches!(err, ProcessError::Emission(EmissionError::NotInitialized)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upsert_only_kinds_report_duplicates() {
        let (processor, _dir) = setup().await;
        let envelopes = [
            raw(
                "pc",
                "0xpair::factory::PairCreated",
                json!({ "pair": "0xpool", "token0": "0x2::sui::SUI", "token1": "0xc::c::C" }),
            ),
            raw(
                "ec",
                "0xlock::victory_token_locker::EpochCreated",
                json!({ "epoch_id": "3", "week_number": "3" }),
            ),
            raw(
                "wr",
                "0xlock::victory_token_locker::WeeklyRevenueAdded",
                json!({ "epoch_id": "3", "week_number": "3", "total_week_revenue": "10" }),
            ),
        ];

        for envelope in &envelopes {
            let domain = parser::classify(envelope).unwrap().unwrap().domain();
            assert_eq!(
                processor.process(envelope, domain).await.unwrap(),
                ProcessOutcome::Applied
            );
            assert_eq!(
                processor.process(envelope, domain).await.unwrap(),
                ProcessOutcome::Duplicate,
                "{}",
                envelope.event_type
            );
        }
    }

    #[tokio::test]
    async fn test_epoch_week_beyond_range_is_permanent_error() {
        let (processor, _dir) = setup().await;
        let envelope = raw(
            "e2",
            "0xlock::victory_token_locker::EpochCreated",
            json!({ "epoch_id": "9", "week_number": "20000000000" }),
        );

        let err = processor.process(&envelope, Domain::Locker).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Emission(EmissionError::WeekOutOfRange(20_000_000_000))
        ));
        assert!(!err.is_retryable());
        assert!(processor.repo().get_epoch("9").await.unwrap().is_none());
    }
}
