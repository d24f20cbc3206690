use super::{ParseError, Payload};
use crate::domain::{
    Address, BucketValues, EpochCreatedEvent, EventMeta, PoolSuiClaimedEvent, TokensLockedEvent,
    TokensUnlockedEvent, VictoryRewardsClaimedEvent, WeeklyRevenueAddedEvent,
};

pub(super) fn tokens_locked(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<TokensLockedEvent, ParseError> {
    Ok(TokensLockedEvent {
        user: Address::new(payload.str("user")?),
        lock_id: payload.str("lock_id")?,
        amount: payload.amount("amount")?,
        lock_period: payload.u64("lock_period")?,
        lock_end: payload.u64("lock_end")?,
        meta,
    })
}

pub(super) fn tokens_unlocked(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<TokensUnlockedEvent, ParseError> {
    Ok(TokensUnlockedEvent {
        user: Address::new(payload.str("user")?),
        lock_id: payload.str("lock_id")?,
        amount: payload.amount("amount")?,
        victory_rewards: payload.amount("victory_rewards")?,
        sui_rewards: payload.amount("sui_rewards")?,
        timestamp: payload.opt_u64("timestamp")?,
        meta,
    })
}

pub(super) fn victory_claimed(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<VictoryRewardsClaimedEvent, ParseError> {
    Ok(VictoryRewardsClaimedEvent {
        user: Address::new(payload.str("user")?),
        lock_id: payload.str("lock_id")?,
        amount: payload.amount("amount")?,
        timestamp: payload.opt_u64("timestamp")?,
        total_claimed_for_lock: payload.opt_amount("total_claimed_for_lock")?,
        meta,
    })
}

pub(super) fn sui_claimed(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<PoolSuiClaimedEvent, ParseError> {
    let pool_type = payload.u64("pool_type")?;
    let pool_type = u8::try_from(pool_type).map_err(|_| ParseError::InvalidField {
        field: "pool_type".to_string(),
        reason: format!("{} does not fit in u8", pool_type),
    })?;

    Ok(PoolSuiClaimedEvent {
        user: Address::new(payload.str("user")?),
        epoch_id: payload.str("epoch_id")?,
        lock_id: payload.str("lock_id")?,
        lock_period: payload.u64("lock_period")?,
        pool_type,
        amount_staked: payload.amount("amount_staked")?,
        sui_claimed: payload.amount("sui_claimed")?,
        timestamp: payload.opt_u64("timestamp")?,
        meta,
    })
}

pub(super) fn epoch_created(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<EpochCreatedEvent, ParseError> {
    Ok(EpochCreatedEvent {
        epoch_id: payload.str("epoch_id")?,
        week_number: payload.u64("week_number")?,
        timestamp: payload.opt_u64("timestamp")?,
        meta,
    })
}

pub(super) fn weekly_revenue(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<WeeklyRevenueAddedEvent, ParseError> {
    Ok(WeeklyRevenueAddedEvent {
        epoch_id: payload.str("epoch_id")?,
        week_number: payload.u64("week_number")?,
        amount: payload.opt_amount("amount")?,
        total_week_revenue: payload.opt_amount("total_week_revenue")?,
        pool_sui: BucketValues {
            week: payload.opt_amount("week_pool_sui")?,
            three_month: payload.opt_amount("three_month_pool_sui")?,
            year: payload.opt_amount("year_pool_sui")?,
            three_year: payload.opt_amount("three_year_pool_sui")?,
        },
        pool_total_staked: BucketValues {
            week: payload.opt_amount("week_pool_total_staked")?,
            three_month: payload.opt_amount("three_month_pool_total_staked")?,
            year: payload.opt_amount("year_pool_total_staked")?,
            three_year: payload.opt_amount("three_year_pool_total_staked")?,
        },
        allocation_bps: BucketValues {
            week: payload.opt_u64("week_allocation_bp")?,
            three_month: payload.opt_u64("three_month_allocation_bp")?,
            year: payload.opt_u64("year_allocation_bp")?,
            three_year: payload.opt_u64("three_year_allocation_bp")?,
        },
        dynamic_allocations_used: payload.opt_bool("dynamic_allocations_used")?,
        timestamp: payload.opt_u64("timestamp")?,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::envelope;
    use super::super::{parse, ParseError};
    use crate::domain::{DexEvent, EventKind};
    use serde_json::json;

    #[test]
    fn test_parse_tokens_locked() {
        let raw = envelope(
            "0xlock::victory_token_locker::TokensLocked",
            json!({ "user": "0xuser", "lock_id": "7", "amount": "1000000", "lock_period": "604800", "lock_end": "1700604800" }),
        );
        match parse(&raw, EventKind::TokensLocked).unwrap() {
            DexEvent::TokensLocked(e) => {
                assert_eq!(e.lock_id, "7");
                assert_eq!(e.lock_period, 604_800);
                assert_eq!(e.lock_end, 1_700_604_800);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_pool_sui_claimed_numeric_pool_type() {
        let raw = envelope(
            "0xlock::victory_token_locker::PoolSUIClaimed",
            json!({
                "user": "0xuser", "epoch_id": "3", "lock_id": "7", "lock_period": "604800",
                "pool_type": 2, "amount_staked": "100", "sui_claimed": "55", "timestamp": "1700000000"
            }),
        );
        match parse(&raw, EventKind::PoolSUIClaimed).unwrap() {
            DexEvent::PoolSUIClaimed(e) => {
                assert_eq!(e.pool_type, 2);
                assert_eq!(e.sui_claimed.to_canonical_string(), "55");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_pool_sui_claimed_rejects_wide_pool_type() {
        let raw = envelope(
            "0xlock::victory_token_locker::PoolSUIClaimed",
            json!({
                "user": "0xuser", "epoch_id": "3", "lock_id": "7", "lock_period": "604800",
                "pool_type": 300, "amount_staked": "100", "sui_claimed": "55"
            }),
        );
        assert!(matches!(
            parse(&raw, EventKind::PoolSUIClaimed),
            Err(ParseError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_parse_weekly_revenue_partial_fields() {
        let raw = envelope(
            "0xlock::victory_token_locker::WeeklyRevenueAdded",
            json!({ "epoch_id": "7", "week_number": "4", "week_pool_sui": "900" }),
        );
        match parse(&raw, EventKind::WeeklyRevenueAdded).unwrap() {
            DexEvent::WeeklyRevenueAdded(e) => {
                assert_eq!(e.week_number, 4);
                assert_eq!(e.pool_sui.week.unwrap().to_canonical_string(), "900");
                assert_eq!(e.pool_sui.year, None);
                assert_eq!(e.total_week_revenue, None);
                assert_eq!(e.allocation_bps.week, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_epoch_created_requires_week_number() {
        let raw = envelope(
            "0xlock::victory_token_locker::EpochCreated",
            json!({ "epoch_id": "7" }),
        );
        assert_eq!(
            parse(&raw, EventKind::EpochCreated).unwrap_err(),
            ParseError::MissingField("week_number".to_string())
        );
    }
}
