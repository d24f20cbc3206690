use super::{ParseError, Payload};
use crate::domain::{Address, EventMeta, FarmEvent, PoolCreatedEvent};

pub(super) fn activity(meta: EventMeta, payload: Payload<'_>) -> Result<FarmEvent, ParseError> {
    Ok(FarmEvent {
        staker: Address::new(payload.str("staker")?),
        pool_type: payload.type_name("pool_type")?,
        amount: payload.amount("amount")?,
        timestamp: payload.opt_u64("timestamp")?,
        meta,
    })
}

pub(super) fn pool_created(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<PoolCreatedEvent, ParseError> {
    Ok(PoolCreatedEvent {
        pool_type: payload.type_name("pool_type")?,
        allocation_points: payload.amount("allocation_points")?,
        deposit_fee: payload.u64("deposit_fee")?,
        withdrawal_fee: payload.u64("withdrawal_fee")?,
        is_native_pair: payload.bool("is_native_pair")?,
        is_lp_token: payload.bool("is_lp_token")?,
        meta,
    })
}
