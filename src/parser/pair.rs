use super::{ParseError, Payload};
use crate::domain::{
    Address, EventMeta, LiquidityEvent, PairCreatedEvent, RawEvent, SwapEvent, SyncEvent,
};

/// Pair events carry no pair id of their own unless the payload names one;
/// otherwise the emitting package id stands in for it.
fn pair_address(raw: &RawEvent, payload: Payload<'_>) -> Result<Address, ParseError> {
    Ok(Address::new(
        payload
            .opt_str("pair")?
            .unwrap_or_else(|| raw.package_id.clone()),
    ))
}

pub(super) fn swap(
    meta: EventMeta,
    raw: &RawEvent,
    payload: Payload<'_>,
) -> Result<SwapEvent, ParseError> {
    Ok(SwapEvent {
        pair_address: pair_address(raw, payload)?,
        sender: Address::new(payload.str("sender")?),
        amount0_in: payload.amount("amount0_in")?,
        amount1_in: payload.amount("amount1_in")?,
        amount0_out: payload.amount("amount0_out")?,
        amount1_out: payload.amount("amount1_out")?,
        meta,
    })
}

pub(super) fn liquidity(
    meta: EventMeta,
    raw: &RawEvent,
    payload: Payload<'_>,
) -> Result<LiquidityEvent, ParseError> {
    Ok(LiquidityEvent {
        lp_coin_id: payload.str("lp_coin_id")?,
        pair_address: pair_address(raw, payload)?,
        sender: Address::new(payload.str("sender")?),
        token0: payload.type_name("token0_type")?,
        token1: payload.type_name("token1_type")?,
        amount0: payload.amount("amount0")?,
        amount1: payload.amount("amount1")?,
        liquidity: payload.amount("liquidity")?,
        total_supply: payload.amount("total_supply")?,
        meta,
    })
}

pub(super) fn sync(
    meta: EventMeta,
    raw: &RawEvent,
    payload: Payload<'_>,
) -> Result<SyncEvent, ParseError> {
    Ok(SyncEvent {
        pair_address: pair_address(raw, payload)?,
        reserve0: payload.amount("reserve0")?,
        reserve1: payload.amount("reserve1")?,
        meta,
    })
}

pub(super) fn pair_created(
    meta: EventMeta,
    payload: Payload<'_>,
) -> Result<PairCreatedEvent, ParseError> {
    Ok(PairCreatedEvent {
        pair_address: Address::new(payload.str("pair")?),
        token0: payload.type_name("token0")?,
        token1: payload.type_name("token1")?,
        pair_len: payload.opt_u64("pair_len")?,
        meta,
    })
}
