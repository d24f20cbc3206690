//! Normalized, strongly-typed event records.

use super::{Address, Amount, BucketValues, EventId, EventKind, TimeMs};
use serde::{Deserialize, Serialize};

/// Envelope metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: EventId,
    pub package_id: String,
    pub sender: Address,
    pub event_time: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub meta: EventMeta,
    pub pair_address: Address,
    pub sender: Address,
    pub amount0_in: Amount,
    pub amount1_in: Amount,
    pub amount0_out: Amount,
    pub amount1_out: Amount,
}

/// Shared shape of `LPMint` and `LPBurn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityEvent {
    pub meta: EventMeta,
    pub lp_coin_id: String,
    pub pair_address: Address,
    pub sender: Address,
    pub token0: String,
    pub token1: String,
    pub amount0: Amount,
    pub amount1: Amount,
    pub liquidity: Amount,
    pub total_supply: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub meta: EventMeta,
    pub pair_address: Address,
    pub reserve0: Amount,
    pub reserve1: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCreatedEvent {
    pub meta: EventMeta,
    pub pair_address: Address,
    pub token0: String,
    pub token1: String,
    pub pair_len: Option<u64>,
}

/// Shared shape of `Staked`, `Unstaked` and `RewardClaimed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmEvent {
    pub meta: EventMeta,
    pub staker: Address,
    pub pool_type: String,
    pub amount: Amount,
    pub timestamp: Option<u64>,
}

/// Raw `PoolCreated` payload. Fees are percentage x 100 as emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCreatedEvent {
    pub meta: EventMeta,
    pub pool_type: String,
    pub allocation_points: Amount,
    pub deposit_fee: u64,
    pub withdrawal_fee: u64,
    pub is_native_pair: bool,
    pub is_lp_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensLockedEvent {
    pub meta: EventMeta,
    pub user: Address,
    pub lock_id: String,
    pub amount: Amount,
    /// Lock duration in seconds.
    pub lock_period: u64,
    /// Unlock time in seconds.
    pub lock_end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensUnlockedEvent {
    pub meta: EventMeta,
    pub user: Address,
    pub lock_id: String,
    pub amount: Amount,
    pub victory_rewards: Amount,
    pub sui_rewards: Amount,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictoryRewardsClaimedEvent {
    pub meta: EventMeta,
    pub user: Address,
    pub lock_id: String,
    pub amount: Amount,
    pub timestamp: Option<u64>,
    pub total_claimed_for_lock: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSuiClaimedEvent {
    pub meta: EventMeta,
    pub user: Address,
    pub epoch_id: String,
    pub lock_id: String,
    pub lock_period: u64,
    pub pool_type: u8,
    pub amount_staked: Amount,
    pub sui_claimed: Amount,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCreatedEvent {
    pub meta: EventMeta,
    pub epoch_id: String,
    pub week_number: u64,
    pub timestamp: Option<u64>,
}

/// Revenue snapshot for an epoch. Absent fields leave stored values untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRevenueAddedEvent {
    pub meta: EventMeta,
    pub epoch_id: String,
    pub week_number: u64,
    pub amount: Option<Amount>,
    pub total_week_revenue: Option<Amount>,
    pub pool_sui: BucketValues<Option<Amount>>,
    pub pool_total_staked: BucketValues<Option<Amount>>,
    pub allocation_bps: BucketValues<Option<u64>>,
    pub dynamic_allocations_used: Option<bool>,
    pub timestamp: Option<u64>,
}

/// Closed set of parsed events, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DexEvent {
    Swap(SwapEvent),
    LPMint(LiquidityEvent),
    LPBurn(LiquidityEvent),
    Sync(SyncEvent),
    PairCreated(PairCreatedEvent),
    Staked(FarmEvent),
    Unstaked(FarmEvent),
    RewardClaimed(FarmEvent),
    PoolCreated(PoolCreatedEvent),
    TokensLocked(TokensLockedEvent),
    TokensUnlocked(TokensUnlockedEvent),
    VictoryRewardsClaimed(VictoryRewardsClaimedEvent),
    PoolSUIClaimed(PoolSuiClaimedEvent),
    EpochCreated(EpochCreatedEvent),
    WeeklyRevenueAdded(WeeklyRevenueAddedEvent),
}

impl DexEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DexEvent::Swap(_) => EventKind::Swap,
            DexEvent::LPMint(_) => EventKind::LPMint,
            DexEvent::LPBurn(_) => EventKind::LPBurn,
            DexEvent::Sync(_) => EventKind::Sync,
            DexEvent::PairCreated(_) => EventKind::PairCreated,
            DexEvent::Staked(_) => EventKind::Staked,
            DexEvent::Unstaked(_) => EventKind::Unstaked,
            DexEvent::RewardClaimed(_) => EventKind::RewardClaimed,
            DexEvent::PoolCreated(_) => EventKind::PoolCreated,
            DexEvent::TokensLocked(_) => EventKind::TokensLocked,
            DexEvent::TokensUnlocked(_) => EventKind::TokensUnlocked,
            DexEvent::VictoryRewardsClaimed(_) => EventKind::VictoryRewardsClaimed,
            DexEvent::PoolSUIClaimed(_) => EventKind::PoolSUIClaimed,
            DexEvent::EpochCreated(_) => EventKind::EpochCreated,
            DexEvent::WeeklyRevenueAdded(_) => EventKind::WeeklyRevenueAdded,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            DexEvent::Swap(e) => &e.meta,
            DexEvent::LPMint(e) | DexEvent::LPBurn(e) => &e.meta,
            DexEvent::Sync(e) => &e.meta,
            DexEvent::PairCreated(e) => &e.meta,
            DexEvent::Staked(e) | DexEvent::Unstaked(e) | DexEvent::RewardClaimed(e) => &e.meta,
            DexEvent::PoolCreated(e) => &e.meta,
            DexEvent::TokensLocked(e) => &e.meta,
            DexEvent::TokensUnlocked(e) => &e.meta,
            DexEvent::VictoryRewardsClaimed(e) => &e.meta,
            DexEvent::PoolSUIClaimed(e) => &e.meta,
            DexEvent::EpochCreated(e) => &e.meta,
            DexEvent::WeeklyRevenueAdded(e) => &e.meta,
        }
    }
}
