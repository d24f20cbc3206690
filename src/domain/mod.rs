//! Domain types for the DEX event indexer.
//!
//! This module provides:
//! - Lossless amount handling via the BigUint-backed `Amount`
//! - Domain primitives: TimeMs, Address, Domain, PositionStatus
//! - The raw transport envelope and event-type classification
//! - Normalized event records gathered in the closed `DexEvent` union

pub mod amount;
pub mod envelope;
pub mod event_kind;
pub mod events;
pub mod lock_period;
pub mod primitives;

pub use amount::{Amount, AmountParseError};
pub use envelope::{EventId, RawEvent};
pub use event_kind::{EventKind, EventType};
pub use events::{
    DexEvent, EpochCreatedEvent, EventMeta, FarmEvent, LiquidityEvent, PairCreatedEvent,
    PoolCreatedEvent, PoolSuiClaimedEvent, SwapEvent, SyncEvent, TokensLockedEvent,
    TokensUnlockedEvent, VictoryRewardsClaimedEvent, WeeklyRevenueAddedEvent,
};
pub use lock_period::{BucketValues, LockPeriod};
pub use primitives::{Address, Domain, PositionStatus, TimeMs};
