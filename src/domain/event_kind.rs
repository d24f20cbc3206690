//! Event kinds and classification of fully-qualified Move event types.

use super::Domain;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event kind the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Swap,
    LPMint,
    LPBurn,
    Sync,
    PairCreated,
    Staked,
    Unstaked,
    RewardClaimed,
    PoolCreated,
    TokensLocked,
    TokensUnlocked,
    VictoryRewardsClaimed,
    PoolSUIClaimed,
    EpochCreated,
    WeeklyRevenueAdded,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Swap,
        EventKind::LPMint,
        EventKind::LPBurn,
        EventKind::Sync,
        EventKind::PairCreated,
        EventKind::Staked,
        EventKind::Unstaked,
        EventKind::RewardClaimed,
        EventKind::PoolCreated,
        EventKind::TokensLocked,
        EventKind::TokensUnlocked,
        EventKind::VictoryRewardsClaimed,
        EventKind::PoolSUIClaimed,
        EventKind::EpochCreated,
        EventKind::WeeklyRevenueAdded,
    ];

    /// Move struct name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Swap => "Swap",
            EventKind::LPMint => "LPMint",
            EventKind::LPBurn => "LPBurn",
            EventKind::Sync => "Sync",
            EventKind::PairCreated => "PairCreated",
            EventKind::Staked => "Staked",
            EventKind::Unstaked => "Unstaked",
            EventKind::RewardClaimed => "RewardClaimed",
            EventKind::PoolCreated => "PoolCreated",
            EventKind::TokensLocked => "TokensLocked",
            EventKind::TokensUnlocked => "TokensUnlocked",
            EventKind::VictoryRewardsClaimed => "VictoryRewardsClaimed",
            EventKind::PoolSUIClaimed => "PoolSUIClaimed",
            EventKind::EpochCreated => "EpochCreated",
            EventKind::WeeklyRevenueAdded => "WeeklyRevenueAdded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Move module that emits the event.
    pub fn module(&self) -> &'static str {
        match self {
            EventKind::Swap | EventKind::LPMint | EventKind::LPBurn | EventKind::Sync => "pair",
            EventKind::PairCreated => "factory",
            EventKind::Staked
            | EventKind::Unstaked
            | EventKind::RewardClaimed
            | EventKind::PoolCreated => "farm",
            EventKind::TokensLocked
            | EventKind::TokensUnlocked
            | EventKind::VictoryRewardsClaimed
            | EventKind::PoolSUIClaimed
            | EventKind::EpochCreated
            | EventKind::WeeklyRevenueAdded => "victory_token_locker",
        }
    }

    /// Checkpoint domain the event belongs to.
    pub fn domain(&self) -> Domain {
        match self.module() {
            "pair" | "factory" => Domain::Pair,
            "farm" => Domain::Farm,
            _ => Domain::Locker,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Components of `<package>::<module>::<Name>[<type params>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventType<'a> {
    pub package: &'a str,
    pub module: &'a str,
    pub name: &'a str,
}

impl<'a> EventType<'a> {
    /// Split a fully-qualified event type, dropping any generic parameters.
    pub fn parse(full: &'a str) -> Option<Self> {
        let base = full.split('<').next().unwrap_or(full).trim();
        let mut parts = base.split("::");
        let package = parts.next().filter(|s| !s.is_empty())?;
        let module = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            package,
            module,
            name,
        })
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(self.name)
    }
}
