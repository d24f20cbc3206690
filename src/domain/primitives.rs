//! Domain primitives: TimeMs, Address, Domain, PositionStatus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Create a TimeMs from whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        TimeMs(secs.saturating_mul(1000))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-chain address or object id (hex string, kept opaque).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create an Address from a string.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract grouping with its own independent checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Pair,
    Farm,
    Locker,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Pair, Domain::Farm, Domain::Locker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Pair => "pair",
            Domain::Farm => "farm",
            Domain::Locker => "locker",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pair" => Ok(Domain::Pair),
            "farm" => Ok(Domain::Farm),
            "locker" => Ok(Domain::Locker),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// Lifecycle status shared by LP, farm and locker positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PositionStatus::Active),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}
