//! Lock-duration buckets used by the token locker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const WEEK_SECS: u64 = 7 * 24 * 60 * 60;
pub const THREE_MONTH_SECS: u64 = 90 * 24 * 60 * 60;
pub const YEAR_SECS: u64 = 365 * 24 * 60 * 60;

/// Classification of a lock by its raw duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPeriod {
    Week,
    ThreeMonth,
    Year,
    ThreeYear,
}

impl LockPeriod {
    /// Bucket a lock duration. Thresholds are inclusive upper bounds.
    pub fn from_duration_secs(secs: u64) -> Self {
        if secs <= WEEK_SECS {
            LockPeriod::Week
        } else if secs <= THREE_MONTH_SECS {
            LockPeriod::ThreeMonth
        } else if secs <= YEAR_SECS {
            LockPeriod::Year
        } else {
            LockPeriod::ThreeYear
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockPeriod::Week => "week",
            LockPeriod::ThreeMonth => "three_month",
            LockPeriod::Year => "year",
            LockPeriod::ThreeYear => "three_year",
        }
    }
}

impl fmt::Display for LockPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(LockPeriod::Week),
            "three_month" => Ok(LockPeriod::ThreeMonth),
            "year" => Ok(LockPeriod::Year),
            "three_year" => Ok(LockPeriod::ThreeYear),
            other => Err(format!("unknown lock period: {}", other)),
        }
    }
}

/// One value per lock bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketValues<T> {
    pub week: T,
    pub three_month: T,
    pub year: T,
    pub three_year: T,
}
