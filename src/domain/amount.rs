//! Arbitrary-precision unsigned amount backed by num-bigint.
//!
//! Protocol amounts are Move `u64`/`u256` values delivered as decimal strings.
//! They are stored and summed losslessly; floating point is never involved.

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount: {0:?}")]
pub struct AmountParseError(pub String);

/// Lossless unsigned integer amount.
///
/// Serializes to a JSON string so values wider than 64 bits survive.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    /// Parse an amount from its decimal representation.
    ///
    /// Only ASCII digits are accepted; signs, whitespace and exponents are rejected.
    pub fn from_str_canonical(s: &str) -> Result<Self, AmountParseError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.to_string()));
        }
        BigUint::parse_bytes(s.as_bytes(), 10)
            .map(Amount)
            .ok_or_else(|| AmountParseError(s.to_string()))
    }

    /// Canonical decimal string (no leading zeros).
    pub fn to_canonical_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn zero() -> Self {
        Amount(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(BigUint::from(value))
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl<'a> std::ops::Add<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn add(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str_canonical(&s).map_err(serde::de::Error::custom)
    }
}
