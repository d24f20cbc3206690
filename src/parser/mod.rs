//! Pure translation of raw envelopes into `DexEvent` records.
//!
//! Parsers perform no I/O. The only failure mode is a structurally malformed
//! payload, reported as a `ParseError`.

mod farm;
mod fields;
mod locker;
mod pair;

pub use fields::Payload;

use crate::domain::{Address, DexEvent, EventKind, EventMeta, EventType, RawEvent, TimeMs};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Malformed event type: {0}")]
    MalformedType(String),
    #[error("Payload is not a JSON object")]
    NotAnObject,
    #[error("Missing {0} field")]
    MissingField(String),
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Classify an envelope by its event type string.
///
/// Returns `Ok(None)` for well-formed types whose name is not a known kind.
pub fn classify(raw: &RawEvent) -> Result<Option<EventKind>, ParseError> {
    EventType::parse(&raw.event_type)
        .map(|ty| ty.kind())
        .ok_or_else(|| ParseError::MalformedType(raw.event_type.clone()))
}

/// Parse an envelope of a known kind into its typed record.
pub fn parse(raw: &RawEvent, kind: EventKind) -> Result<DexEvent, ParseError> {
    let payload = Payload::new(&raw.parsed_json)?;
    let meta = parse_meta(raw)?;

    match kind {
        EventKind::Swap => pair::swap(meta, raw, payload).map(DexEvent::Swap),
        EventKind::LPMint => pair::liquidity(meta, raw, payload).map(DexEvent::LPMint),
        EventKind::LPBurn => pair::liquidity(meta, raw, payload).map(DexEvent::LPBurn),
        EventKind::Sync => pair::sync(meta, raw, payload).map(DexEvent::Sync),
        EventKind::PairCreated => pair::pair_created(meta, payload).map(DexEvent::PairCreated),
        EventKind::Staked => farm::activity(meta, payload).map(DexEvent::Staked),
        EventKind::Unstaked => farm::activity(meta, payload).map(DexEvent::Unstaked),
        EventKind::RewardClaimed => farm::activity(meta, payload).map(DexEvent::RewardClaimed),
        EventKind::PoolCreated => farm::pool_created(meta, payload).map(DexEvent::PoolCreated),
        EventKind::TokensLocked => locker::tokens_locked(meta, payload).map(DexEvent::TokensLocked),
        EventKind::TokensUnlocked => {
            locker::tokens_unlocked(meta, payload).map(DexEvent::TokensUnlocked)
        }
        EventKind::VictoryRewardsClaimed => {
            locker::victory_claimed(meta, payload).map(DexEvent::VictoryRewardsClaimed)
        }
        EventKind::PoolSUIClaimed => locker::sui_claimed(meta, payload).map(DexEvent::PoolSUIClaimed),
        EventKind::EpochCreated => locker::epoch_created(meta, payload).map(DexEvent::EpochCreated),
        EventKind::WeeklyRevenueAdded => {
            locker::weekly_revenue(meta, payload).map(DexEvent::WeeklyRevenueAdded)
        }
    }
}

fn parse_meta(raw: &RawEvent) -> Result<EventMeta, ParseError> {
    let ts = raw
        .timestamp_ms
        .as_deref()
        .ok_or_else(|| ParseError::MissingField("timestampMs".to_string()))?;
    let ms = ts.parse::<i64>().map_err(|e| ParseError::InvalidField {
        field: "timestampMs".to_string(),
        reason: format!("{}: {}", ts, e),
    })?;

    Ok(EventMeta {
        id: raw.id.clone(),
        package_id: raw.package_id.clone(),
        sender: Address::new(raw.sender.clone()),
        event_time: TimeMs::new(ms),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::envelope;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_known_and_unknown() {
        let known = envelope("0xpkg::farm::Staked", json!({}));
        assert_eq!(classify(&known).unwrap(), Some(EventKind::Staked));

        let unknown = envelope("0xpkg::farm::EmergencyWithdraw", json!({}));
        assert_eq!(classify(&unknown).unwrap(), None);
    }

    #[test]
    fn test_classify_malformed_type() {
        let raw = envelope("garbage", json!({}));
        assert!(matches!(classify(&raw), Err(ParseError::MalformedType(_))));
    }

    #[test]
    fn test_meta_requires_timestamp() {
        let mut raw = envelope("0xpkg::pair::Sync", json!({ "reserve0": "1", "reserve1": "2" }));
        raw.timestamp_ms = None;
        match parse(&raw, EventKind::Sync) {
            Err(ParseError::MissingField(f)) => assert_eq!(f, "timestampMs"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_meta_carries_envelope_fields() {
        let raw = envelope("0xpkg::pair::Sync", json!({ "reserve0": "1", "reserve1": "2" }));
        let event = parse(&raw, EventKind::Sync).unwrap();
        let meta = event.meta();
        assert_eq!(meta.id.tx_digest, "tx1");
        assert_eq!(meta.package_id, "0xpkg");
        assert_eq!(meta.event_time, TimeMs::new(1_700_000_000_000));
        assert_eq!(event.kind(), EventKind::Sync);
    }
}
