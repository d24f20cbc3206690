//! Raw event envelope as delivered by the Sui event transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dedupe key of an event: transaction digest plus sequence within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventId {
    pub tx_digest: String,
    pub event_seq: String,
}

impl EventId {
    pub fn new(tx_digest: impl Into<String>, event_seq: impl Into<String>) -> Self {
        Self {
            tx_digest: tx_digest.into(),
            event_seq: event_seq.into(),
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_digest, self.event_seq)
    }
}

/// A Move event as returned by `suix_queryEvents`.
///
/// `bcs` is carried opaquely and never decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: EventId,
    pub package_id: String,
    pub transaction_module: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub parsed_json: serde_json::Value,
    #[serde(default)]
    pub timestamp_ms: Option<String>,
    #[serde(default)]
    pub bcs: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_sui_event_json() {
        let json = serde_json::json!({
            "id": { "txDigest": "9xYz", "eventSeq": "2" },
            "packageId": "0xabc",
            "transactionModule": "router",
            "sender": "0xuser",
            "type": "0xabc::pair::Swap<0x2::sui::SUI, 0xdef::usdc::USDC>",
            "parsedJson": { "sender": "0xuser" },
            "bcsEncoding": "base64",
            "bcs": "AAEC",
            "timestampMs": "1700000000000"
        });

        let event: RawEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.id, EventId::new("9xYz", "2"));
        assert_eq!(event.transaction_module, "router");
        assert_eq!(event.timestamp_ms.as_deref(), Some("1700000000000"));
        assert_eq!(event.bcs.as_deref(), Some("AAEC"));
    }

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId::new("abc", "0").to_string(), "abc:0");
    }
}
