//! Polling transport over `suix_queryEvents`.

use super::{EventFilter, EventStream, EventTransport, StreamItem, SuiRpcClient, TransportError};
use crate::checkpoint::Cursor;
use crate::domain::{EventId, RawEvent, TimeMs};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub page_size: u32,
    pub poll_interval: Duration,
    /// How far behind wall-clock time an idle filter reports itself caught up.
    pub idle_lag_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            poll_interval: Duration::from_secs(1),
            idle_lag_ms: 60_000,
        }
    }
}

/// Follows Move event types by paging `suix_queryEvents` in ascending order.
///
/// The cursor of an envelope is its `timestampMs`. Paging starts right after
/// the `after` event id when one is known; otherwise it starts at the
/// beginning of the event index. Envelopes older than `from` are dropped
/// either way, and envelopes at exactly `from` are delivered again.
#[derive(Debug, Clone)]
pub struct SuiEventTransport {
    rpc: SuiRpcClient,
    settings: PollSettings,
}

impl SuiEventTransport {
    pub fn new(rpc: SuiRpcClient, settings: PollSettings) -> Self {
        Self { rpc, settings }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<Value>,
    #[serde(default)]
    has_next_page: bool,
}

struct PollState {
    rpc: SuiRpcClient,
    settings: PollSettings,
    query: Value,
    label: String,
    page_cursor: Option<Value>,
    from: Cursor,
    high_water: Cursor,
    pending: VecDeque<StreamItem>,
    idle: bool,
}

impl PollState {
    async fn fetch_page(&mut self) -> Result<(), TransportError> {
        let result = self
            .rpc
            .call(
                "suix_queryEvents",
                serde_json::json!([
                    self.query,
                    self.page_cursor,
                    self.settings.page_size,
                    false
                ]),
            )
            .await?;
        let page: EventPage =
            serde_json::from_value(result).map_err(|e| TransportError::Parse(e.to_string()))?;

        let fetched = page.data.len();
        for value in page.data {
            let envelope: RawEvent = match serde_json::from_value(value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(filter = %self.label, error = %e, "Skipping undecodable event");
                    continue;
                }
            };

            let cursor = envelope
                .timestamp_ms
                .as_deref()
                .and_then(|ts| ts.parse::<Cursor>().ok())
                .unwrap_or(self.high_water);
            if cursor < self.from {
                continue;
            }
            self.high_water = self.high_water.max(cursor);
            self.pending.push_back(StreamItem::Event { envelope, cursor });
        }

        if let Some(next) = page.next_cursor.filter(|c| !c.is_null()) {
            self.page_cursor = Some(next);
        }

        self.idle = !page.has_next_page;
        if self.idle {
            let now_ms = u64::try_from(TimeMs::now().as_i64()).unwrap_or(0);
            let quiet_until = Cursor::new(now_ms.saturating_sub(self.settings.idle_lag_ms));
            self.pending
                .push_back(StreamItem::CaughtUp(self.high_water.max(quiet_until)));
        }

        debug!(filter = %self.label, fetched, idle = self.idle, "Polled events");
        Ok(())
    }
}

/// `suix_queryEvents` takes an `EventID` as its exclusive page cursor.
fn page_cursor(id: &EventId) -> Value {
    serde_json::json!({ "txDigest": id.tx_digest, "eventSeq": id.event_seq })
}

#[async_trait]
impl EventTransport for SuiEventTransport {
    async fn subscribe(
        &self,
        filter: &EventFilter,
        from: Cursor,
        after: Option<EventId>,
    ) -> Result<EventStream, TransportError> {
        let mut state = PollState {
            rpc: self.rpc.clone(),
            settings: self.settings.clone(),
            query: serde_json::json!({ "MoveEventType": filter.move_event_type() }),
            label: filter.to_string(),
            page_cursor: after.as_ref().map(page_cursor),
            from,
            high_water: from,
            pending: VecDeque::new(),
            idle: false,
        };

        // The first page doubles as a check that the node accepts the filter.
        state.fetch_page().await?;

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((Ok(item), state));
                }
                if state.idle {
                    tokio::time::sleep(state.settings.poll_interval).await;
                }
                if let Err(e) = state.fetch_page().await {
                    state.idle = true;
                    return Some((Err(e), state));
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_page_decodes() {
        let page: EventPage = serde_json::from_value(json!({
            "data": [{
                "id": { "txDigest": "abc", "eventSeq": "0" },
                "packageId": "0xpkg",
                "transactionModule": "router",
                "sender": "0xuser",
                "type": "0xpkg::pair::Sync",
                "parsedJson": { "reserve0": "1", "reserve1": "2" },
                "timestampMs": "1700000000000"
            }],
            "nextCursor": { "txDigest": "abc", "eventSeq": "0" },
            "hasNextPage": false
        }))
        .unwrap();

        assert_eq!(page.data.len(), 1);
        assert!(!page.has_next_page);
        let envelope: RawEvent = serde_json::from_value(page.data[0].clone()).unwrap();
        assert_eq!(envelope.id.tx_digest, "abc");
    }

    #[test]
    fn test_empty_page_defaults() {
        let page: EventPage = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert!(page.next_cursor.is_none());
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_page_cursor_from_event_id() {
        assert_eq!(
            page_cursor(&EventId::new("abc", "4")),
            json!({ "txDigest": "abc", "eventSeq": "4" })
        );
    }
}
