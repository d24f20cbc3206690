//! In-memory transport for tests.

use super::{EventFilter, EventStream, EventTransport, StreamItem, TransportError};
use crate::checkpoint::Cursor;
use crate::domain::{EventId, RawEvent};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Transport that replays scripted items per Move event type.
///
/// Streams end after their last item unless `keep_open` is set, in which case
/// they stay pending until the subscriber stops.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    items: HashMap<String, Vec<StreamItem>>,
    failing: HashSet<String>,
    keep_open: bool,
    subscriptions: Arc<Mutex<Vec<(EventFilter, Cursor)>>>,
    resumed_after: Arc<Mutex<Vec<(EventFilter, EventId)>>>,
}

/// `0xabc::pair::Swap<A, B>` and `0xabc::pair::Swap` share one key.
fn type_key(event_type: &str) -> String {
    event_type
        .split('<')
        .next()
        .unwrap_or(event_type)
        .trim()
        .to_string()
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an envelope on the stream of its own event type.
    pub fn with_event(mut self, envelope: RawEvent, cursor: Cursor) -> Self {
        self.items
            .entry(type_key(&envelope.event_type))
            .or_default()
            .push(StreamItem::Event { envelope, cursor });
        self
    }

    /// Queue a caught-up marker on an event type's stream.
    pub fn with_caught_up(mut self, event_type: &str, cursor: Cursor) -> Self {
        self.items
            .entry(type_key(event_type))
            .or_default()
            .push(StreamItem::CaughtUp(cursor));
        self
    }

    /// Make subscribing to this event type fail.
    pub fn failing_on(mut self, event_type: &str) -> Self {
        self.failing.insert(type_key(event_type));
        self
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    /// Every `(filter, from)` pair subscribed so far.
    pub fn subscriptions(&self) -> Vec<(EventFilter, Cursor)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every `(filter, after)` pair for subscriptions that resumed after a
    /// known envelope.
    pub fn resumed_after(&self) -> Vec<(EventFilter, EventId)> {
        self.resumed_after
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn subscribe(
        &self,
        filter: &EventFilter,
        from: Cursor,
        after: Option<EventId>,
    ) -> Result<EventStream, TransportError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((filter.clone(), from));
        if let Some(id) = &after {
            self.resumed_after
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((filter.clone(), id.clone()));
        }

        let key = type_key(&filter.move_event_type());
        if self.failing.contains(&key) {
            return Err(TransportError::Network(format!(
                "subscription refused for {}",
                key
            )));
        }

        let items: Vec<Result<StreamItem, TransportError>> = self
            .items
            .get(&key)
            .map(|items| {
                let start = after
                    .as_ref()
                    .and_then(|id| {
                        items.iter().position(|item| {
                            matches!(item, StreamItem::Event { envelope, .. } if envelope.id == *id)
                        })
                    })
                    .map_or(0, |i| i + 1);
                items[start..]
                    .iter()
                    .filter(|item| match item {
                        StreamItem::Event { cursor, .. } => *cursor >= from,
                        StreamItem::CaughtUp(_) => true,
                    })
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();

        let stream = futures::stream::iter(items);
        if self.keep_open {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, EventKind};
    use serde_json::json;

    fn envelope(event_type: &str, seq: &str) -> RawEvent {
        RawEvent {
            id: EventId::new("tx", seq),
            package_id: "0xpkg".to_string(),
            transaction_module: "router".to_string(),
            sender: "0xuser".to_string(),
            event_type: event_type.to_string(),
            parsed_json: json!({}),
            timestamp_ms: Some("1000".to_string()),
            bcs: None,
        }
    }

    #[tokio::test]
    async fn test_mock_replays_from_cursor() {
        let mock = MockTransport::new()
            .with_event(envelope("0xpkg::pair::Swap<A, B>", "0"), Cursor::new(100))
            .with_event(envelope("0xpkg::pair::Swap<A, B>", "1"), Cursor::new(200))
            .with_event(envelope("0xpkg::pair::Sync", "2"), Cursor::new(300));

        let filter = EventFilter::new("0xpkg", EventKind::Swap);
        let items: Vec<_> = mock
            .subscribe(&filter, Cursor::new(150), None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        match &items[0] {
            Ok(StreamItem::Event { envelope, cursor }) => {
                assert_eq!(envelope.id.event_seq, "1");
                assert_eq!(*cursor, Cursor::new(200));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mock.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_failing_subscription() {
        let mock = MockTransport::new().failing_on("0xpkg::farm::Staked");
        let filter = EventFilter::new("0xpkg", EventKind::Staked);
        assert!(mock.subscribe(&filter, Cursor::GENESIS, None).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_resumes_after_event_id() {
        let mock = MockTransport::new()
            .with_event(envelope("0xpkg::pair::Swap", "0"), Cursor::new(100))
            .with_event(envelope("0xpkg::pair::Swap", "1"), Cursor::new(100))
            .with_event(envelope("0xpkg::pair::Swap", "2"), Cursor::new(200));

        let filter = EventFilter::new("0xpkg", EventKind::Swap);
        let items: Vec<_> = mock
            .subscribe(&filter, Cursor::new(100), Some(EventId::new("tx", "0")))
            .await
            .unwrap()
            .collect()
            .await;

        let seqs: Vec<_> = items
            .iter()
            .map(|item| match item {
                Ok(StreamItem::Event { envelope, .. }) => envelope.id.event_seq.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(seqs, vec!["1", "2"]);
        assert_eq!(mock.resumed_after(), vec![(filter, EventId::new("tx", "0"))]);
    }
}
