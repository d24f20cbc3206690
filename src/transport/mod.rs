//! Event transport abstraction: filtered, resumable streams of raw envelopes.

use crate::checkpoint::Cursor;
use crate::domain::{Domain, EventId, EventKind, RawEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod rpc;
pub mod sui;

pub use mock::MockTransport;
pub use rpc::SuiRpcClient;
pub use sui::SuiEventTransport;

/// One Move event type to follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub package_id: String,
    pub kind: EventKind,
    /// Generic arguments, without the surrounding angle brackets.
    pub type_params: Option<String>,
}

impl EventFilter {
    pub fn new(package_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            package_id: package_id.into(),
            kind,
            type_params: None,
        }
    }

    pub fn with_type_params(mut self, params: impl Into<String>) -> Self {
        self.type_params = Some(params.into());
        self
    }

    pub fn domain(&self) -> Domain {
        self.kind.domain()
    }

    /// Fully-qualified type string, e.g. `0xabc::pair::Swap`.
    pub fn move_event_type(&self) -> String {
        let base = format!(
            "{}::{}::{}",
            self.package_id,
            self.kind.module(),
            self.kind.name()
        );
        match &self.type_params {
            Some(params) => format!("{}<{}>", base, params),
            None => base,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain(), self.kind)
    }
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// An envelope plus the cursor at which it sits.
    Event { envelope: RawEvent, cursor: Cursor },
    /// No envelope before `cursor` is still pending on this filter.
    CaughtUp(Cursor),
}

pub type EventStream = BoxStream<'static, Result<StreamItem, TransportError>>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Opens filtered event subscriptions.
///
/// Implementations deliver envelopes of one filter in order and never deliver
/// an envelope whose cursor is below `from`. When `after` names an envelope of
/// this filter, delivery starts with the envelope following it.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn subscribe(
        &self,
        filter: &EventFilter,
        from: Cursor,
        after: Option<EventId>,
    ) -> Result<EventStream, TransportError>;
}
