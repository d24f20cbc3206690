//! Emission schedule: week numbering anchored at the protocol's emission start.
//!
//! The start timestamp lives in the emission controller object on chain. It is
//! fetched once per process and then frozen.

use crate::transport::{SuiRpcClient, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

pub const SECONDS_PER_WEEK: i64 = 604_800;

#[derive(Debug, Error)]
pub enum EmissionError {
    #[error("Emission config not initialized")]
    NotInitialized,
    #[error("Failed to fetch emission controller: {0}")]
    Fetch(#[from] TransportError),
    #[error("Emission controller object has no {0}")]
    MissingField(String),
    #[error("Invalid emission start timestamp: {0}")]
    InvalidStart(String),
    #[error("Week {0} is out of range")]
    WeekOutOfRange(u64),
}

/// Source of the emission start timestamp (seconds).
#[async_trait]
pub trait EmissionSource: Send + Sync {
    async fn fetch_start_timestamp(&self) -> Result<i64, EmissionError>;
}

/// Half-open window `[start, end)` of one emission week.
///
/// Only built by `week_boundaries`, which guarantees both bounds are
/// representable in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub week: u64,
    pub start_secs: i64,
    pub end_secs: i64,
    start_ms: i64,
    end_ms: i64,
}

impl WeekWindow {
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmissionSchedule {
    start_secs: i64,
}

impl EmissionSchedule {
    fn week_at(&self, now_secs: i64) -> i64 {
        (now_secs - self.start_secs).div_euclid(SECONDS_PER_WEEK) + 1
    }

    fn window(&self, week: u64) -> Result<WeekWindow, EmissionError> {
        let out_of_range = || EmissionError::WeekOutOfRange(week);
        let n = i64::try_from(week).map_err(|_| out_of_range())?;
        let start = (n - 1)
            .checked_mul(SECONDS_PER_WEEK)
            .and_then(|offset| self.start_secs.checked_add(offset))
            .ok_or_else(out_of_range)?;
        let end = start
            .checked_add(SECONDS_PER_WEEK)
            .ok_or_else(out_of_range)?;
        Ok(WeekWindow {
            week,
            start_secs: start,
            end_secs: end,
            start_ms: start.checked_mul(1000).ok_or_else(out_of_range)?,
            end_ms: end.checked_mul(1000).ok_or_else(out_of_range)?,
        })
    }
}

/// Process-wide emission configuration, shared by `Arc`.
#[derive(Debug, Default)]
pub struct EmissionConfig {
    schedule: OnceCell<EmissionSchedule>,
}

impl EmissionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already-initialized config with a known start.
    pub fn with_start(start_secs: i64) -> Self {
        Self {
            schedule: OnceCell::new_with(Some(EmissionSchedule { start_secs })),
        }
    }

    /// Fetch the start timestamp once. Concurrent callers share one fetch; later
    /// calls return the cached value.
    ///
    /// # Errors
    /// Returns the source's error if the fetch fails. The config stays
    /// uninitialized and the next call tries again.
    pub async fn initialize(&self, source: &dyn EmissionSource) -> Result<i64, EmissionError> {
        let schedule = self
            .schedule
            .get_or_try_init(|| async {
                let start_secs = source.fetch_start_timestamp().await?;
                let started = chrono::DateTime::from_timestamp(start_secs, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "out of range".to_string());
                info!(start_secs, started = %started, "Emission config initialized");
                Ok::<_, EmissionError>(EmissionSchedule { start_secs })
            })
            .await?;
        Ok(schedule.start_secs)
    }

    fn schedule(&self) -> Result<&EmissionSchedule, EmissionError> {
        self.schedule.get().ok_or(EmissionError::NotInitialized)
    }

    pub fn start_timestamp(&self) -> Result<i64, EmissionError> {
        Ok(self.schedule()?.start_secs)
    }

    pub fn current_week(&self) -> Result<i64, EmissionError> {
        self.current_week_at(chrono::Utc::now().timestamp())
    }

    pub fn current_week_at(&self, now_secs: i64) -> Result<i64, EmissionError> {
        Ok(self.schedule()?.week_at(now_secs))
    }

    pub fn week_boundaries(&self, week: u64) -> Result<WeekWindow, EmissionError> {
        self.schedule()?.window(week)
    }
}

/// Reads `emission_start_timestamp` from the emission controller object.
pub struct SuiEmissionSource {
    rpc: SuiRpcClient,
    object_id: String,
}

impl SuiEmissionSource {
    pub fn new(rpc: SuiRpcClient, object_id: String) -> Self {
        Self { rpc, object_id }
    }
}

#[async_trait]
impl EmissionSource for SuiEmissionSource {
    async fn fetch_start_timestamp(&self) -> Result<i64, EmissionError> {
        let result = self
            .rpc
            .call(
                "sui_getObject",
                serde_json::json!([self.object_id, { "showContent": true }]),
            )
            .await?;
        extract_start_timestamp(&result)
    }
}

fn extract_start_timestamp(object: &Value) -> Result<i64, EmissionError> {
    if let Some(err) = object.get("error") {
        return Err(EmissionError::MissingField(format!("object data ({})", err)));
    }

    let raw = object
        .pointer("/data/content/fields/emission_start_timestamp")
        .ok_or_else(|| EmissionError::MissingField("emission_start_timestamp".to_string()))?;

    match raw {
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| EmissionError::InvalidStart(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| EmissionError::InvalidStart(n.to_string())),
        other => Err(EmissionError::InvalidStart(other.to_string())),
    }
}
