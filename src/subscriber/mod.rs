//! Stream subscriber: one worker task per event filter.
//!
//! Each worker pulls envelopes from its subscription, hands them to the
//! processor, and folds its progress into the domain checkpoint. Envelopes that
//! keep failing are parked in `dead_letters` so one bad payload never stalls a
//! filter.

mod filters;
mod progress;

pub use filters::build_filters;
pub use progress::{DomainProgress, WatermarkBoard};

use crate::checkpoint::{CheckpointStore, Cursor};
use crate::db::DeadLetter;
use crate::domain::{Domain, RawEvent};
use crate::processor::{EventProcessor, ProcessError, ProcessOutcome};
use crate::retry::LinearBackoff;
use crate::transport::{EventFilter, EventStream, EventTransport, StreamItem, TransportError};
use backoff::future::retry_notify;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    /// Processing attempts per envelope, including the first.
    pub max_attempts: u32,
    /// Base delay; the n-th retry waits `retry_delay * n`.
    pub retry_delay: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Failed to subscribe to {filter}: {source}")]
    Open {
        filter: String,
        #[source]
        source: TransportError,
    },
    #[error("Failed to load stored position of {filter}: {source}")]
    Position {
        filter: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Subscriber already started")]
    AlreadyStarted,
}

/// Result of handing one envelope to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Processed(ProcessOutcome),
    DeadLettered,
    /// Neither applied nor parked; the filter must not move past it.
    Stuck,
}

struct Worker {
    index: usize,
    /// Key of this filter's row in `filter_positions`.
    event_type: String,
    filter: EventFilter,
    processor: EventProcessor,
    checkpoints: Arc<CheckpointStore>,
    board: Arc<WatermarkBoard>,
    settings: DeliverySettings,
}

#[derive(Debug, Default)]
struct WorkerStats {
    applied: u64,
    duplicates: u64,
    skipped: u64,
    dead_lettered: u64,
    stuck: u64,
}

pub struct StreamSubscriber {
    transport: Arc<dyn EventTransport>,
    processor: EventProcessor,
    checkpoints: Arc<CheckpointStore>,
    filters: Vec<EventFilter>,
    settings: DeliverySettings,
    board: Arc<WatermarkBoard>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl StreamSubscriber {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        processor: EventProcessor,
        checkpoints: Arc<CheckpointStore>,
        filters: Vec<EventFilter>,
        settings: DeliverySettings,
    ) -> Self {
        let domains: Vec<Domain> = filters.iter().map(|f| f.domain()).collect();
        let board = Arc::new(WatermarkBoard::new(&domains, |d| checkpoints.get(d)));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            processor,
            checkpoints,
            filters,
            settings,
            board,
            shutdown_tx,
            handles: Vec::new(),
            started: false,
        }
    }

    pub fn board(&self) -> &Arc<WatermarkBoard> {
        &self.board
    }

    /// Open every subscription, then spawn one worker per filter.
    ///
    /// Nothing is spawned unless all subscriptions open.
    ///
    /// # Errors
    /// Returns `SubscribeError::Open` for the first filter that fails to open.
    pub async fn start(&mut self) -> Result<(), SubscribeError> {
        if self.started {
            return Err(SubscribeError::AlreadyStarted);
        }

        let mut streams: Vec<EventStream> = Vec::with_capacity(self.filters.len());
        let repo = self.processor.repo();
        for filter in &self.filters {
            let event_type = filter.move_event_type();
            let from = self.checkpoints.get(filter.domain());
            let after = repo
                .with_retry("load_filter_position", || {
                    repo.load_filter_position(&event_type)
                })
                .await
                .map_err(|source| SubscribeError::Position {
                    filter: event_type.clone(),
                    source,
                })?;
            let stream = self
                .transport
                .subscribe(filter, from, after.clone())
                .await
                .map_err(|source| SubscribeError::Open {
                    filter: event_type.clone(),
                    source,
                })?;
            let resume = after
                .as_ref()
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            info!(%filter, %from, after = %resume, event_type = %event_type, "Subscribed");
            streams.push(stream);
        }

        for (index, (filter, stream)) in self.filters.iter().zip(streams).enumerate() {
            let worker = Worker {
                index,
                event_type: filter.move_event_type(),
                filter: filter.clone(),
                processor: self.processor.clone(),
                checkpoints: self.checkpoints.clone(),
                board: self.board.clone(),
                settings: self.settings,
            };
            let shutdown = self.shutdown_tx.subscribe();
            self.handles
                .push(tokio::spawn(worker.run(stream, shutdown)));
        }

        self.started = true;
        info!(workers = self.handles.len(), "Stream subscriber started");
        Ok(())
    }

    /// Signal every worker to stop after its in-flight envelope.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for all workers to exit.
    pub async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Subscriber worker panicked");
            }
        }
    }
}

impl Worker {
    async fn run(self, mut stream: EventStream, mut shutdown: watch::Receiver<bool>) {
        let mut stats = WorkerStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let item = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                item = stream.next() => item,
            };

            match item {
                None => {
                    debug!(filter = %self.filter, "Stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!(filter = %self.filter, error = %e, "Transport error");
                }
                Some(Ok(StreamItem::CaughtUp(cursor))) => {
                    self.record(cursor, None).await;
                }
                Some(Ok(StreamItem::Event { envelope, cursor })) => {
                    match self.deliver(&envelope).await {
                        Delivery::Processed(outcome) => {
                            match outcome {
                                ProcessOutcome::Applied => stats.applied += 1,
                                ProcessOutcome::Duplicate => stats.duplicates += 1,
                                ProcessOutcome::Skipped => stats.skipped += 1,
                            }
                            self.record(cursor, Some(envelope.id.tx_digest.clone()))
                                .await;
                            self.save_position(&envelope).await;
                        }
                        Delivery::DeadLettered => {
                            stats.dead_lettered += 1;
                            self.record(cursor, Some(envelope.id.tx_digest.clone()))
                                .await;
                            self.save_position(&envelope).await;
                        }
                        Delivery::Stuck => {
                            stats.stuck += 1;
                            self.board.pin(self.index, cursor);
                            error!(
                                filter = %self.filter,
                                %cursor,
                                tx = %envelope.id,
                                "Envelope neither applied nor parked; holding filter checkpoint"
                            );
                        }
                    }
                }
            }
        }

        info!(
            filter = %self.filter,
            applied = stats.applied,
            duplicates = stats.duplicates,
            skipped = stats.skipped,
            dead_lettered = stats.dead_lettered,
            stuck = stats.stuck,
            "Worker stopped"
        );
    }

    async fn deliver(&self, envelope: &RawEvent) -> Delivery {
        let domain = self.filter.domain();
        let processor = &self.processor;
        let mut attempts: u32 = 0;

        let result = retry_notify(
            LinearBackoff::new(self.settings.retry_delay, self.settings.max_attempts),
            || {
                attempts += 1;
                async move {
                    processor
                        .process(envelope, domain)
                        .await
                        .map_err(|e| {
                            if e.is_retryable() {
                                backoff::Error::transient(e)
                            } else {
                                backoff::Error::permanent(e)
                            }
                        })
                }
            },
            |err: ProcessError, delay: Duration| {
                warn!(filter = %self.filter, tx = %envelope.id, error = %err, ?delay, "Delivery failed, retrying");
            },
        )
        .await;

        match result {
            Ok(outcome) => Delivery::Processed(outcome),
            Err(err) => self.park(envelope, &err, attempts).await,
        }
    }

    async fn park(&self, envelope: &RawEvent, err: &ProcessError, attempts: u32) -> Delivery {
        let letter = DeadLetter {
            envelope,
            domain: self.filter.domain(),
            error: err.to_string(),
            attempts,
        };
        warn!(
            filter = %self.filter,
            tx = %envelope.id,
            attempts,
            error = %err,
            "Parking envelope in dead letters"
        );

        let repo = self.processor.repo();
        match repo
            .with_retry("insert_dead_letter", || repo.insert_dead_letter(&letter))
            .await
        {
            Ok(()) => Delivery::DeadLettered,
            Err(e) => {
                error!(filter = %self.filter, tx = %envelope.id, error = %e, "Failed to park envelope");
                Delivery::Stuck
            }
        }
    }

    /// Remember `envelope` as this filter's resume point. A pinned filter keeps
    /// its old one so the stuck envelope is read again after a restart.
    async fn save_position(&self, envelope: &RawEvent) {
        if self.board.is_pinned(self.index) {
            return;
        }
        let repo = self.processor.repo();
        if let Err(e) = repo
            .with_retry("save_filter_position", || {
                repo.save_filter_position(&self.event_type, &envelope.id)
            })
            .await
        {
            warn!(filter = %self.filter, error = %e, "Failed to save filter position");
        }
    }

    async fn record(&self, cursor: Cursor, last_tx_id: Option<String>) {
        let Some(progress) = self.board.advance(self.index, cursor, last_tx_id) else {
            return;
        };
        match self
            .checkpoints
            .save(progress.domain, progress.cursor, progress.last_tx_id)
            .await
        {
            Ok(true) => debug!(domain = %progress.domain, cursor = %progress.cursor, "Checkpoint advanced"),
            Ok(false) => {}
            Err(e) => warn!(domain = %progress.domain, error = %e, "Failed to save checkpoint"),
        }
    }
}
