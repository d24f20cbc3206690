//! Startup and shutdown of the ingestion pipeline.

use crate::checkpoint::CheckpointStore;
use crate::db::{probe, Repository};
use crate::emission::{EmissionConfig, EmissionSource};
use crate::error::StartupError;
use crate::processor::EventProcessor;
use crate::subscriber::{DeliverySettings, StreamSubscriber};
use crate::transport::{EventFilter, EventTransport};
use std::sync::Arc;
use tracing::info;

/// A running indexer: subscriptions open, one worker per filter.
pub struct Indexer {
    repo: Arc<Repository>,
    emission: Arc<EmissionConfig>,
    checkpoints: Arc<CheckpointStore>,
    subscriber: StreamSubscriber,
}

impl Indexer {
    /// Bring the pipeline up in dependency order.
    ///
    /// The emission start must be known and every subscription must open
    /// before any envelope is processed.
    ///
    /// # Errors
    /// Returns a `StartupError` naming the first step that failed.
    pub async fn start(
        repo: Arc<Repository>,
        emission_source: &dyn EmissionSource,
        transport: Arc<dyn EventTransport>,
        filters: Vec<EventFilter>,
        delivery: DeliverySettings,
    ) -> Result<Self, StartupError> {
        probe(repo.pool()).await?;

        let emission = Arc::new(EmissionConfig::new());
        let start_secs = emission.initialize(emission_source).await?;
        info!(
            start_secs,
            current_week = emission.current_week()?,
            "Emission schedule ready"
        );

        let checkpoints = Arc::new(CheckpointStore::new(repo.clone()));
        checkpoints.load().await?;
        info!(
            safe_resume = %checkpoints.safe_resume_cursor(),
            "Checkpoints loaded"
        );

        let processor = EventProcessor::new(repo.clone(), emission.clone());
        let mut subscriber = StreamSubscriber::new(
            transport,
            processor,
            checkpoints.clone(),
            filters,
            delivery,
        );
        subscriber.start().await?;

        Ok(Self {
            repo,
            emission,
            checkpoints,
            subscriber,
        })
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn emission(&self) -> &Arc<EmissionConfig> {
        &self.emission
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Log every domain's checkpoint.
    pub fn log_heartbeat(&self) {
        for entry in self.checkpoints.snapshot() {
            info!(
                domain = %entry.domain,
                cursor = %entry.cursor,
                last_tx = entry.last_tx_id.as_deref().unwrap_or("-"),
                "Checkpoint"
            );
        }
    }

    /// Wait until every worker has exited on its own.
    pub async fn drain(&mut self) {
        self.subscriber.join().await;
    }

    /// Stop the workers, wait for in-flight envelopes, then close the pool.
    pub async fn shutdown(mut self) {
        info!("Shutting down indexer");
        self.subscriber.stop();
        self.subscriber.join().await;
        self.log_heartbeat();
        self.repo.close().await;
        info!("Indexer stopped");
    }
}
