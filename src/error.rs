use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::emission::EmissionError;
use crate::subscriber::SubscribeError;
use thiserror::Error;

/// Anything that stops the indexer from coming up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Emission config unavailable: {0}")]
    Emission(#[from] EmissionError),
    #[error("Checkpoint load failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}
