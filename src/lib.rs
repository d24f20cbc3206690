pub mod checkpoint;
pub mod config;
pub mod db;
pub mod domain;
pub mod emission;
pub mod error;
pub mod indexer;
pub mod parser;
pub mod processor;
pub mod retry;
pub mod subscriber;
pub mod transport;

pub use checkpoint::{CheckpointStore, Cursor};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, Amount, DexEvent, Domain, EventKind, LockPeriod, RawEvent, TimeMs};
pub use emission::{EmissionConfig, EmissionSource, SuiEmissionSource};
pub use error::StartupError;
pub use indexer::Indexer;
pub use processor::{EventProcessor, ProcessError, ProcessOutcome};
pub use subscriber::{build_filters, DeliverySettings, StreamSubscriber};
pub use transport::{EventTransport, MockTransport, SuiEventTransport};
