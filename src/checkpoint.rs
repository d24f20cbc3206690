//! Per-domain resume cursors with a write-through cache.
//!
//! Cursors only move forward. The cache is updated after the backing store
//! accepts the write, so a failed save never advances what `get` reports.

use crate::domain::Domain;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

/// Position in an event stream: event timestamp in milliseconds.
///
/// Stored as text so the column stays wide enough for any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor(u64);

impl Cursor {
    pub const GENESIS: Cursor = Cursor(0);

    pub fn new(value: u64) -> Self {
        Cursor(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Cursor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub domain: Domain,
    pub cursor: Cursor,
    pub last_tx_id: Option<String>,
}

impl CheckpointEntry {
    pub fn genesis(domain: Domain) -> Self {
        Self {
            domain,
            cursor: Cursor::GENESIS,
            last_tx_id: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Invalid stored cursor for {domain}: {value}")]
    InvalidCursor { domain: Domain, value: String },
}

/// Backing store for checkpoint rows.
#[async_trait]
pub trait CheckpointPersistence: Send + Sync {
    /// Read whatever checkpoints exist. Missing domains are simply absent.
    async fn load_checkpoints(&self) -> Result<Vec<CheckpointEntry>, CheckpointError>;

    /// Persist one domain's checkpoint.
    async fn persist_checkpoint(&self, entry: &CheckpointEntry) -> Result<(), CheckpointError>;
}

pub struct CheckpointStore {
    persistence: std::sync::Arc<dyn CheckpointPersistence>,
    cache: RwLock<HashMap<Domain, CheckpointEntry>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CheckpointStore {
    pub fn new(persistence: std::sync::Arc<dyn CheckpointPersistence>) -> Self {
        let cache = Domain::ALL
            .iter()
            .map(|d| (*d, CheckpointEntry::genesis(*d)))
            .collect();
        Self {
            persistence,
            cache: RwLock::new(cache),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read all checkpoints from storage into the cache.
    ///
    /// Domains with no stored value start at genesis.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    pub async fn load(&self) -> Result<(), CheckpointError> {
        let stored = self.persistence.load_checkpoints().await?;

        let mut fresh: HashMap<Domain, CheckpointEntry> = Domain::ALL
            .iter()
            .map(|d| (*d, CheckpointEntry::genesis(*d)))
            .collect();
        for entry in stored {
            fresh.insert(entry.domain, entry);
        }

        for entry in fresh.values() {
            info!(
                domain = %entry.domain,
                cursor = %entry.cursor,
                last_tx = entry.last_tx_id.as_deref().unwrap_or("-"),
                "Loaded checkpoint"
            );
        }

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        Ok(())
    }

    /// Cached cursor for a domain.
    pub fn get(&self, domain: Domain) -> Cursor {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&domain)
            .map(|e| e.cursor)
            .unwrap_or(Cursor::GENESIS)
    }

    /// Persist a new cursor for a domain, then update the cache.
    ///
    /// Returns `Ok(false)` without touching storage when `cursor` does not move
    /// the domain forward.
    ///
    /// # Errors
    /// Returns an error if the write fails. The cache keeps its previous value.
    pub async fn save(
        &self,
        domain: Domain,
        cursor: Cursor,
        last_tx_id: Option<String>,
    ) -> Result<bool, CheckpointError> {
        let _guard = self.write_lock.lock().await;

        let current = self.get(domain);
        if cursor <= current {
            debug!(%domain, %cursor, %current, "Ignoring non-advancing checkpoint");
            return Ok(false);
        }

        let entry = CheckpointEntry {
            domain,
            cursor,
            last_tx_id,
        };
        self.persistence.persist_checkpoint(&entry).await?;

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain, entry);
        Ok(true)
    }

    /// The lowest cursor across all domains; resuming every domain from here
    /// misses nothing.
    pub fn safe_resume_cursor(&self) -> Cursor {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Domain::ALL
            .iter()
            .map(|d| cache.get(d).map(|e| e.cursor).unwrap_or(Cursor::GENESIS))
            .min()
            .unwrap_or(Cursor::GENESIS)
    }

    pub fn snapshot(&self) -> Vec<CheckpointEntry> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Domain::ALL
            .iter()
            .map(|d| {
                cache
                    .get(d)
                    .cloned()
                    .unwrap_or_else(|| CheckpointEntry::genesis(*d))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryPersistence {
        rows: Mutex<Vec<CheckpointEntry>>,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl CheckpointPersistence for MemoryPersistence {
        async fn load_checkpoints(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn persist_checkpoint(&self, entry: &CheckpointEntry) -> Result<(), CheckpointError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CheckpointError::Storage(sqlx::Error::PoolTimedOut));
            }
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|r| r.domain != entry.domain);
            rows.push(entry.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_defaults_to_genesis() {
        let store = CheckpointStore::new(Arc::new(MemoryPersistence::default()));
        store.load().await.unwrap();
        for domain in Domain::ALL {
            assert_eq!(store.get(domain), Cursor::GENESIS);
        }
    }

    #[tokio::test]
    async fn test_save_is_monotonic() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = CheckpointStore::new(persistence.clone());

        assert!(store
            .save(Domain::Pair, Cursor::new(200), Some("tx2".to_string()))
            .await
            .unwrap());
        assert!(!store
            .save(Domain::Pair, Cursor::new(100), Some("tx1".to_string()))
            .await
            .unwrap());
        assert_eq!(store.get(Domain::Pair), Cursor::new(200));

        let rows = persistence.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_tx_id.as_deref(), Some("tx2"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cache_unchanged() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = CheckpointStore::new(persistence.clone());
        store.save(Domain::Farm, Cursor::new(10), None).await.unwrap();

        persistence.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.save(Domain::Farm, Cursor::new(20), None).await.is_err());
        assert_eq!(store.get(Domain::Farm), Cursor::new(10));
    }

    #[tokio::test]
    async fn test_safe_resume_cursor_is_minimum() {
        let persistence = Arc::new(MemoryPersistence::default());
        *persistence.rows.lock().unwrap() = vec![
            CheckpointEntry {
                domain: Domain::Pair,
                cursor: Cursor::new(500),
                last_tx_id: None,
            },
            CheckpointEntry {
                domain: Domain::Farm,
                cursor: Cursor::new(300),
                last_tx_id: None,
            },
            CheckpointEntry {
                domain: Domain::Locker,
                cursor: Cursor::new(300),
                last_tx_id: None,
            },
        ];
        let store = CheckpointStore::new(persistence);
        store.load().await.unwrap();

        assert_eq!(store.safe_resume_cursor(), Cursor::new(300));
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn test_cursor_parse_and_order() {
        let a: Cursor = "1700000000000".parse().unwrap();
        assert_eq!(a.to_string(), "1700000000000");
        assert!(Cursor::GENESIS < a);
        assert!("abc".parse::<Cursor>().is_err());
    }
}
