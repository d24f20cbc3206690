//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization, pragmas and the embedded schema
//! - The `Repository` gateway, split by contract domain

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, probe};
pub use repo::{
    DeadLetter, DeadLetterRow, FarmPoolRow, FarmPoolUpsert, FarmPositionRow, LockerEpochRow,
    LockerPositionRow, LpPositionRow, PairRow, Repository, STORE_RETRY_ATTEMPTS,
};
