//! Durability layer for Tessera
//!
//! This crate handles the files that make commits and schema versions
//! durable:
//!
//! - WAL: Segmented write-ahead log with one record per committed mutator
//! - Durability modes: Always (default), Standard
//! - Replay: valid-prefix reading with torn-tail detection and truncation
//! - The `CURRENT` schema version marker and atomic file replacement
//! - Database directory layout

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod format;
pub mod wal;

pub use database::DatabasePaths;
pub use format::{now_micros, sync_dir, write_atomic, MarkerError, VersionMarker, WalRecord};
pub use wal::{
    DurabilityMode, ReadStopReason, ReplayEntry, TruncateInfo, WalConfig, WalConfigError,
    WalReadResult, WalReader, WalReaderError, WalWriter,
};

/// Generate a fresh database identity
pub fn new_database_uuid() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}
