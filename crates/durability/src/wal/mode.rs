//! When the WAL is fsynced
//!
//! | Mode       | fsync                         | Lost on crash            |
//! |------------|-------------------------------|--------------------------|
//! | `always`   | inside every commit           | nothing                  |
//! | `standard` | every `batch_size` commits or | the unsynced tail, up to |
//! |            | `interval_ms`, whichever first| one batch or interval    |
//!
//! `standard` weakens what a successful commit means: the mutator returns
//! before its record is on stable storage, so an acknowledged commit can
//! still be lost to a crash. Only `always` makes every acknowledged commit
//! durable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurabilityMode {
    /// A mutator returns once its record is on stable storage
    #[default]
    Always,
    /// Group commits into periodic fsyncs; commits are acknowledged
    /// before they are durable
    Standard { interval_ms: u64, batch_size: usize },
}

impl DurabilityMode {
    /// `standard` with a 100 ms interval and batches of 1000 commits
    pub const STANDARD: DurabilityMode = DurabilityMode::Standard {
        interval_ms: 100,
        batch_size: 1000,
    };

    /// Parse the name used in `tessera.toml`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "always" => Some(DurabilityMode::Always),
            "standard" => Some(DurabilityMode::STANDARD),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "always",
            DurabilityMode::Standard { .. } => "standard",
        }
    }

    /// True when every append is fsynced before it returns
    pub fn syncs_every_commit(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Longest time a record may stay unsynced, `None` in `Always` mode
    pub fn sync_interval(&self) -> Option<Duration> {
        match *self {
            DurabilityMode::Always => None,
            DurabilityMode::Standard { interval_ms, .. } => Some(Duration::from_millis(interval_ms)),
        }
    }

    /// One-line summary for logs
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "fsync on every commit",
            DurabilityMode::Standard { .. } => {
                "periodic fsync, acknowledged commits in the last interval can be lost"
            }
        }
    }
}
