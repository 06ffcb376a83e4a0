//! WAL replay into the trees of the open version
//!
//! Recovery algorithm:
//! 1. Read every valid WAL record, stopping at the first bad frame
//! 2. Truncate the invalid tail (torn write or corruption)
//! 3. Skip records every tree already flushed
//! 4. Merge the rest in sequence order and publish each one
//!
//! # Recovery Properties
//!
//! - **Deterministic**: Same inputs -> same state
//! - **Idempotent**: A tree skips records at or below its applied sequence,
//!   so replaying twice (crash during recovery) changes nothing

use std::path::{Path, PathBuf};
use tessera_core::Result;
use tessera_durability::{ReadStopReason, WalReader};
use tessera_storage::TreeSet;
use tracing::{info, warn};

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Valid records found in the WAL
    pub records_read: usize,
    /// Records merged into the trees
    pub records_replayed: usize,
    /// Records already covered by flushed trees
    pub records_skipped: usize,
    /// Mutations merged
    pub mutations_applied: usize,
    /// Bytes cut from the WAL tail
    pub truncated_bytes: u64,
    /// Whole segments dropped behind the invalid frame
    pub discarded_segments: usize,
    /// Highest valid sequence in the WAL, 0 when empty
    pub last_sequence: u64,
}

/// Replays the WAL of one database
#[derive(Debug, Clone)]
pub struct RecoveryCoordinator {
    wal_dir: PathBuf,
    database_uuid: [u8; 16],
}

impl RecoveryCoordinator {
    /// Create a coordinator for the WAL in `wal_dir`
    pub fn new(wal_dir: impl Into<PathBuf>, database_uuid: [u8; 16]) -> Self {
        RecoveryCoordinator {
            wal_dir: wal_dir.into(),
            database_uuid,
        }
    }

    /// WAL directory
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Replay the WAL into `trees`
    ///
    /// Every replayed record is published on the trees' pin registry, so
    /// on return the registry holds the last recovered sequence (or what it
    /// held before, when nothing was replayed).
    pub fn recover(&self, trees: &TreeSet) -> Result<RecoveryStats> {
        if !self.wal_dir.exists() {
            return Ok(RecoveryStats::default());
        }

        let reader = WalReader::with_database_uuid(self.database_uuid);
        let result = reader.read_all(&self.wal_dir)?;
        let mut stats = RecoveryStats {
            records_read: result.entries.len(),
            last_sequence: result.last_sequence(),
            ..RecoveryStats::default()
        };

        if let Some(info) = &result.truncate_info {
            warn!(
                target: "tessera::recovery",
                segment = info.segment_number,
                valid_end = info.valid_end,
                bytes = info.bytes_to_truncate(),
                discarded_segments = info.discarded_segments.len(),
                reason = ?result.stop_reason,
                "Truncating invalid WAL tail"
            );
            WalReader::truncate(&self.wal_dir, info)?;
            stats.truncated_bytes = info.bytes_to_truncate();
            stats.discarded_segments = info.discarded_segments.len();
        } else if result.stop_reason != ReadStopReason::EndOfData {
            warn!(
                target: "tessera::recovery",
                reason = ?result.stop_reason,
                "WAL read stopped early without a truncation point"
            );
        }

        let durable = trees.durable_sequence();
        for entry in &result.entries {
            if entry.sequence <= durable {
                stats.records_skipped += 1;
                continue;
            }
            trees.merge(entry.sequence, &entry.mutations)?;
            trees.pins().publish(entry.sequence);
            stats.records_replayed += 1;
            stats.mutations_applied += entry.mutations.len();
        }

        info!(
            target: "tessera::recovery",
            records_read = stats.records_read,
            replayed = stats.records_replayed,
            skipped = stats.records_skipped,
            mutations = stats.mutations_applied,
            last_sequence = stats.last_sequence,
            durable_sequence = durable,
            "WAL recovery complete"
        );
        Ok(stats)
    }
}
