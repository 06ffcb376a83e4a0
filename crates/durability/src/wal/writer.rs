//! WAL writer with durability mode support.
//!
//! The writer appends one record per commit to the active segment, rotating
//! to a new segment when the size limit would be exceeded. A failed append
//! truncates the segment back to where the record started, so an error never
//! leaves a record behind, partial or whole.

use super::reader::WalReader;
use super::DurabilityMode;
use crate::format::{sync_dir, WalRecord, WalSegment, SEGMENT_HEADER_SIZE};
use crate::wal::config::WalConfig;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Cumulative WAL operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalCounters {
    /// Total WAL record appends
    pub wal_appends: u64,
    /// Total sync/fsync calls
    pub sync_calls: u64,
    /// Total bytes written to WAL segments
    pub bytes_written: u64,
    /// Segments deleted by checkpoints
    pub segments_removed: u64,
}

/// WAL writer with configurable durability modes.
///
/// # Durability Modes
///
/// - `Always`: fsync after every record
/// - `Standard`: fsync when `batch_size` writes or `interval_ms` have
///   accumulated, or when [`WalWriter::sync_if_overdue`] /
///   [`WalWriter::flush`] is called
pub struct WalWriter {
    segment: WalSegment,
    durability: DurabilityMode,
    wal_dir: PathBuf,
    database_uuid: [u8; 16],
    config: WalConfig,
    writes_since_sync: usize,
    last_sync_time: Instant,
    has_unsynced_data: bool,
    /// Highest sequence appended by this writer (or found at open)
    last_sequence: u64,
    /// Set when a failed append could not be truncated away
    poisoned: bool,
    counters: WalCounters,
}

impl WalWriter {
    /// Create a new WAL writer.
    ///
    /// Opens the latest segment for appending, or creates the first one.
    /// Recovery must have truncated any invalid tail before this is called.
    pub fn new(
        wal_dir: PathBuf,
        database_uuid: [u8; 16],
        durability: DurabilityMode,
        config: WalConfig,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&wal_dir)?;

        let latest = WalReader::list_segments(&wal_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
            .last()
            .copied();

        let segment = match latest {
            Some(num) => match WalSegment::open_append(&wal_dir, num) {
                Ok(segment) => segment,
                Err(e) => {
                    warn!(
                        target: "tessera::wal",
                        segment = num,
                        error = %e,
                        "Cannot append to latest WAL segment, starting a new one"
                    );
                    WalSegment::create(&wal_dir, num + 1, database_uuid)?
                }
            },
            None => WalSegment::create(&wal_dir, 1, database_uuid)?,
        };
        sync_dir(&wal_dir)?;

        Ok(WalWriter {
            segment,
            durability,
            wal_dir,
            database_uuid,
            config,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            has_unsynced_data: false,
            last_sequence: 0,
            poisoned: false,
            counters: WalCounters::default(),
        })
    }

    /// Tell the writer which sequence the log already ends at.
    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = sequence;
    }

    /// Append a record to the WAL.
    ///
    /// In `Always` mode the record is on stable storage when this returns.
    /// On `Err` the record is not in the log: whatever reached the segment
    /// is truncated away. If that truncation fails too, the writer is
    /// poisoned and refuses every later append, since the segment may end
    /// in a record nobody acknowledged.
    pub fn append(&mut self, record: &WalRecord) -> std::io::Result<()> {
        if self.poisoned {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "WAL writer is poisoned by an earlier failed truncation",
            ));
        }
        let bytes = record.to_bytes();

        if !self.segment.is_empty()
            && self.segment.size() + bytes.len() as u64 > self.config.segment_size
        {
            self.rotate_segment()?;
        }

        let start = self.segment.size();
        if let Err(e) = self.write_record(&bytes) {
            warn!(
                target: "tessera::wal",
                sequence = record.sequence,
                error = %e,
                "WAL append failed, truncating partial record"
            );
            if let Err(truncate_err) = self.segment.truncate(start) {
                self.poisoned = true;
                error!(
                    target: "tessera::wal",
                    sequence = record.sequence,
                    error = %truncate_err,
                    "Could not truncate failed WAL record, writer poisoned"
                );
            }
            return Err(e);
        }

        self.counters.wal_appends += 1;
        self.counters.bytes_written += bytes.len() as u64;
        self.last_sequence = record.sequence;
        Ok(())
    }

    /// Write one framed record and sync as the durability mode asks.
    fn write_record(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.segment.write(bytes)?;
        match self.durability {
            DurabilityMode::Always => {
                self.segment.sync()?;
                self.counters.sync_calls += 1;
                self.reset_sync_counters();
            }
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                self.writes_since_sync += 1;
                self.has_unsynced_data = true;
                if self.writes_since_sync >= batch_size
                    || self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms
                {
                    self.flush()?;
                }
            }
        }
        Ok(())
    }

    /// True after a failed append could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn reset_sync_counters(&mut self) {
        self.writes_since_sync = 0;
        self.last_sync_time = Instant::now();
        self.has_unsynced_data = false;
    }

    /// Close the current segment and start the next one.
    fn rotate_segment(&mut self) -> std::io::Result<()> {
        self.segment.seal()?;
        let next = self.segment.segment_number() + 1;
        self.segment = WalSegment::create(&self.wal_dir, next, self.database_uuid)?;
        sync_dir(&self.wal_dir)?;
        self.reset_sync_counters();
        debug!(target: "tessera::wal", segment = next, "Rotated WAL segment");
        Ok(())
    }

    /// Force buffered records to stable storage.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.has_unsynced_data {
            self.segment.sync()?;
            self.counters.sync_calls += 1;
        }
        self.reset_sync_counters();
        Ok(())
    }

    /// Sync if the batching interval has elapsed and there is unsynced data.
    ///
    /// Returns `true` if a sync was performed.
    pub fn sync_if_overdue(&mut self) -> std::io::Result<bool> {
        if !self.has_unsynced_data {
            return Ok(false);
        }

        if let Some(interval) = self.durability.sync_interval() {
            if self.last_sync_time.elapsed() >= interval {
                self.flush()?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Drop segments whose every record is at or below `durable_sequence`.
    ///
    /// Callers pass the sequence up to which all trees are flushed. The
    /// active segment is rotated first when it is entirely covered. Returns
    /// the number of segments removed.
    pub fn checkpoint(&mut self, durable_sequence: u64) -> std::io::Result<usize> {
        self.flush()?;

        if !self.segment.is_empty() && self.last_sequence <= durable_sequence {
            self.rotate_segment()?;
        }

        let reader = WalReader::with_database_uuid(self.database_uuid);
        let active = self.segment.segment_number();
        let segments = WalReader::list_segments(&self.wal_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        let mut removed = 0;
        for number in segments.into_iter().filter(|n| *n < active) {
            let max = reader
                .max_sequence_in_segment(&self.wal_dir, number)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            if max.map_or(true, |m| m <= durable_sequence) {
                std::fs::remove_file(WalSegment::segment_path(&self.wal_dir, number))?;
                removed += 1;
            } else {
                // Segments are ordered: later ones hold later sequences
                break;
            }
        }

        if removed > 0 {
            sync_dir(&self.wal_dir)?;
            self.counters.segments_removed += removed as u64;
            info!(
                target: "tessera::wal",
                durable_sequence,
                removed,
                "Checkpoint removed WAL segments"
            );
        }
        Ok(removed)
    }

    /// Current segment number.
    pub fn current_segment(&self) -> u64 {
        self.segment.segment_number()
    }

    /// Current segment size in bytes.
    pub fn current_segment_size(&self) -> u64 {
        self.segment.size()
    }

    /// Highest sequence appended.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// WAL directory.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Durability mode in use.
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    /// Cumulative counters.
    pub fn counters(&self) -> WalCounters {
        self.counters.clone()
    }

    /// Size of an empty segment.
    pub fn empty_segment_size() -> u64 {
        SEGMENT_HEADER_SIZE as u64
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if self.has_unsynced_data {
            if let Err(e) = self.segment.sync() {
                warn!(target: "tessera::wal", error = %e, "Failed to sync WAL on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tessera_core::{key, Mutation, TreeId};

    const UUID: [u8; 16] = [5; 16];

    fn record(seq: u64) -> WalRecord {
        let mutations = vec![Mutation::unset(TreeId(1), key![seq as i64, "padding-padding"])];
        WalRecord::from_mutations(seq, &mutations).unwrap()
    }

    fn writer(dir: &Path, mode: DurabilityMode, config: WalConfig) -> WalWriter {
        WalWriter::new(dir.to_path_buf(), UUID, mode, config).unwrap()
    }

    #[test]
    fn test_append_always_syncs() {
        let dir = tempdir().unwrap();
        let mut w = writer(dir.path(), DurabilityMode::Always, WalConfig::for_testing());
        w.append(&record(1)).unwrap();
        w.append(&record(2)).unwrap();
        let counters = w.counters();
        assert_eq!(counters.wal_appends, 2);
        assert_eq!(counters.sync_calls, 2);
        assert_eq!(w.last_sequence(), 2);
    }

    #[test]
    fn test_standard_mode_batches_syncs() {
        let dir = tempdir().unwrap();
        let mode = DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 3,
        };
        let mut w = writer(dir.path(), mode, WalConfig::for_testing());
        w.append(&record(1)).unwrap();
        w.append(&record(2)).unwrap();
        assert_eq!(w.counters().sync_calls, 0);
        w.append(&record(3)).unwrap();
        assert_eq!(w.counters().sync_calls, 1);
        assert!(!w.sync_if_overdue().unwrap());
    }

    #[test]
    fn test_rotation_at_segment_size() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_segment_size(1024);
        let mut w = writer(dir.path(), DurabilityMode::Always, config);
        for seq in 1..=40 {
            w.append(&record(seq)).unwrap();
        }
        assert!(w.current_segment() > 1);

        let result = WalReader::new().read_all(dir.path()).unwrap();
        assert_eq!(result.entries.len(), 40);
    }

    #[test]
    fn test_reopen_appends_to_latest_segment() {
        let dir = tempdir().unwrap();
        {
            let mut w = writer(dir.path(), DurabilityMode::Always, WalConfig::for_testing());
            w.append(&record(1)).unwrap();
        }
        let mut w = writer(dir.path(), DurabilityMode::Always, WalConfig::for_testing());
        assert_eq!(w.current_segment(), 1);
        w.append(&record(2)).unwrap();

        let result = WalReader::new().read_all(dir.path()).unwrap();
        assert_eq!(result.last_sequence(), 2);
    }

    #[test]
    fn test_checkpoint_removes_covered_segments() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_segment_size(1024);
        let mut w = writer(dir.path(), DurabilityMode::Always, config);
        for seq in 1..=40 {
            w.append(&record(seq)).unwrap();
        }

        let removed = w.checkpoint(40).unwrap();
        assert!(removed > 0);
        let result = WalReader::new().read_all(dir.path()).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(w.current_segment_size(), WalWriter::empty_segment_size());

        w.append(&record(41)).unwrap();
        let result = WalReader::new().read_all(dir.path()).unwrap();
        assert_eq!(result.last_sequence(), 41);
    }

    #[test]
    fn test_checkpoint_keeps_uncovered_records() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_segment_size(1024);
        let mut w = writer(dir.path(), DurabilityMode::Always, config);
        for seq in 1..=40 {
            w.append(&record(seq)).unwrap();
        }
        w.checkpoint(20).unwrap();

        let result = WalReader::new().read_all(dir.path()).unwrap();
        let first = result.entries.first().unwrap().sequence;
        assert!(first <= 21);
        assert_eq!(result.last_sequence(), 40);
    }

    #[test]
    fn test_failed_append_leaves_no_record() {
        let dir = tempdir().unwrap();
        let mut w = writer(dir.path(), DurabilityMode::Always, WalConfig::for_testing());
        w.append(&record(1)).unwrap();

        // A sealed segment refuses both the write and the truncation
        w.segment.seal().unwrap();
        assert!(w.append(&record(2)).is_err());
        assert!(w.is_poisoned());
        assert_eq!(w.last_sequence(), 1);
        assert_eq!(w.counters().wal_appends, 1);

        // Poisoned: later appends fail even before touching the segment
        let err = w.append(&record(2)).unwrap_err();
        assert!(err.to_string().contains("poisoned"));

        let result = WalReader::new().read_all(dir.path()).unwrap();
        assert_eq!(result.last_sequence(), 1);
    }
}
