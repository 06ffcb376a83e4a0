//! WAL reader for recovery and replay.
//!
//! Replay yields the valid prefix of the log: reading stops at the first
//! frame whose length runs past the end of the data, whose checksum fails or
//! whose payload cannot be decoded. Everything after that point is reported
//! in [`TruncateInfo`] so recovery can cut it off before new appends.

use crate::format::{WalRecord, WalRecordError, WalSegment, SEGMENT_HEADER_SIZE};
use std::path::Path;
use tessera_core::Mutation;
use tracing::warn;

/// One replayed commit
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEntry {
    /// Commit sequence number
    pub sequence: u64,
    /// Commit timestamp (microseconds since epoch)
    pub timestamp: u64,
    /// Mutations in commit order
    pub mutations: Vec<Mutation>,
}

/// Records read from one segment
#[derive(Debug)]
pub struct SegmentRead {
    /// Valid records in order
    pub entries: Vec<ReplayEntry>,
    /// Position where valid records end
    pub valid_end: u64,
    /// Why reading stopped
    pub stop_reason: ReadStopReason,
}

/// WAL reader for iterating over records in segments.
#[derive(Debug, Clone, Default)]
pub struct WalReader {
    database_uuid: Option<[u8; 16]>,
}

impl WalReader {
    /// Create a reader that accepts segments of any database.
    pub fn new() -> Self {
        WalReader {
            database_uuid: None,
        }
    }

    /// Create a reader that rejects segments written by another database.
    pub fn with_database_uuid(database_uuid: [u8; 16]) -> Self {
        WalReader {
            database_uuid: Some(database_uuid),
        }
    }

    /// Read all valid records from a single segment.
    pub fn read_segment(
        &self,
        wal_dir: &Path,
        segment_number: u64,
        after_sequence: u64,
    ) -> Result<SegmentRead, WalReaderError> {
        let mut segment = WalSegment::open_read(wal_dir, segment_number)?;

        if let Some(expected) = self.database_uuid {
            if segment.database_uuid() != expected {
                return Err(WalReaderError::ForeignSegment(segment_number));
            }
        }

        let buffer = segment.read_body()?;
        let header_size = SEGMENT_HEADER_SIZE as u64;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut last_sequence = after_sequence;
        let mut stop_reason = ReadStopReason::EndOfData;

        while offset < buffer.len() {
            let (record, consumed) = match WalRecord::from_bytes(&buffer[offset..]) {
                Ok(parsed) => parsed,
                Err(WalRecordError::InsufficientData) => {
                    stop_reason = ReadStopReason::PartialRecord { offset };
                    break;
                }
                Err(WalRecordError::ChecksumMismatch { .. }) => {
                    stop_reason = ReadStopReason::ChecksumMismatch { offset };
                    break;
                }
                Err(e) => {
                    stop_reason = ReadStopReason::ParseError {
                        offset,
                        detail: e.to_string(),
                    };
                    break;
                }
            };

            if record.sequence <= last_sequence {
                stop_reason = ReadStopReason::ParseError {
                    offset,
                    detail: format!(
                        "sequence {} does not follow {}",
                        record.sequence, last_sequence
                    ),
                };
                break;
            }

            let mutations = match record.mutations() {
                Ok(m) => m,
                Err(e) => {
                    stop_reason = ReadStopReason::ParseError {
                        offset,
                        detail: e.to_string(),
                    };
                    break;
                }
            };

            last_sequence = record.sequence;
            entries.push(ReplayEntry {
                sequence: record.sequence,
                timestamp: record.timestamp,
                mutations,
            });
            offset += consumed;
        }

        Ok(SegmentRead {
            entries,
            valid_end: header_size + offset as u64,
            stop_reason,
        })
    }

    /// Read the valid prefix of the whole log.
    ///
    /// Segments are read in order. A segment whose header is unreadable is
    /// only tolerated as the last one (a crash while creating it); anywhere
    /// else it is an error.
    pub fn read_all(&self, wal_dir: &Path) -> Result<WalReadResult, WalReaderError> {
        let segments = Self::list_segments(wal_dir)?;

        let mut entries = Vec::new();
        let mut truncate_info = None;
        let mut stop_reason = ReadStopReason::EndOfData;
        let mut last_sequence = 0u64;

        for (idx, &segment_number) in segments.iter().enumerate() {
            let is_last = idx + 1 == segments.len();
            let read = match self.read_segment(wal_dir, segment_number, last_sequence) {
                Ok(read) => read,
                Err(WalReaderError::Io(e))
                    if is_last
                        && matches!(
                            e.kind(),
                            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData
                        ) =>
                {
                    warn!(
                        target: "tessera::wal",
                        segment = segment_number,
                        error = %e,
                        "Discarding WAL segment with unreadable header"
                    );
                    let original_size = std::fs::metadata(WalSegment::segment_path(
                        wal_dir,
                        segment_number,
                    ))?
                    .len();
                    truncate_info = Some(TruncateInfo {
                        segment_number,
                        valid_end: 0,
                        original_size,
                        discarded_segments: Vec::new(),
                    });
                    stop_reason = ReadStopReason::PartialRecord { offset: 0 };
                    break;
                }
                Err(e) => return Err(e),
            };

            if let Some(last) = read.entries.last() {
                last_sequence = last.sequence;
            }
            entries.extend(read.entries);
            stop_reason = read.stop_reason;

            if stop_reason != ReadStopReason::EndOfData {
                let original_size =
                    std::fs::metadata(WalSegment::segment_path(wal_dir, segment_number))?.len();
                warn!(
                    target: "tessera::wal",
                    segment = segment_number,
                    valid_end = read.valid_end,
                    original_size,
                    reason = ?stop_reason,
                    "WAL replay stopped before end of log"
                );
                truncate_info = Some(TruncateInfo {
                    segment_number,
                    valid_end: read.valid_end,
                    original_size,
                    discarded_segments: segments[idx + 1..].to_vec(),
                });
                break;
            }
        }

        Ok(WalReadResult {
            entries,
            truncate_info,
            stop_reason,
        })
    }

    /// Cut the log back to its valid prefix.
    pub fn truncate(wal_dir: &Path, info: &TruncateInfo) -> Result<(), WalReaderError> {
        for segment_number in &info.discarded_segments {
            std::fs::remove_file(WalSegment::segment_path(wal_dir, *segment_number))?;
        }
        let path = WalSegment::segment_path(wal_dir, info.segment_number);
        if info.valid_end == 0 {
            std::fs::remove_file(path)?;
        } else {
            let file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(info.valid_end)?;
            file.sync_all()?;
        }
        crate::format::sync_dir(wal_dir)?;
        Ok(())
    }

    /// List all segment numbers in the WAL directory, ascending.
    pub fn list_segments(wal_dir: &Path) -> Result<Vec<u64>, WalReaderError> {
        let mut segments = Vec::new();

        if !wal_dir.exists() {
            return Ok(segments);
        }

        for entry in std::fs::read_dir(wal_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();

            // Expected format: "wal-NNNNNN.seg"
            if let Some(number) = name
                .strip_prefix("wal-")
                .and_then(|rest| rest.strip_suffix(".seg"))
            {
                if let Ok(num) = number.parse::<u64>() {
                    segments.push(num);
                }
            }
        }

        segments.sort_unstable();
        Ok(segments)
    }

    /// Highest sequence stored in a segment.
    pub fn max_sequence_in_segment(
        &self,
        wal_dir: &Path,
        segment_number: u64,
    ) -> Result<Option<u64>, WalReaderError> {
        let read = self.read_segment(wal_dir, segment_number, 0)?;
        Ok(read.entries.last().map(|e| e.sequence))
    }
}

/// Reason why record reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// Read all records to end of data
    EndOfData,
    /// Frame length runs past end of data (interrupted commit)
    PartialRecord {
        /// Byte offset after the segment header
        offset: usize,
    },
    /// CRC checksum mismatch
    ChecksumMismatch {
        /// Byte offset after the segment header
        offset: usize,
    },
    /// CRC was valid but the payload could not be decoded
    ParseError {
        /// Byte offset after the segment header
        offset: usize,
        /// Human-readable error description
        detail: String,
    },
}

/// Result of reading all WAL segments.
#[derive(Debug)]
pub struct WalReadResult {
    /// All valid commits in order
    pub entries: Vec<ReplayEntry>,

    /// Truncation needed to drop the invalid tail (if any)
    pub truncate_info: Option<TruncateInfo>,

    /// Why reading stopped (for diagnostics)
    pub stop_reason: ReadStopReason,
}

impl WalReadResult {
    /// Sequence of the last valid commit, 0 when the log is empty
    pub fn last_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence).unwrap_or(0)
    }
}

/// Where the valid log ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncateInfo {
    /// Segment holding the first invalid frame
    pub segment_number: u64,

    /// Position where valid data ends (0 removes the segment)
    pub valid_end: u64,

    /// Original file size
    pub original_size: u64,

    /// Later segments, unreachable past the invalid frame
    pub discarded_segments: Vec<u64>,
}

impl TruncateInfo {
    /// Get the number of bytes that need to be truncated.
    pub fn bytes_to_truncate(&self) -> u64 {
        self.original_size.saturating_sub(self.valid_end)
    }
}

/// WAL reader errors.
#[derive(Debug, thiserror::Error)]
pub enum WalReaderError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment header names another database
    #[error("Segment {0} belongs to a different database")]
    ForeignSegment(u64),
}

impl From<WalReaderError> for tessera_core::Error {
    fn from(e: WalReaderError) -> Self {
        match e {
            WalReaderError::Io(io) => tessera_core::Error::Io(io),
            other => tessera_core::Error::Corruption(other.to_string()),
        }
    }
}
