//! On-disk formats
//!
//! - `segment`: WAL segment header and file handle
//! - `wal_record`: record framing inside a segment
//! - `writeset`: mutation list encoding inside a WAL record
//! - `marker`: the `CURRENT` schema version marker and atomic file replacement

pub mod marker;
pub mod segment;
pub mod wal_record;
pub mod writeset;

pub use marker::{sync_dir, write_atomic, MarkerError, VersionMarker, MARKER_MAGIC};
pub use segment::{
    SegmentHeader, WalSegment, SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
pub use wal_record::{now_micros, WalRecord, WalRecordError, WAL_RECORD_FORMAT_VERSION};
