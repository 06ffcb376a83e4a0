//! WAL record framing
//!
//! Every commit is one frame, appended after the segment header:
//!
//! ```text
//! offset  size  field
//!      0     4  body length
//!      4     4  crc32 of the body
//!      8     1  record version
//!      9     8  commit sequence
//!     17     8  commit time, microseconds since the epoch
//!     25     n  writeset (see `writeset`)
//! ```
//!
//! The length comes first so a reader can tell a frame cut short by a crash
//! (`InsufficientData`) from one that is complete but damaged
//! (`ChecksumMismatch`).

use byteorder::{ByteOrder, LittleEndian};
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_core::Mutation;

use super::writeset;

/// Record body layout version
pub const WAL_RECORD_FORMAT_VERSION: u8 = 1;

/// Length and checksum ahead of the body
const FRAME_HEADER_SIZE: usize = 8;

/// Version, sequence and timestamp at the start of the body
const BODY_HEADER_SIZE: usize = 17;

/// One committed mutator as stored in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub sequence: u64,
    /// Microseconds since the Unix epoch
    pub timestamp: u64,
    /// Encoded mutation list
    pub writeset: Vec<u8>,
}

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalRecordError {
    /// The buffer ends inside the frame
    #[error("frame extends past the end of the data")]
    InsufficientData,

    /// The length field cannot describe a valid body
    #[error("frame length is smaller than a record body")]
    InvalidFormat,

    #[error("checksum mismatch: stored {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
}

impl WalRecord {
    pub fn new(sequence: u64, timestamp: u64, writeset: Vec<u8>) -> Self {
        WalRecord {
            sequence,
            timestamp,
            writeset,
        }
    }

    /// Record for a commit of `mutations`, stamped now.
    pub fn from_mutations(sequence: u64, mutations: &[Mutation]) -> tessera_core::Result<Self> {
        let writeset = writeset::encode(mutations)?;
        Ok(WalRecord::new(sequence, now_micros(), writeset))
    }

    /// Decode the mutation list.
    pub fn mutations(&self) -> tessera_core::Result<Vec<Mutation>> {
        writeset::decode(&self.writeset)
    }

    /// Encode as a complete frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body_len = BODY_HEADER_SIZE + self.writeset.len();
        let mut frame = vec![0u8; FRAME_HEADER_SIZE + BODY_HEADER_SIZE];
        LittleEndian::write_u32(&mut frame[0..4], body_len as u32);
        frame[8] = WAL_RECORD_FORMAT_VERSION;
        LittleEndian::write_u64(&mut frame[9..17], self.sequence);
        LittleEndian::write_u64(&mut frame[17..25], self.timestamp);
        frame.extend_from_slice(&self.writeset);

        let crc = crc32fast::hash(&frame[FRAME_HEADER_SIZE..]);
        LittleEndian::write_u32(&mut frame[4..8], crc);
        frame
    }

    /// Decode the frame at the start of `bytes`.
    ///
    /// Returns the record and the number of bytes the frame occupies.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalRecordError> {
        if bytes.len() < 4 {
            return Err(WalRecordError::InsufficientData);
        }
        let body_len = LittleEndian::read_u32(&bytes[0..4]) as usize;
        if body_len < BODY_HEADER_SIZE {
            return Err(WalRecordError::InvalidFormat);
        }
        let frame_len = FRAME_HEADER_SIZE + body_len;
        if bytes.len() < frame_len {
            return Err(WalRecordError::InsufficientData);
        }

        let expected = LittleEndian::read_u32(&bytes[4..8]);
        let body = &bytes[FRAME_HEADER_SIZE..frame_len];
        let computed = crc32fast::hash(body);
        if expected != computed {
            return Err(WalRecordError::ChecksumMismatch { expected, computed });
        }
        if body[0] != WAL_RECORD_FORMAT_VERSION {
            return Err(WalRecordError::UnsupportedVersion(body[0]));
        }

        let record = WalRecord {
            sequence: LittleEndian::read_u64(&body[1..9]),
            timestamp: LittleEndian::read_u64(&body[9..17]),
            writeset: body[BODY_HEADER_SIZE..].to_vec(),
        };
        Ok((record, frame_len))
    }
}

/// Microseconds since the Unix epoch, 0 if the clock is before it
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
