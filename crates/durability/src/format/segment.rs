//! WAL segment files
//!
//! The log is a sequence of `wal-NNNNNN.seg` files. Each starts with a
//! 32-byte header and is followed by record frames (see `wal_record`).
//!
//! ```text
//! offset  size  field
//!      0     4  magic "TSWL"
//!      4     2  format version
//!      6     2  reserved, zero
//!      8     8  segment number
//!     16    16  database uuid
//! ```
//!
//! Only the newest segment takes appends. Rotation seals it first.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Leading bytes of every segment
pub const SEGMENT_MAGIC: [u8; 4] = *b"TSWL";

/// Segment header layout version
pub const SEGMENT_FORMAT_VERSION: u16 = 1;

/// Bytes before the first record frame
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Identity of one segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_number: u64,
    /// Segments written by another database are refused on replay
    pub database_uuid: [u8; 16],
}

impl SegmentHeader {
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[..4].copy_from_slice(&SEGMENT_MAGIC);
        LittleEndian::write_u16(&mut out[4..6], SEGMENT_FORMAT_VERSION);
        LittleEndian::write_u64(&mut out[8..16], self.segment_number);
        out[16..].copy_from_slice(&self.database_uuid);
        out
    }

    /// Parse a header, rejecting foreign files and unknown versions with
    /// `InvalidData`.
    pub fn decode(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> io::Result<Self> {
        if bytes[..4] != SEGMENT_MAGIC {
            return Err(invalid_data("missing WAL segment magic".to_string()));
        }
        let version = LittleEndian::read_u16(&bytes[4..6]);
        if version != SEGMENT_FORMAT_VERSION {
            return Err(invalid_data(format!(
                "unsupported WAL segment version {}",
                version
            )));
        }
        let mut database_uuid = [0u8; 16];
        database_uuid.copy_from_slice(&bytes[16..]);
        Ok(SegmentHeader {
            segment_number: LittleEndian::read_u64(&bytes[8..16]),
            database_uuid,
        })
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Append,
    Sealed,
}

/// Open handle on one segment file
#[derive(Debug)]
pub struct WalSegment {
    file: File,
    header: SegmentHeader,
    len: u64,
    access: Access,
}

impl WalSegment {
    /// `wal-NNNNNN.seg` inside `dir`
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("wal-{:06}.seg", segment_number))
    }

    /// Create a new segment and make its header durable.
    ///
    /// Fails if the file already exists.
    pub fn create(dir: &Path, segment_number: u64, database_uuid: [u8; 16]) -> io::Result<Self> {
        let header = SegmentHeader {
            segment_number,
            database_uuid,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(Self::segment_path(dir, segment_number))?;
        file.write_all(&header.encode())?;
        file.sync_all()?;
        Ok(WalSegment {
            file,
            header,
            len: SEGMENT_HEADER_SIZE as u64,
            access: Access::Append,
        })
    }

    /// Open an existing segment without write access.
    pub fn open_read(dir: &Path, segment_number: u64) -> io::Result<Self> {
        Self::open(dir, segment_number, Access::Sealed)
    }

    /// Reopen the newest segment to continue appending at its end.
    pub fn open_append(dir: &Path, segment_number: u64) -> io::Result<Self> {
        Self::open(dir, segment_number, Access::Append)
    }

    fn open(dir: &Path, segment_number: u64, access: Access) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(access == Access::Append)
            .open(Self::segment_path(dir, segment_number))?;

        let mut raw = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut raw)?;
        let header = SegmentHeader::decode(&raw)?;
        if header.segment_number != segment_number {
            return Err(invalid_data(format!(
                "file for segment {} claims to be segment {}",
                segment_number, header.segment_number
            )));
        }

        let len = file.seek(SeekFrom::End(0))?;
        Ok(WalSegment {
            file,
            header,
            len,
            access,
        })
    }

    pub fn segment_number(&self) -> u64 {
        self.header.segment_number
    }

    pub fn database_uuid(&self) -> [u8; 16] {
        self.header.database_uuid
    }

    /// File length, header included
    pub fn size(&self) -> u64 {
        self.len
    }

    /// No record frames yet
    pub fn is_empty(&self) -> bool {
        self.len <= SEGMENT_HEADER_SIZE as u64
    }

    fn check_writable(&self) -> io::Result<()> {
        match self.access {
            Access::Append => Ok(()),
            Access::Sealed => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("WAL segment {} is sealed", self.header.segment_number),
            )),
        }
    }

    /// Append raw frame bytes at the end of the file.
    pub fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.file.write_all(frame)?;
        self.len += frame.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Fsync and refuse further appends. Sealing twice is a no-op.
    pub fn seal(&mut self) -> io::Result<()> {
        if self.access == Access::Append {
            self.file.sync_all()?;
            self.access = Access::Sealed;
        }
        Ok(())
    }

    /// Everything after the header
    pub fn read_body(&mut self) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut body = Vec::with_capacity(self.len.saturating_sub(SEGMENT_HEADER_SIZE as u64) as usize);
        self.file.read_to_end(&mut body)?;
        Ok(body)
    }

    /// Cut the file back to `len` bytes, dropping a partly written frame.
    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.check_writable()?;
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.len = len;
        self.file.sync_all()
    }
}
