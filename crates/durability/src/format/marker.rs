//! Durable schema version marker (`CURRENT`)
//!
//! Identifies the active `versions/<n>/` directory. It is only ever replaced
//! whole, with the write-fsync-rename pattern, so a crash leaves either the
//! old or the new version, never a mix.
//!
//! # Format
//!
//! ```text
//! +------------------+
//! | Magic: "TSCV"    | 4 bytes
//! | Format Version   | 4 bytes (u32 LE)
//! | Schema Version   | 8 bytes (u64 LE)
//! | Database UUID    | 16 bytes
//! | CRC32            | 4 bytes
//! +------------------+
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Write};
use std::path::Path;

/// Marker magic bytes: "TSCV"
pub const MARKER_MAGIC: [u8; 4] = *b"TSCV";

/// Current marker format version
pub const MARKER_FORMAT_VERSION: u32 = 1;

/// Encoded marker size
pub const MARKER_SIZE: usize = 36;

/// Contents of the `CURRENT` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMarker {
    /// Active schema version
    pub version: u64,
    /// Database identity, shared with the WAL segment headers
    pub database_uuid: [u8; 16],
}

impl VersionMarker {
    /// Create a marker
    pub fn new(version: u64, database_uuid: [u8; 16]) -> Self {
        VersionMarker {
            version,
            database_uuid,
        }
    }

    /// Serialize marker to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MARKER_SIZE);
        bytes.extend_from_slice(&MARKER_MAGIC);
        // Writes into a Vec cannot fail
        let _ = bytes.write_u32::<LittleEndian>(MARKER_FORMAT_VERSION);
        let _ = bytes.write_u64::<LittleEndian>(self.version);
        bytes.extend_from_slice(&self.database_uuid);
        let crc = crc32fast::hash(&bytes);
        let _ = bytes.write_u32::<LittleEndian>(crc);
        bytes
    }

    /// Deserialize marker from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MarkerError> {
        if bytes.len() != MARKER_SIZE {
            return Err(MarkerError::BadLength(bytes.len()));
        }
        if bytes[0..4] != MARKER_MAGIC {
            return Err(MarkerError::InvalidMagic);
        }

        let data = &bytes[..MARKER_SIZE - 4];
        let mut cursor = Cursor::new(&bytes[4..]);
        let format_version = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u64::<LittleEndian>()?;
        let mut database_uuid = [0u8; 16];
        std::io::Read::read_exact(&mut cursor, &mut database_uuid)?;
        let stored_crc = cursor.read_u32::<LittleEndian>()?;

        let computed_crc = crc32fast::hash(data);
        if stored_crc != computed_crc {
            return Err(MarkerError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }
        if format_version != MARKER_FORMAT_VERSION {
            return Err(MarkerError::UnsupportedVersion(format_version));
        }

        Ok(VersionMarker {
            version,
            database_uuid,
        })
    }

    /// Load the marker at `path`, `None` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, MarkerError> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the marker at `path` atomically
    pub fn persist(&self, path: &Path) -> Result<(), MarkerError> {
        write_atomic(path, &self.to_bytes())?;
        Ok(())
    }
}

/// Replace `path` with `bytes` (write temp, fsync, rename, fsync directory)
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Fsync a directory so renames and creations inside it are durable
pub fn sync_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() || !dir.exists() {
        return Ok(());
    }
    File::open(dir)?.sync_all()
}

/// Version marker errors
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrong file size
    #[error("Version marker has {0} bytes, expected {MARKER_SIZE}")]
    BadLength(usize),

    /// Wrong magic bytes
    #[error("Invalid version marker magic")]
    InvalidMagic,

    /// Checksum verification failed
    #[error("Version marker checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported version marker format: {0}")]
    UnsupportedVersion(u32),
}

impl From<MarkerError> for tessera_core::Error {
    fn from(e: MarkerError) -> Self {
        match e {
            MarkerError::Io(io) => tessera_core::Error::Io(io),
            other => tessera_core::Error::Corruption(other.to_string()),
        }
    }
}
