//! Page slot files and tree root files
//!
//! Every tree owns two files in its version directory:
//!
//! - `tree-<id>.pages`: fixed-size slots, slot `n` at offset `n * page_size`
//! - `tree-<id>.root`: the shadow root, replaced atomically on every flush
//!
//! The root file is the commit point of a flush. Slots it does not reach
//! (directly or through the free and retired lists) are garbage after a
//! crash and get reused.

use crate::page::{decode_page, PageAddr, PageError};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};

/// Root file magic bytes
pub const ROOT_MAGIC: [u8; 4] = *b"TSRT";

/// Root file header: magic + length + CRC32
const ROOT_HEADER_SIZE: usize = 12;

/// Slot file of one tree
pub struct PageFile {
    path: PathBuf,
    page_size: usize,
    file: Mutex<File>,
}

impl PageFile {
    /// Open (or create) a slot file
    pub fn open(path: &Path, page_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(PageFile {
            path: path.to_path_buf(),
            page_size,
            file: Mutex::new(file),
        })
    }

    /// Page size of this file
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Path of the slot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the page in `addr`
    pub fn read(&self, addr: PageAddr) -> Result<crate::page::Node> {
        let mut buf = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(addr.0 * self.page_size as u64))?;
            file.read_exact(&mut buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    Error::Corruption(format!(
                        "page {} lies beyond the end of {}",
                        addr,
                        self.path.display()
                    ))
                } else {
                    Error::Io(e)
                }
            })?;
        }
        decode_page(&buf).map_err(|e: PageError| {
            Error::Corruption(format!("page {} in {}: {}", addr, self.path.display(), e))
        })
    }

    /// Write a full page image into `addr`
    pub fn write(&self, addr: PageAddr, page: &[u8]) -> io::Result<()> {
        debug_assert_eq!(page.len(), self.page_size);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(addr.0 * self.page_size as u64))?;
        file.write_all(page)
    }

    /// fsync the slot file
    pub fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_data()
    }
}

/// Persistent state of one tree, as of its last flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootState {
    /// Page size the slot file was created with
    pub page_size: usize,
    /// Root page, `None` for an empty tree
    pub root: Option<PageAddr>,
    /// First never-used slot
    pub next_slot: u64,
    /// Slots available for reuse
    pub free: Vec<PageAddr>,
    /// Slots replaced by a flushed version but not yet reclaimed
    pub retired: Vec<PageAddr>,
    /// Highest commit sequence reflected in this root
    pub applied_sequence: u64,
}

impl RootState {
    /// State of a freshly created tree
    pub fn empty(page_size: usize, applied_sequence: u64) -> Self {
        RootState {
            page_size,
            root: None,
            next_slot: 0,
            free: Vec::new(),
            retired: Vec::new(),
            applied_sequence,
        }
    }

    /// Serialize with magic, length and checksum
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload =
            rmp_serde::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut bytes = vec![0u8; ROOT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&ROOT_MAGIC);
        LittleEndian::write_u32(&mut bytes[4..8], payload.len() as u32);
        LittleEndian::write_u32(&mut bytes[8..12], crc32fast::hash(&payload));
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Parse a root file image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ROOT_HEADER_SIZE || bytes[0..4] != ROOT_MAGIC {
            return Err(Error::corruption("root file has a bad header"));
        }
        let len = LittleEndian::read_u32(&bytes[4..8]) as usize;
        let crc = LittleEndian::read_u32(&bytes[8..12]);
        let payload = bytes
            .get(ROOT_HEADER_SIZE..ROOT_HEADER_SIZE + len)
            .ok_or_else(|| Error::corruption("root file is truncated"))?;
        if crc32fast::hash(payload) != crc {
            return Err(Error::corruption("root file checksum mismatch"));
        }
        rmp_serde::from_slice(payload).map_err(|e| Error::Corruption(e.to_string()))
    }

    /// Load a root file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Replace the root file atomically
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        tessera_durability::write_atomic(path, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{encode_page, Node};
    use tempfile::TempDir;
    use tessera_core::{key, Record, TreeValue, Value};

    #[test]
    fn test_slots_are_independent() {
        let dir = TempDir::new().unwrap();
        let file = PageFile::open(&dir.path().join("t.pages"), 512).unwrap();

        let a = Node::Leaf {
            entries: vec![(key![1], TreeValue::Record(Record::new(Value::Int(1), 1)))],
        };
        let b = Node::Branch {
            children: vec![(key![1], PageAddr(0))],
        };
        file.write(PageAddr(3), &encode_page(&a, 512).unwrap()).unwrap();
        file.write(PageAddr(0), &encode_page(&b, 512).unwrap()).unwrap();
        file.sync().unwrap();

        assert_eq!(file.read(PageAddr(3)).unwrap(), a);
        assert_eq!(file.read(PageAddr(0)).unwrap(), b);
        // Hole between written slots reads back as zeros
        assert!(matches!(file.read(PageAddr(1)), Err(Error::Corruption(_))));
        // Past the end of the file
        assert!(matches!(file.read(PageAddr(9)), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_root_state_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.root");
        let state = RootState {
            page_size: 4096,
            root: Some(PageAddr(7)),
            next_slot: 12,
            free: vec![PageAddr(2), PageAddr(4)],
            retired: vec![PageAddr(5)],
            applied_sequence: 99,
        };
        state.persist(&path).unwrap();
        assert_eq!(RootState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_root_state_detects_damage() {
        let mut bytes = RootState::empty(1024, 3).to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            RootState::from_bytes(&bytes),
            Err(Error::Corruption(_))
        ));
        assert!(RootState::from_bytes(b"XXXX").is_err());
    }
}
