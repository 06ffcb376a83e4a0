//! B-tree node pages
//!
//! A page is one serialized [`Node`] stored in a fixed-size slot:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────┬──────────────┐
//! │ CRC32 (4)    │ Length (4)   │ Node (MessagePack)   │ zero padding │
//! └──────────────┴──────────────┴──────────────────────┴──────────────┘
//! ```
//!
//! Pages are copy-on-write: a written slot is never modified until it has
//! been retired and reclaimed.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::cmp::Ordering;
use tessera_core::{Key, KeyOrder, TreeValue, Value};

/// Bytes taken by the CRC and length fields
pub const PAGE_FRAME_HEADER: usize = 8;

/// Room reserved for the node's own encoding around its items
pub const NODE_OVERHEAD: usize = 32;

/// Smallest accepted page size
pub const MIN_PAGE_SIZE: usize = 256;

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Slot number of a page within its tree's page file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageAddr(pub u64);

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// B-tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Sorted entries
    Leaf {
        /// `(key, value)` pairs in key order
        entries: Vec<(Key, TreeValue)>,
    },
    /// Sorted child pointers
    Branch {
        /// `(lower bound, child)` pairs; every key in a child sorts at or
        /// after its bound and before the next child's bound
        children: Vec<(Key, PageAddr)>,
    },
}

impl Node {
    /// Empty leaf
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
        }
    }

    /// Number of entries or children
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Branch { children } => children.len(),
        }
    }

    /// True when the node holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for leaves
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Smallest key (or bound) in the node
    pub fn min_key(&self) -> Option<&Key> {
        match self {
            Node::Leaf { entries } => entries.first().map(|(k, _)| k),
            Node::Branch { children } => children.first().map(|(k, _)| k),
        }
    }

    /// Index of the child whose range contains `key`
    pub fn child_for(children: &[(Key, PageAddr)], order: &KeyOrder, key: &[Value]) -> usize {
        children
            .iter()
            .rposition(|(bound, _)| order.compare(bound, key) != Ordering::Greater)
            .unwrap_or(0)
    }

    /// Encoded size of the node
    pub fn encoded_size(&self) -> Result<usize, PageError> {
        Ok(rmp_serde::to_vec(self)?.len())
    }
}

/// Encoded size of one leaf entry
pub fn entry_size(key: &Key, value: &TreeValue) -> Result<usize, PageError> {
    Ok(rmp_serde::to_vec(&(key, value))?.len())
}

/// Encoded size of one branch child
pub fn child_size(key: &Key, addr: PageAddr) -> Result<usize, PageError> {
    Ok(rmp_serde::to_vec(&(key, addr))?.len())
}

/// Largest item (entry or child) that fits in one page
pub fn max_item_size(page_size: usize) -> usize {
    page_size.saturating_sub(PAGE_FRAME_HEADER + NODE_OVERHEAD)
}

/// Serialize a node into a full page image
pub fn encode_page(node: &Node, page_size: usize) -> Result<Vec<u8>, PageError> {
    let payload = rmp_serde::to_vec(node)?;
    if payload.len() + PAGE_FRAME_HEADER > page_size {
        return Err(PageError::Overflow {
            size: payload.len(),
            max: page_size - PAGE_FRAME_HEADER,
        });
    }
    let mut page = vec![0u8; page_size];
    LittleEndian::write_u32(&mut page[0..4], crc32fast::hash(&payload));
    LittleEndian::write_u32(&mut page[4..8], payload.len() as u32);
    page[PAGE_FRAME_HEADER..PAGE_FRAME_HEADER + payload.len()].copy_from_slice(&payload);
    Ok(page)
}

/// Parse a page image
pub fn decode_page(page: &[u8]) -> Result<Node, PageError> {
    if page.len() < PAGE_FRAME_HEADER {
        return Err(PageError::Truncated);
    }
    let stored_crc = LittleEndian::read_u32(&page[0..4]);
    let len = LittleEndian::read_u32(&page[4..8]) as usize;
    if len == 0 || PAGE_FRAME_HEADER + len > page.len() {
        return Err(PageError::Truncated);
    }
    let payload = &page[PAGE_FRAME_HEADER..PAGE_FRAME_HEADER + len];
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(PageError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }
    Ok(rmp_serde::from_slice(payload)?)
}

/// Page encoding errors
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// Node does not fit in a page
    #[error("Node of {size} bytes exceeds page payload of {max} bytes")]
    Overflow {
        /// Encoded node size
        size: usize,
        /// Page payload capacity
        max: usize,
    },

    /// Page image shorter than its length field
    #[error("Truncated page")]
    Truncated,

    /// Checksum verification failed
    #[error("Page checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Encode failure
    #[error("Page encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Decode failure
    #[error("Page decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl From<PageError> for tessera_core::Error {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Overflow { size, max } => tessera_core::Error::EntryTooLarge { size, max },
            PageError::Encode(e) => tessera_core::Error::Serialization(e.to_string()),
            other => tessera_core::Error::Corruption(other.to_string()),
        }
    }
}
