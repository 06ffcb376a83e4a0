//! Error types for Tessera
//!
//! This module defines the error taxonomy shared by every crate in the
//! workspace. Lower layers keep their own narrow error enums (WAL framing,
//! version marker, page files) and convert into [`Error`] at their boundary.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tessera database
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations on the WAL, page files or markers)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A migration step or schema lookup was invalid
    ///
    /// Raised by `open()` when an upgrade step is rejected. The persisted
    /// schema version is never advanced when this is returned.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Persistent data failed validation (checksum, length, magic)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The database is closing or closed
    #[error("Database is shut down")]
    Shutdown,

    /// A store or index path that is not in the catalog
    #[error("Unknown store or index: {0}")]
    UnknownTree(String),

    /// A record or key did not match the declared key fields
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A single entry does not fit in one page
    #[error("Entry of {size} bytes exceeds page capacity of {max} bytes")]
    EntryTooLarge {
        /// Encoded size of the entry
        size: usize,
        /// Largest entry a page can hold
        max: usize,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A commit reached the WAL but could not be applied to the trees
    ///
    /// The commit is durable and is replayed on the next open; until then it
    /// is not visible and the database refuses new transactions.
    #[error("Commit {sequence} is durable but not applied until reopen: {reason}")]
    Unapplied {
        /// Sequence of the durable commit
        sequence: u64,
        /// Why the merge failed
        reason: String,
    },

    /// The database directory is held by another process
    #[error("Database at '{0}' is already in use by another process")]
    Locked(String),
}

impl Error {
    /// Construct a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    /// Construct a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption(message.into())
    }

    /// True for errors that leave persisted state untouched and can be retried
    /// by the caller after fixing its input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Schema(_) | Error::UnknownTree(_) | Error::InvalidKey(_) | Error::Config(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
