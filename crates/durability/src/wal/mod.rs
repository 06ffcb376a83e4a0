//! WAL (Write-Ahead Log) module
//!
//! - `config`: WAL configuration (WalConfig, WalConfigError)
//! - `mode`: Durability modes (Always, Standard)
//! - `writer`: Segmented WAL writer (WalWriter)
//! - `reader`: Segmented WAL reader and replay (WalReader)

pub mod config;
pub mod mode;
pub mod reader;
pub mod writer;

pub use config::{WalConfig, WalConfigError, DEFAULT_SEGMENT_SIZE, MIN_SEGMENT_SIZE};
pub use mode::DurabilityMode;
pub use reader::{ReadStopReason, ReplayEntry, TruncateInfo, WalReadResult, WalReader, WalReaderError};
pub use writer::{WalCounters, WalWriter};
