//! Database configuration
//!
//! [`DatabaseConfig`] is built in code: the directory, the schema version to
//! open at and any user comparators. Tuning knobs live in [`Tuning`], which
//! can also be loaded from a `tessera.toml` file in the database directory.
//! Explicit tuning on the config wins over the file; without either the
//! defaults apply.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tessera_concurrency::{TransactionConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_THRESHOLD};
use tessera_core::{ComparatorRegistry, Error, Result, Value};
use tessera_durability::wal::DEFAULT_SEGMENT_SIZE;
use tessera_durability::{DurabilityMode, WalConfig};
use tessera_storage::cache::DEFAULT_CACHE_PAGES;
use tessera_storage::{StorageConfig, DEFAULT_PAGE_SIZE};

/// Tuning file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Tuning loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// # "always" (default) = fsync every commit, zero data loss
/// # "standard" = periodic fsync (~100ms), commits return before fsync and
/// #              an acknowledged commit can be lost on crash
/// durability = "always"
/// cache_pages = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Durability mode: `"always"` or `"standard"`.
    ///
    /// `"standard"` acknowledges commits before they are fsynced, so a crash
    /// can lose commits a mutator already reported as successful.
    pub durability: String,
    /// Clean pages kept in the page cache.
    pub cache_pages: usize,
    /// Page size of newly created trees, in bytes.
    pub page_size: usize,
    /// WAL segment rotation size, in bytes.
    pub wal_segment_size: u64,
    /// Dirty pages that trigger a flush and WAL checkpoint after a commit.
    pub flush_threshold: usize,
    /// Records fetched per cursor batch.
    pub batch_size: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            durability: DurabilityMode::Always.name().to_string(),
            cache_pages: DEFAULT_CACHE_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            wal_segment_size: DEFAULT_SEGMENT_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Tuning {
    /// Small pages, small WAL segments and a low flush threshold, so tests
    /// exercise splits, rotation and checkpoints.
    pub fn for_testing() -> Self {
        let storage = StorageConfig::for_testing();
        Tuning {
            durability: "always".to_string(),
            cache_pages: storage.cache_pages,
            page_size: storage.page_size,
            wal_segment_size: WalConfig::for_testing().segment_size,
            flush_threshold: 64,
            batch_size: 16,
        }
    }

    /// Parse the durability string into a `DurabilityMode`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        DurabilityMode::from_name(&self.durability).ok_or_else(|| {
            Error::Config(format!(
                "invalid durability mode '{}', expected \"always\" or \"standard\"",
                self.durability
            ))
        })
    }

    /// Page and cache sizing for the tree set.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            page_size: self.page_size,
            cache_pages: self.cache_pages,
        }
    }

    /// WAL segment settings.
    pub fn wal_config(&self) -> WalConfig {
        WalConfig::new().with_segment_size(self.wal_segment_size)
    }

    /// Transaction manager settings.
    pub fn transaction_config(&self) -> TransactionConfig {
        TransactionConfig {
            flush_threshold: self.flush_threshold,
            batch_size: self.batch_size,
        }
    }

    /// Reject values the lower layers cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        self.storage_config().validate()?;
        self.wal_config()
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        if self.flush_threshold == 0 {
            return Err(Error::Config("flush_threshold must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Returns the default tuning file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera database tuning
#
# Durability mode: "always" (default) or "standard"
#   "always"   = fsync every commit, zero data loss
#   "standard" = periodic fsync (~100ms), commits return before fsync and
#                an acknowledged commit can be lost on crash
durability = "always"

# Clean pages kept in memory
cache_pages = 4096

# Page size of newly created trees, in bytes (existing trees keep theirs)
page_size = 16384

# WAL segment rotation size, in bytes
wal_segment_size = 67108864

# Dirty pages that trigger a flush and WAL checkpoint after a commit
flush_threshold = 1024

# Records fetched per cursor batch
batch_size = 64
"#
    }

    /// Read and parse tuning from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let tuning: Tuning = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse '{}': {}", path.display(), e))
        })?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Serialize this tuning to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize tuning: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Everything `Database::open` needs besides the upgrade callback
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database directory, created when missing
    pub directory: PathBuf,
    /// Schema version to open at; pending versions are migrated
    pub version: u64,
    /// Comparators available to key fields
    pub comparators: ComparatorRegistry,
    /// Explicit tuning; `None` reads `tessera.toml` or uses the defaults
    pub tuning: Option<Tuning>,
}

impl DatabaseConfig {
    /// Config for `directory` at version 1 with the built-in comparators
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            directory: directory.into(),
            version: 1,
            comparators: ComparatorRegistry::new(),
            tuning: None,
        }
    }

    /// Builder: target schema version
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Builder: register (or replace) a named comparator
    pub fn with_comparator<F>(mut self, name: impl Into<String>, cmp: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.comparators.register(name, cmp);
        self
    }

    /// Builder: explicit tuning
    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    /// Tuning in effect: explicit, then `tessera.toml`, then defaults
    pub fn resolve_tuning(&self) -> Result<Tuning> {
        if let Some(tuning) = &self.tuning {
            tuning.validate()?;
            return Ok(tuning.clone());
        }
        let path = self.directory.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Tuning::from_file(&path);
        }
        Ok(Tuning::default())
    }

    /// Check the settings that do not need the directory
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(Error::Config("version must be at least 1".into()));
        }
        if let Some(tuning) = &self.tuning {
            tuning.validate()?;
        }
        Ok(())
    }
}
