//! Database engine for Tessera
//!
//! This crate orchestrates all lower layers:
//! - Database: open / mutator / snapshot / close over one directory
//! - Configuration: `DatabaseConfig` and the `tessera.toml` tuning file
//! - Recovery: WAL replay into the trees of the active version
//! - Schema: the `Migration` builder and the version step runner
//!
//! The engine is the only component that knows about:
//! - The directory lock and the `CURRENT` version switch
//! - Cross-layer coordination (storage + WAL + recovery)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod recovery;
pub mod schema;

pub use database::{Database, DatabaseConfig, Tuning, CONFIG_FILE_NAME};
pub use recovery::{RecoveryCoordinator, RecoveryStats};
pub use schema::{Migration, SchemaVersion};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Database: Send, Sync);
    assert_impl_all!(DatabaseConfig: Send, Sync, Clone);
}
