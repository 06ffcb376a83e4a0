//! Database directory structure
//!
//! A database is a directory containing all state:
//!
//! ```text
//! <root>/
//! ├── CURRENT          # Active schema version marker
//! ├── .lock            # Exclusive process lock
//! ├── tessera.toml     # Optional tuning
//! ├── versions/
//! │   └── 1/
//! │       ├── catalog.json
//! │       ├── tree-1.pages
//! │       └── tree-1.root
//! ├── stores/          # Migration staging area
//! └── wal/
//!     ├── wal-000001.seg
//!     └── ...
//! ```

use std::path::{Path, PathBuf};
use tessera_core::TreeId;

/// Database directory paths
#[derive(Debug, Clone)]
pub struct DatabasePaths {
    root: PathBuf,
}

impl DatabasePaths {
    /// Create paths from root directory
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        DatabasePaths {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root database directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version marker file
    pub fn current(&self) -> PathBuf {
        self.root.join("CURRENT")
    }

    /// Process lock file
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Optional tuning file
    pub fn config_file(&self) -> PathBuf {
        self.root.join("tessera.toml")
    }

    /// WAL directory
    pub fn wal_dir(&self) -> PathBuf {
        self.root.join("wal")
    }

    /// Parent of all version directories
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    /// Directory of one schema version
    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.versions_dir().join(version.to_string())
    }

    /// Migration staging area
    pub fn stores_dir(&self) -> PathBuf {
        self.root.join("stores")
    }

    /// Staging directory for a migration in progress
    pub fn staging_dir(&self, version: u64) -> PathBuf {
        self.stores_dir().join(format!("migrate-{}", version))
    }

    /// Catalog file inside a version directory
    pub fn catalog_file(dir: &Path) -> PathBuf {
        dir.join("catalog.json")
    }

    /// Page file of a tree inside a version directory
    pub fn pages_file(dir: &Path, tree: TreeId) -> PathBuf {
        dir.join(format!("tree-{}.pages", tree.0))
    }

    /// Shadow root file of a tree inside a version directory
    pub fn root_file(dir: &Path, tree: TreeId) -> PathBuf {
        dir.join(format!("tree-{}.root", tree.0))
    }

    /// A database exists if its version marker is present
    pub fn exists(&self) -> bool {
        self.current().exists()
    }

    /// Create the directory structure
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.wal_dir())?;
        std::fs::create_dir_all(self.versions_dir())?;
        std::fs::create_dir_all(self.stores_dir())?;
        Ok(())
    }

    /// Version numbers with a directory under `versions/`, ascending
    pub fn list_versions(&self) -> std::io::Result<Vec<u64>> {
        let mut versions = Vec::new();
        let dir = self.versions_dir();
        if !dir.exists() {
            return Ok(versions);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if let Ok(version) = entry.file_name().to_string_lossy().parse::<u64>() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}
