//! Database directory layout

pub mod paths;

pub use paths::DatabasePaths;
