//! Library interface for decant (dct)
//!
//! Dependency-aware upgrades for Homebrew-style formulae and casks: outdated
//! detection, ordered installation, and rollback of failed upgrades.

pub mod artifact;
pub mod caskroom;
pub mod cellar;
pub mod colors;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod graph;
pub mod installer;
pub mod interrupt;
pub mod lifecycle;
pub mod metadata;
pub mod package;
pub mod quarantine;
pub mod receipt;
pub mod reporter;
pub mod symlink;
pub mod upgrade;
pub mod version;

// Re-export commonly used types
pub use config::Config;
pub use error::{DecantError, Result};
pub use symlink::normalize_path;
pub use upgrade::{UpgradeOptions, UpgradeReport, Upgrader};
