//! Install receipts.
//!
//! Every keg and every installed cask version carries an `INSTALL_RECEIPT.json`
//! describing how it got there:
//!
//! ```text
//! <prefix>/Cellar/ripgrep/14.1.0/
//!   INSTALL_RECEIPT.json
//!   bin/
//! <prefix>/Caskroom/firefox/.metadata/120.0/
//!   INSTALL_RECEIPT.json
//! ```
//!
//! The receipt is what lets an upgrade carry state forward: whether the
//! package was installed on request or only as a dependency, which options
//! it was installed with, and where it was downloaded from.

use crate::package::Package;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub pkg_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub tap: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub installed_by: String,
    pub installed_on_request: bool,
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub used_options: Vec<String>,
    pub time: i64,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

impl InstallReceipt {
    pub fn for_package(
        package: &Package,
        runtime_dependencies: Vec<RuntimeDependency>,
        installed_on_request: bool,
        used_options: Vec<String>,
    ) -> Self {
        Self {
            installed_by: format!("decant/{}", env!("CARGO_PKG_VERSION")),
            installed_on_request,
            installed_as_dependency: !installed_on_request,
            used_options,
            time: chrono::Utc::now().timestamp(),
            runtime_dependencies,
            source: Some(SourceInfo {
                tap: package.id.tap.clone(),
                url: package.source.as_ref().map(|s| s.url.clone()),
                homepage: package.homepage.clone(),
            }),
        }
    }

    /// Read the receipt stored in `dir`
    pub fn read(dir: &Path) -> Result<Self> {
        let receipt_path = dir.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&receipt_path)
            .with_context(|| format!("Failed to read receipt: {}", receipt_path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", receipt_path.display()))
    }

    /// Like [`InstallReceipt::read`], but a missing or unreadable receipt is `None`
    pub fn read_optional(dir: &Path) -> Option<Self> {
        match Self::read(dir) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                tracing::debug!("No usable receipt in {}: {:#}", dir.display(), e);
                None
            }
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let receipt_path = dir.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;
        fs::write(&receipt_path, json)
            .with_context(|| format!("Failed to write receipt: {}", receipt_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let package = Package::formula("jq", "1.7.1").with_source("https://example.org/jq", None);
        let receipt = InstallReceipt::for_package(
            &package,
            vec![RuntimeDependency {
                full_name: "homebrew/core/oniguruma".into(),
                pkg_version: "6.9.9".into(),
            }],
            false,
            vec!["--with-docs".into()],
        );
        receipt.write(dir.path()).unwrap();

        let read = InstallReceipt::read(dir.path()).unwrap();
        assert_eq!(read, receipt);
        assert!(read.installed_as_dependency);
        assert_eq!(
            read.source.unwrap().url.as_deref(),
            Some("https://example.org/jq")
        );
    }

    #[test]
    fn test_missing_receipt_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(InstallReceipt::read_optional(dir.path()).is_none());
    }
}
