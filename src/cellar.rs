//! Cellar management - reading installed kegs

use crate::config::Config;
use crate::receipt::InstallReceipt;
use crate::version::PkgVersion;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// An installed keg in the Cellar
#[derive(Debug, Clone)]
pub struct InstalledKeg {
    pub name: String,
    pub version: PkgVersion,
    pub path: PathBuf,
    pub receipt: Option<InstallReceipt>,
}

impl InstalledKeg {
    /// Create from a Cellar version directory
    pub fn from_path(name: String, version: &str, path: PathBuf) -> Self {
        let receipt = InstallReceipt::read_optional(&path);
        Self {
            name,
            version: PkgVersion::parse(version),
            path,
            receipt,
        }
    }

    /// Kegs without a receipt were most likely installed by hand
    pub fn installed_on_request(&self) -> bool {
        self.receipt
            .as_ref()
            .map(|r| r.installed_on_request)
            .unwrap_or(true)
    }

    pub fn used_options(&self) -> Vec<String> {
        self.receipt
            .as_ref()
            .map(|r| r.used_options.clone())
            .unwrap_or_default()
    }
}

/// Read all installed kegs from the Cellar
pub fn list_kegs(config: &Config) -> Result<Vec<InstalledKeg>> {
    let cellar = &config.cellar;

    if !cellar.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(cellar)
        .with_context(|| format!("Failed to read Cellar: {}", cellar.display()))?
    {
        let entry = entry?;
        let formula_name = entry.file_name().to_string_lossy().to_string();

        // Skip hidden entries, including staging and upgrade backups
        if formula_name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        kegs.extend(installed_kegs(config, &formula_name)?);
    }

    Ok(kegs)
}

/// All installed versions of a formula, newest first
pub fn installed_kegs(config: &Config, formula: &str) -> Result<Vec<InstalledKeg>> {
    let formula_path = config.cellar.join(formula);

    if !formula_path.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&formula_path)? {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();

        if version.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        kegs.push(InstalledKeg::from_path(
            formula.to_string(),
            &version,
            entry.path(),
        ));
    }

    // [0] is always the newest version
    kegs.sort_by(|a, b| b.version.cmp(&a.version));

    Ok(kegs)
}
