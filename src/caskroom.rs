//! Caskroom layout and installed-cask records.
//!
//! ```text
//! <prefix>/Caskroom/firefox/
//!   120.0/                              staged content
//!   .metadata/120.0/
//!     INSTALL_RECEIPT.json
//!     artifacts.json                    what was placed where
//!     20240101120000.000/Casks/firefox.json   definition snapshot
//! ```
//!
//! The snapshot is written once and never modified; reverting or
//! uninstalling a cask reconstructs its artifacts from the snapshot rather
//! than from the current package index, which may have moved on.

use crate::artifact::InstalledArtifact;
use crate::config::Config;
use crate::package::Package;
use crate::receipt::InstallReceipt;
use crate::version::PkgVersion;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

const METADATA_DIR: &str = ".metadata";
const ARTIFACTS_FILE: &str = "artifacts.json";

#[derive(Debug, Clone)]
pub struct InstalledCask {
    pub token: String,
    pub version: PkgVersion,
    pub staged_path: PathBuf,
    pub metadata_path: PathBuf,
    pub artifacts: Vec<InstalledArtifact>,
    pub snapshot: Option<Package>,
    pub receipt: Option<InstallReceipt>,
}

impl InstalledCask {
    pub fn installed_on_request(&self) -> bool {
        self.receipt
            .as_ref()
            .map(|r| r.installed_on_request)
            .unwrap_or(true)
    }
}

pub fn metadata_path(config: &Config, token: &str, version: &str) -> PathBuf {
    config.caskroom.join(token).join(METADATA_DIR).join(version)
}

/// The installed version of a cask, if any
pub fn installed_cask(config: &Config, token: &str) -> Result<Option<InstalledCask>> {
    let cask_dir = config.caskroom.join(token);
    if !cask_dir.is_dir() {
        return Ok(None);
    }

    let mut versions = Vec::new();
    for entry in fs::read_dir(&cask_dir)
        .with_context(|| format!("Failed to read {}", cask_dir.display()))?
    {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();
        if version.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        versions.push(PkgVersion::parse(&version));
    }

    // Normally only one version exists; prefer the newest otherwise
    versions.sort();
    let Some(version) = versions.pop() else {
        return Ok(None);
    };

    let raw = version.to_string();
    let metadata = metadata_path(config, token, &raw);
    Ok(Some(InstalledCask {
        token: token.to_string(),
        staged_path: config.cask_version_path(token, &raw),
        artifacts: read_artifacts(config, token, &raw)?,
        snapshot: read_snapshot(config, token, &raw)?,
        receipt: InstallReceipt::read_optional(&metadata),
        metadata_path: metadata,
        version,
    }))
}

/// List all installed casks, sorted by token
pub fn list_casks(config: &Config) -> Result<Vec<InstalledCask>> {
    if !config.caskroom.exists() {
        return Ok(vec![]);
    }

    let mut tokens = Vec::new();
    for entry in fs::read_dir(&config.caskroom)? {
        let entry = entry?;
        let token = entry.file_name().to_string_lossy().to_string();
        if !token.starts_with('.') && entry.path().is_dir() {
            tokens.push(token);
        }
    }
    tokens.sort();

    let mut casks = Vec::new();
    for token in tokens {
        if let Some(cask) = installed_cask(config, &token)? {
            casks.push(cask);
        }
    }
    Ok(casks)
}

/// Persist the definition used for this install. Fails rather than
/// overwrite an existing snapshot.
pub fn write_snapshot(config: &Config, package: &Package) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%.3f").to_string();
    let dir = metadata_path(config, package.name(), &package.version.to_string())
        .join(timestamp)
        .join("Casks");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!("{}.json", package.name()));
    let json = serde_json::to_string_pretty(package).context("Failed to serialize cask")?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("Failed to create snapshot: {}", path.display()))?;
    file.write_all(json.as_bytes())?;

    Ok(path)
}

/// Most recent snapshot for an installed version
pub fn read_snapshot(config: &Config, token: &str, version: &str) -> Result<Option<Package>> {
    let metadata = metadata_path(config, token, version);
    if !metadata.is_dir() {
        return Ok(None);
    }

    let mut stamps: Vec<PathBuf> = fs::read_dir(&metadata)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    stamps.sort();

    let Some(latest) = stamps.pop() else {
        return Ok(None);
    };
    let path = latest.join("Casks").join(format!("{}.json", token));
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let package = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
    Ok(Some(package))
}

pub fn write_artifacts(
    config: &Config,
    token: &str,
    version: &str,
    artifacts: &[InstalledArtifact],
) -> Result<()> {
    let metadata = metadata_path(config, token, version);
    fs::create_dir_all(&metadata)?;
    let path = metadata.join(ARTIFACTS_FILE);
    let json = serde_json::to_string_pretty(artifacts)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_artifacts(config: &Config, token: &str, version: &str) -> Result<Vec<InstalledArtifact>> {
    let path = metadata_path(config, token, version).join(ARTIFACTS_FILE);
    if !path.exists() {
        return Ok(vec![]);
    }
    let contents = fs::read_to_string(&path)?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}
