//! Archive extraction into a staging directory.
//!
//! Formula bottles are tar.gz files laid out as `<name>/<version>/...`; cask
//! downloads may be tarballs or a single file (a bare binary, for instance).
//!
//! ```text
//! Input:  jq--1.7.1.arm64_sonoma.bottle.tar.gz
//! Staged: <cellar>/.staging/jq-1.7.1/jq/1.7.1/
//!   bin/
//!   share/
//! ```
//!
//! When a bottle is rebuilt without a source change its directory carries a
//! revision suffix (`1.7.1_1`); [`bottle_root`] accepts either form.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Tar,
    Plain,
}

fn archive_kind(path: &Path) -> ArchiveKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveKind::TarGz
    } else if name.ends_with(".tar") {
        ArchiveKind::Tar
    } else {
        ArchiveKind::Plain
    }
}

/// Extract `archive` into `dest`, creating it. Non-archives are copied in
/// under their own file name.
pub fn extract_to(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create staging directory: {}", dest.display()))?;

    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;

    match archive_kind(archive) {
        ArchiveKind::TarGz => Archive::new(GzDecoder::new(file)).unpack(dest),
        ArchiveKind::Tar => Archive::new(file).unpack(dest),
        ArchiveKind::Plain => {
            let name = archive
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid archive path: {}", archive.display()))?;
            fs::copy(archive, dest.join(name)).map(|_| ())
        }
    }
    .with_context(|| {
        format!(
            "Failed to extract {} to {}",
            archive.display(),
            dest.display()
        )
    })?;

    tracing::debug!("Extracted {} to {}", archive.display(), dest.display());
    Ok(())
}

/// Directory inside an extracted bottle that becomes the keg.
///
/// Falls back to the staging directory itself for flat archives.
pub fn bottle_root(staging: &Path, formula_name: &str, version: &str) -> Result<PathBuf> {
    let formula_dir = staging.join(formula_name);
    if !formula_dir.is_dir() {
        return Ok(staging.to_path_buf());
    }

    // Exact version match (no bottle revision)
    if formula_dir.join(version).is_dir() {
        return Ok(formula_dir.join(version));
    }

    // Look for version with bottle revision suffix (version_N)
    let base = version.split('_').next().unwrap_or(version);
    let matching = fs::read_dir(&formula_dir)
        .with_context(|| format!("Failed to read {}", formula_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .find(|name| {
            let name = name.to_string_lossy();
            name == base || name.starts_with(&format!("{}_", base))
        })
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Extraction failed: no directory found matching version {} in {}",
                version,
                formula_dir.display()
            )
        })?;

    Ok(formula_dir.join(matching))
}
