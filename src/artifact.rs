//! Cask artifacts: apps, binaries, manpages and plain files.
//!
//! Each artifact stanza installs into a system location and yields an
//! [`InstalledArtifact`] record. The record alone is enough to undo the
//! installation, which is what makes cask rollback deterministic.

use crate::config::Config;
use crate::package::Artifact;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Moved,
    Symlinked,
    Copied,
}

/// What an artifact installation left on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledArtifact {
    pub label: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub placement: Placement,
}

pub trait ArtifactInstaller {
    fn install(&self, artifact: &Artifact, staged_root: &Path) -> Result<InstalledArtifact>;
    fn uninstall(&self, installed: &InstalledArtifact) -> Result<()>;
}

/// Installs artifacts into the directories named by [`Config`]
#[derive(Debug, Clone)]
pub struct FsArtifactInstaller {
    appdir: PathBuf,
    bindir: PathBuf,
    mandir: PathBuf,
}

impl FsArtifactInstaller {
    pub fn new(config: &Config) -> Self {
        Self {
            appdir: config.appdir.clone(),
            bindir: config.bindir.clone(),
            mandir: config.mandir(),
        }
    }

    fn target_for(&self, artifact: &Artifact, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid artifact source: {}", source.display()))?;

        let target = match artifact {
            Artifact::App { target, .. } => match target {
                Some(t) => self.appdir.join(t),
                None => self.appdir.join(file_name),
            },
            Artifact::Binary { target, .. } => match target {
                Some(t) => self.bindir.join(t),
                None => self.bindir.join(file_name),
            },
            Artifact::Manpage { .. } => {
                let section = manpage_section(source).ok_or_else(|| {
                    anyhow::anyhow!("Unable to determine manpage section: {}", source.display())
                })?;
                self.mandir.join(format!("man{}", section)).join(file_name)
            }
            Artifact::Artifact { target, .. } => {
                let target = PathBuf::from(target);
                if !target.is_absolute() {
                    bail!("Artifact target must be absolute: {}", target.display());
                }
                target
            }
        };
        Ok(target)
    }
}

impl ArtifactInstaller for FsArtifactInstaller {
    fn install(&self, artifact: &Artifact, staged_root: &Path) -> Result<InstalledArtifact> {
        let source = staged_root.join(artifact.source());
        if source.symlink_metadata().is_err() {
            bail!(
                "It seems the {} source '{}' is not there",
                artifact.label(),
                source.display()
            );
        }

        let target = self.target_for(artifact, &source)?;
        if target.symlink_metadata().is_ok() {
            bail!(
                "It seems there is already a {} at '{}'",
                artifact.label(),
                target.display()
            );
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let placement = match artifact {
            Artifact::App { .. } => {
                move_path(&source, &target)?;
                Placement::Moved
            }
            Artifact::Binary { .. } | Artifact::Manpage { .. } => {
                unix_fs::symlink(&source, &target).with_context(|| {
                    format!(
                        "Failed to link {} -> {}",
                        target.display(),
                        source.display()
                    )
                })?;
                Placement::Symlinked
            }
            Artifact::Artifact { .. } => {
                copy_path(&source, &target)?;
                Placement::Copied
            }
        };

        tracing::debug!(
            "Installed {} {} -> {}",
            artifact.label(),
            source.display(),
            target.display()
        );
        Ok(InstalledArtifact {
            label: artifact.label().to_string(),
            source,
            target,
            placement,
        })
    }

    fn uninstall(&self, installed: &InstalledArtifact) -> Result<()> {
        let target = &installed.target;
        let Ok(meta) = target.symlink_metadata() else {
            tracing::warn!("{} already removed: {}", installed.label, target.display());
            return Ok(());
        };

        match installed.placement {
            Placement::Symlinked if !meta.file_type().is_symlink() => {
                bail!(
                    "Refusing to remove {}: it is no longer a symlink",
                    target.display()
                );
            }
            _ => remove_path(target)?,
        }

        tracing::debug!("Removed {} {}", installed.label, target.display());
        Ok(())
    }
}

/// Manpage section from a `name.<section>` file name
fn manpage_section(source: &Path) -> Option<String> {
    let ext = source.extension()?.to_str()?;
    ext.chars()
        .next()
        .filter(|c| c.is_ascii_digit())
        .map(|_| ext.to_string())
}

/// Rename, falling back to copy and delete across filesystems
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_path(from, to)?;
    remove_path(from)
        .with_context(|| format!("Moved {} but failed to remove original", from.display()))
}

pub fn copy_path(from: &Path, to: &Path) -> Result<()> {
    let meta = from
        .symlink_metadata()
        .with_context(|| format!("Failed to stat {}", from.display()))?;

    if !meta.is_dir() {
        copy_entry(from, to, &meta)?;
        return Ok(());
    }

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let dest = to.join(relative);
        let meta = entry.path().symlink_metadata()?;

        if meta.is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            copy_entry(entry.path(), &dest, &meta)?;
        }
    }
    Ok(())
}

fn copy_entry(from: &Path, to: &Path, meta: &fs::Metadata) -> Result<()> {
    if meta.file_type().is_symlink() {
        let link = fs::read_link(from)?;
        unix_fs::symlink(link, to)?;
    } else {
        fs::copy(from, to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    }
    Ok(())
}

pub fn remove_path(path: &Path) -> Result<()> {
    let meta = path.symlink_metadata()?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))
}
