//! Symlink management for installed kegs.
//!
//! Linking a keg mirrors its `bin/`, `lib/`, `share/`... trees into the shared
//! prefix as relative symlinks, then records the linked keg in
//! `var/decant/linked/<name>`. Every keg, linked or keg-only, also gets an
//! `opt/<name>` link. The shared prefix is mutated only while a
//! [`PrefixLock`] is held; the link functions take the lock as an argument so
//! that callers cannot forget it.

use crate::config::Config;
use crate::error::DecantError;
use anyhow::{Context, Result, bail};
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

/// Directories to symlink from Cellar to prefix
const LINKABLE_DIRS: &[&str] = &[
    "bin",
    "sbin",
    "lib",
    "include",
    "share",
    "etc",
    "Frameworks",
];

/// Shared prefix directories that stay even when no keg links into them
const KEPT_DIRS: &[&str] = &[
    "etc/bash_completion.d",
    "lib/pkgconfig",
    "share/doc",
    "share/fish",
    "share/fish/vendor_completions.d",
    "share/info",
    "share/locale",
    "share/man",
    "share/man/man1",
    "share/man/man2",
    "share/man/man3",
    "share/man/man4",
    "share/man/man5",
    "share/man/man6",
    "share/man/man7",
    "share/man/man8",
    "share/zsh",
    "share/zsh/site-functions",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    /// Only `opt/<name>` points at the keg (keg-only formulae)
    OptLinked,
    Linked,
}

/// Exclusive advisory lock over the shared prefix
#[derive(Debug)]
pub struct PrefixLock {
    file: File,
    path: PathBuf,
}

impl PrefixLock {
    /// Block until the prefix lock is available
    pub fn acquire(config: &Config) -> std::result::Result<Self, DecantError> {
        let dir = config.locks_dir();
        let path = dir.join("prefix.lock");
        let lock_error = |e: std::io::Error| DecantError::Lock {
            path: path.clone(),
            message: e.to_string(),
        };

        fs::create_dir_all(&dir).map_err(lock_error)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_error)?;
        file.lock().map_err(lock_error)?;

        tracing::debug!("Acquired prefix lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

/// Lexically normalize a path, resolving `.` and `..` without touching the
/// filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Relative path that leads from directory `from` to `to`
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    relative
}

/// Create symlinks for a keg into the prefix
pub fn link_keg(
    config: &Config,
    name: &str,
    version: &str,
    _lock: &PrefixLock,
) -> Result<Vec<PathBuf>> {
    let keg = config.keg_path(name, version);
    let mut linked_files = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        if !source_dir.is_dir() {
            continue;
        }

        let target_dir = config.prefix.join(dir_name);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create directory: {}", target_dir.display()))?;

        link_directory(&source_dir, &target_dir, &mut linked_files)?;
    }

    let marker_dir = config.linked_dir();
    fs::create_dir_all(&marker_dir)?;
    replace_symlink(&keg, &marker_dir.join(name))?;

    tracing::debug!("Linked {} files for {} {}", linked_files.len(), name, version);
    Ok(linked_files)
}

fn link_directory(source: &Path, target: &Path, linked_files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());

        if source_path.is_dir() && !source_path.is_symlink() {
            if !target_path.exists() {
                fs::create_dir_all(&target_path)?;
            }
            link_directory(&source_path, &target_path, linked_files)?;
        } else if create_relative_symlink(&source_path, &target_path)? {
            linked_files.push(target_path);
        }
    }

    Ok(())
}

/// Returns `false` when the link already existed
fn create_relative_symlink(source: &Path, target: &Path) -> Result<bool> {
    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid link target: {}", target.display()))?;
    let relative_source = relative_path(parent, source);

    if target.symlink_metadata().is_ok() {
        if let Ok(existing) = fs::read_link(target)
            && normalize_path(&parent.join(&existing)) == normalize_path(source)
        {
            return Ok(false);
        }
        bail!(
            "Could not symlink {}: target already exists and is not owned by this keg",
            target.display()
        );
    }

    unix_fs::symlink(&relative_source, target).with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            target.display(),
            relative_source.display()
        )
    })?;

    Ok(true)
}

/// Remove every prefix symlink that points into the keg
pub fn unlink_keg(
    config: &Config,
    name: &str,
    version: &str,
    _lock: &PrefixLock,
) -> Result<Vec<PathBuf>> {
    let keg = config.keg_path(name, version);
    let mut unlinked_files = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        let target_dir = config.prefix.join(dir_name);

        if !source_dir.is_dir() || !target_dir.is_dir() {
            continue;
        }

        unlink_directory(&source_dir, &target_dir, &keg, &config.prefix, &mut unlinked_files)?;
    }

    let marker = config.linked_dir().join(name);
    if points_into(&marker, &keg) {
        fs::remove_file(&marker)?;
    }

    tracing::debug!("Unlinked {} files for {} {}", unlinked_files.len(), name, version);
    Ok(unlinked_files)
}

fn unlink_directory(
    source: &Path,
    target: &Path,
    keg: &Path,
    prefix: &Path,
    unlinked_files: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());

        if source_path.is_dir() && !source_path.is_symlink() {
            if target_path.is_dir() && !target_path.is_symlink() {
                let before = unlinked_files.len();
                unlink_directory(&source_path, &target_path, keg, prefix, unlinked_files)?;
                // Only directories this keg's links emptied, never standard ones
                if unlinked_files.len() > before
                    && !is_kept_dir(&target_path, prefix)
                    && fs::read_dir(&target_path)?.next().is_none()
                {
                    fs::remove_dir(&target_path)?;
                }
            }
        } else if points_into(&target_path, keg) {
            fs::remove_file(&target_path)?;
            unlinked_files.push(target_path);
        }
    }

    Ok(())
}

fn is_kept_dir(dir: &Path, prefix: &Path) -> bool {
    dir.strip_prefix(prefix)
        .is_ok_and(|relative| KEPT_DIRS.iter().any(|kept| relative == Path::new(kept)))
}

fn points_into(link: &Path, dir: &Path) -> bool {
    let Ok(link_target) = fs::read_link(link) else {
        return false;
    };
    let resolved = match link.parent() {
        Some(parent) if link_target.is_relative() => parent.join(&link_target),
        _ => link_target,
    };
    normalize_path(&resolved).starts_with(normalize_path(dir))
}

fn replace_symlink(source: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)
            .with_context(|| format!("Failed to replace link: {}", link.display()))?;
    }
    let parent = link
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid link path: {}", link.display()))?;
    unix_fs::symlink(relative_path(parent, source), link)
        .with_context(|| format!("Failed to create link: {}", link.display()))
}

/// Point `opt/<name>` at this keg
pub fn optlink(config: &Config, name: &str, version: &str, _lock: &PrefixLock) -> Result<()> {
    let opt_dir = config.opt_dir();
    fs::create_dir_all(&opt_dir)?;
    replace_symlink(&config.keg_path(name, version), &opt_dir.join(name))
}

/// Remove `opt/<name>` if it points at this keg
pub fn unoptlink(config: &Config, name: &str, version: &str, _lock: &PrefixLock) -> Result<()> {
    let opt = config.opt_dir().join(name);
    if points_into(&opt, &config.keg_path(name, version)) {
        fs::remove_file(&opt)?;
    }
    Ok(())
}

/// Version directory `opt/<name>` currently points at
pub fn linked_version(config: &Config, name: &str) -> Option<String> {
    let target = fs::read_link(config.opt_dir().join(name)).ok()?;
    target
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

pub fn link_state(config: &Config, name: &str, version: &str) -> LinkState {
    let keg = config.keg_path(name, version);
    if points_into(&config.linked_dir().join(name), &keg) {
        LinkState::Linked
    } else if points_into(&config.opt_dir().join(name), &keg) {
        LinkState::OptLinked
    } else {
        LinkState::Unlinked
    }
}
