//! On-disk installation state, shared by formulae and casks.
//!
//! Nothing here is cached: every query re-reads the Cellar and Caskroom, which
//! remain the only source of truth.
//!
//! ```text
//! absent --stage--> staged --link--> linked
//!    ^                 |  <--unlink--   |
//!    +----uninstall----+----------------+
//! ```
//!
//! `pinned` is an orthogonal marker file under `var/decant/pinned/<kind>/`.
//! `outdated` is never stored; it is derived from the package index.

use crate::artifact::ArtifactInstaller;
use crate::caskroom;
use crate::cellar;
use crate::config::Config;
use crate::download::sha256_file;
use crate::error::{DecantError, Result};
use crate::graph::DependencyResolver;
use crate::package::{Package, PackageId, PackageKind};
use crate::symlink::{self, LinkState, PrefixLock};
use crate::version::{PkgVersion, VersionComparator};
use anyhow::Context;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Absent,
    Staged,
    Linked,
}

/// One installed version of a package
#[derive(Debug, Clone)]
pub struct InstallationRecord {
    pub id: PackageId,
    pub version: PkgVersion,
    pub path: PathBuf,
    pub state: InstallState,
    pub link: LinkState,
    pub pinned: bool,
    pub installed_on_request: bool,
    pub used_options: Vec<String>,
}

/// Which packages are eligible for outdated detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutdatedPolicy {
    pub greedy: bool,
    pub greedy_latest: bool,
    pub greedy_auto_updates: bool,
}

impl OutdatedPolicy {
    pub fn considers(&self, package: &Package) -> bool {
        if self.greedy {
            return true;
        }
        if package.auto_updates && !self.greedy_auto_updates {
            return false;
        }
        if package.version.is_latest() && !self.greedy_latest {
            return false;
        }
        true
    }

    /// Sentinel versions are only re-resolved when asked for greedily
    pub fn rechecks_sentinels(&self) -> bool {
        self.greedy || self.greedy_latest
    }
}

#[derive(Debug, Clone)]
pub struct OutdatedEntry {
    pub record: InstallationRecord,
    pub latest: Package,
}

/// What a prefix entry looked like, for before/after comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySnapshot {
    Dir,
    File { sha256: String },
    Symlink { target: PathBuf },
}

pub struct Tracker<'a> {
    config: &'a Config,
}

impl<'a> Tracker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn pin_path(&self, id: &PackageId) -> PathBuf {
        self.config
            .pins_dir()
            .join(id.kind.to_string())
            .join(&id.name)
    }

    /// The active installed version: the linked keg if any, else the newest
    pub fn installed(&self, id: &PackageId) -> Result<Option<InstallationRecord>> {
        match id.kind {
            PackageKind::Formula => self.installed_formula(id),
            PackageKind::Cask => self.installed_cask(id),
        }
    }

    fn installed_formula(&self, id: &PackageId) -> Result<Option<InstallationRecord>> {
        let kegs = cellar::installed_kegs(self.config, &id.name)?;
        let linked = symlink::linked_version(self.config, &id.name);
        let keg = linked
            .and_then(|v| kegs.iter().find(|k| k.version.to_string() == v))
            .or_else(|| kegs.first());

        let Some(keg) = keg else {
            return Ok(None);
        };

        let version = keg.version.to_string();
        let link = symlink::link_state(self.config, &id.name, &version);
        let state = match link {
            LinkState::Unlinked => InstallState::Staged,
            LinkState::OptLinked | LinkState::Linked => InstallState::Linked,
        };

        Ok(Some(InstallationRecord {
            id: record_id(id, keg.receipt.as_ref().and_then(|r| r.source.as_ref()).map(|s| s.tap.as_str())),
            version: keg.version.clone(),
            path: keg.path.clone(),
            state,
            link,
            pinned: self.is_pinned(id),
            installed_on_request: keg.installed_on_request(),
            used_options: keg.used_options(),
        }))
    }

    fn installed_cask(&self, id: &PackageId) -> Result<Option<InstallationRecord>> {
        let Some(cask) = caskroom::installed_cask(self.config, &id.name)? else {
            return Ok(None);
        };

        Ok(Some(InstallationRecord {
            id: record_id(id, cask.snapshot.as_ref().map(|p| p.id.tap.as_str())),
            installed_on_request: cask.installed_on_request(),
            used_options: Vec::new(),
            version: cask.version,
            path: cask.staged_path,
            // Casks install artifacts directly
            state: InstallState::Linked,
            link: LinkState::Linked,
            pinned: self.is_pinned(id),
        }))
    }

    /// Every installed package, formulae first
    pub fn installed_all(&self) -> Result<Vec<InstallationRecord>> {
        let mut names: Vec<String> = cellar::list_kegs(self.config)?
            .into_iter()
            .map(|keg| keg.name)
            .collect();
        names.dedup();

        let mut records = Vec::new();
        for name in names {
            if let Some(record) = self.installed(&PackageId::formula(name))? {
                records.push(record);
            }
        }
        for cask in caskroom::list_casks(self.config)? {
            if let Some(record) = self.installed(&PackageId::cask(cask.token))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// An installed version at or above `version`, if any. A formula's
    /// newer keg counts even when an older one is the linked keg.
    pub fn installed_at_least(
        &self,
        id: &PackageId,
        version: &PkgVersion,
        comparator: &dyn VersionComparator,
    ) -> Result<Option<PkgVersion>> {
        let installed: Vec<PkgVersion> = match id.kind {
            PackageKind::Formula => cellar::installed_kegs(self.config, &id.name)?
                .into_iter()
                .map(|keg| keg.version)
                .collect(),
            PackageKind::Cask => self.installed(id)?.into_iter().map(|r| r.version).collect(),
        };

        Ok(installed
            .into_iter()
            .find(|v| comparator.compare(v, version) != Ordering::Less))
    }

    pub fn is_pinned(&self, id: &PackageId) -> bool {
        self.pin_path(id).exists()
    }

    /// Pin the installed version. Pinning twice is a no-op.
    pub fn pin(&self, id: &PackageId) -> Result<()> {
        let record = self
            .installed(id)?
            .ok_or_else(|| DecantError::NotInstalled(id.to_string()))?;

        let path = self.pin_path(id);
        if path.exists() {
            tracing::debug!("{} is already pinned", id);
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, record.version.to_string())
            .with_context(|| format!("Failed to write pin: {}", path.display()))?;
        Ok(())
    }

    /// Returns whether a pin was removed
    pub fn unpin(&self, id: &PackageId) -> Result<bool> {
        let path = self.pin_path(id);
        if !path.exists() {
            tracing::warn!("{} is not pinned", id);
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    /// Installed packages behind the index, filtered by `policy`
    pub fn outdated(
        &self,
        resolver: &dyn DependencyResolver,
        policy: OutdatedPolicy,
        comparator: &dyn VersionComparator,
    ) -> Result<Vec<OutdatedEntry>> {
        let mut outdated = Vec::new();

        for record in self.installed_all()? {
            let latest = match resolver.resolve(&record.id) {
                Ok(pkg) => pkg,
                Err(DecantError::Resolution { .. }) => {
                    tracing::warn!("No definition for installed package {}", record.id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !policy.considers(&latest) {
                tracing::debug!("Skipping {} (auto-updates or latest)", record.id);
                continue;
            }

            if let Some(current) = self.installed_at_least(&record.id, &latest.version, comparator)? {
                tracing::debug!("{} {} is already installed", record.id, current);
                continue;
            }
            outdated.push(OutdatedEntry { record, latest });
        }

        Ok(outdated)
    }

    /// staged -> linked. Keg-only formulae only get their opt link.
    pub fn link(&self, name: &str, version: &str, keg_only: bool, lock: &PrefixLock) -> Result<()> {
        symlink::optlink(self.config, name, version, lock)?;
        if !keg_only {
            symlink::link_keg(self.config, name, version, lock)?;
        }
        Ok(())
    }

    /// linked -> staged. The opt link survives.
    pub fn unlink(&self, name: &str, version: &str, lock: &PrefixLock) -> Result<()> {
        symlink::unlink_keg(self.config, name, version, lock)?;
        Ok(())
    }

    /// staged/linked -> absent
    pub fn uninstall(
        &self,
        id: &PackageId,
        version: &str,
        artifacts: &dyn ArtifactInstaller,
        lock: &PrefixLock,
    ) -> Result<()> {
        let remaining_dir = match id.kind {
            PackageKind::Formula => {
                let keg = self.config.keg_path(&id.name, version);
                if !keg.exists() {
                    return Err(DecantError::NotInstalled(format!("{} {}", id, version)));
                }
                self.unlink(&id.name, version, lock)?;
                symlink::unoptlink(self.config, &id.name, version, lock)?;
                fs::remove_dir_all(&keg)
                    .with_context(|| format!("Failed to remove {}", keg.display()))?;
                self.config.cellar.join(&id.name)
            }
            PackageKind::Cask => {
                let staged = self.config.cask_version_path(&id.name, version);
                if !staged.exists() {
                    return Err(DecantError::NotInstalled(format!("{} {}", id, version)));
                }
                for record in caskroom::read_artifacts(self.config, &id.name, version)?.iter().rev() {
                    artifacts.uninstall(record)?;
                }
                fs::remove_dir_all(&staged)?;
                let metadata = caskroom::metadata_path(self.config, &id.name, version);
                if metadata.exists() {
                    fs::remove_dir_all(&metadata)?;
                }
                self.config.caskroom.join(&id.name)
            }
        };

        prune_empty(&remaining_dir);
        if self.installed(id)?.is_none() {
            let pin = self.pin_path(id);
            if pin.exists() {
                fs::remove_file(pin)?;
            }
        }
        Ok(())
    }

    /// Content-addressed view of every entry under the prefix
    pub fn snapshot(&self) -> Result<BTreeMap<PathBuf, EntrySnapshot>> {
        let mut entries = BTreeMap::new();
        if !self.config.prefix.exists() {
            return Ok(entries);
        }

        for entry in WalkDir::new(&self.config.prefix).follow_links(false) {
            let entry = entry.map_err(|e| anyhow::anyhow!(e))?;
            let path = entry.path();
            let file_type = entry.file_type();

            let snapshot = if file_type.is_symlink() {
                EntrySnapshot::Symlink {
                    target: fs::read_link(path)?,
                }
            } else if file_type.is_dir() {
                EntrySnapshot::Dir
            } else {
                EntrySnapshot::File {
                    sha256: sha256_file(path)?,
                }
            };
            entries.insert(path.to_path_buf(), snapshot);
        }
        Ok(entries)
    }
}

fn record_id(id: &PackageId, tap: Option<&str>) -> PackageId {
    match tap {
        Some(tap) => PackageId::new(id.kind, tap, id.name.clone()),
        None => id.clone(),
    }
}

/// Remove `dir` and its hidden bookkeeping if nothing installed remains
fn prune_empty(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let visible = entries
        .filter_map(|e| e.ok())
        .any(|e| !e.file_name().to_string_lossy().starts_with('.'));
    if !visible && let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!("Failed to remove {}: {}", dir.display(), e);
    }
}
