//! Per-package installer state machine.
//!
//! ```text
//! Created -> CheckedConflicts -> Fetched -> Staged -> ArtifactsInstalled
//!                                              \-> RolledBack   (failure after staging)
//! Created -> Failed                              (conflict, fetch or stage failure)
//! ```
//!
//! Fetching happens for every package before any is installed, so conflicts
//! may equally be checked after the fetch. Staging refuses to run until
//! conflicts have been checked.
//!
//! An installer built with [`Installer::for_installed`] describes what is
//! already on disk. During an upgrade it moves that installation aside with
//! [`Installer::start_upgrade`] and later either deletes the backup
//! ([`Installer::finalize_upgrade`]) or puts it back
//! ([`Installer::revert_upgrade`]).

use crate::artifact::{self, ArtifactInstaller, InstalledArtifact};
use crate::caskroom;
use crate::config::Config;
use crate::download::{ChecksumVerifier, Downloader, FetchSpec};
use crate::error::{DecantError, Result};
use crate::extract;
use crate::lifecycle::{InstallationRecord, Tracker};
use crate::package::{Package, PackageId, PackageKind};
use crate::quarantine::{Provenance, QuarantineTagger};
use crate::receipt::{InstallReceipt, RuntimeDependency};
use crate::symlink::{self, LinkState, PrefixLock};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerState {
    Created,
    CheckedConflicts,
    Fetched,
    Staged,
    ArtifactsInstalled,
    RolledBack,
    Failed,
}

/// Collaborators shared by every installer in a run
#[derive(Clone, Copy)]
pub struct InstallContext<'a> {
    pub config: &'a Config,
    pub verifier: &'a dyn ChecksumVerifier,
    pub artifacts: &'a dyn ArtifactInstaller,
    pub tagger: &'a dyn QuarantineTagger,
}

#[derive(Debug, Clone, Default)]
pub struct InstallerOptions {
    /// The installer stands for a version being replaced
    pub upgrade: bool,
    pub force: bool,
    pub installed_on_request: bool,
    pub used_options: Vec<String>,
    /// Give the keg only its `opt/` link, as for a keg-only formula
    pub opt_link_only: bool,
}

/// An installation moved out of the way, restorable path by path
#[derive(Debug)]
struct UpgradeBackup {
    root: PathBuf,
    /// (original location, location aside), in the order they were moved
    moves: Vec<(PathBuf, PathBuf)>,
    link: LinkState,
}

pub struct Installer<'a> {
    package: Package,
    options: InstallerOptions,
    ctx: InstallContext<'a>,
    state: InstallerState,
    conflicts_checked: bool,
    fetched: Option<PathBuf>,
    provenance: Provenance,
    /// Versioned paths created by this installer, removed on purge
    created: Vec<PathBuf>,
    installed_artifacts: Vec<InstalledArtifact>,
    backup: Option<UpgradeBackup>,
}

impl<'a> Installer<'a> {
    pub fn new(package: Package, options: InstallerOptions, ctx: InstallContext<'a>) -> Self {
        let provenance = Provenance {
            url: package.source.as_ref().map(|s| s.url.clone()),
            homepage: package.homepage.clone(),
        };
        Self {
            package,
            options,
            ctx,
            state: InstallerState::Created,
            conflicts_checked: false,
            fetched: None,
            provenance,
            created: Vec::new(),
            installed_artifacts: Vec::new(),
            backup: None,
        }
    }

    /// Installer for what is currently on disk. `latest` supplies the
    /// definition for formulae; casks use their install-time snapshot.
    pub fn for_installed(
        record: &InstallationRecord,
        latest: &Package,
        ctx: InstallContext<'a>,
    ) -> Result<Self> {
        let options = InstallerOptions {
            upgrade: true,
            force: false,
            installed_on_request: record.installed_on_request,
            used_options: record.used_options.clone(),
            ..Default::default()
        };

        let (package, artifacts) = match record.id.kind {
            PackageKind::Formula => (latest.with_version(record.version.clone()), Vec::new()),
            PackageKind::Cask => {
                let version = record.version.to_string();
                let snapshot = caskroom::read_snapshot(ctx.config, &record.id.name, &version)?;
                let package = snapshot.unwrap_or_else(|| {
                    tracing::warn!("No snapshot for {} {}, using current definition", record.id, version);
                    latest.with_version(record.version.clone())
                });
                let artifacts = caskroom::read_artifacts(ctx.config, &record.id.name, &version)?;
                (package, artifacts)
            }
        };

        let mut installer = Self::new(package, options, ctx);
        installer.state = InstallerState::ArtifactsInstalled;
        installer.conflicts_checked = true;
        installer.installed_artifacts = artifacts;
        Ok(installer)
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn id(&self) -> &PackageId {
        &self.package.id
    }

    pub fn state(&self) -> InstallerState {
        self.state
    }

    pub fn options(&self) -> &InstallerOptions {
        &self.options
    }

    pub fn started_upgrade(&self) -> bool {
        self.backup.is_some()
    }

    fn require(&self, allowed: &[InstallerState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DecantError::install(
                &self.package.id,
                format!("cannot {} from state {:?}", operation, self.state),
            ))
        }
    }

    fn fail<T>(&mut self, error: DecantError) -> Result<T> {
        self.state = InstallerState::Failed;
        Err(as_install_error(&self.package.id, error))
    }

    pub fn check_conflicts(&mut self) -> Result<()> {
        self.require(
            &[
                InstallerState::Created,
                InstallerState::CheckedConflicts,
                InstallerState::Fetched,
            ],
            "check conflicts",
        )?;

        if !self.options.force {
            let tracker = Tracker::new(self.ctx.config);
            let mut conflict = None;
            for other in &self.package.conflicts_with {
                if tracker.installed(other)?.is_some() {
                    conflict = Some(other.to_string());
                    break;
                }
            }
            if let Some(conflicts_with) = conflict {
                let error = DecantError::Conflict {
                    package: self.package.id.to_string(),
                    conflicts_with,
                };
                return self.fail(error);
            }
        }

        self.conflicts_checked = true;
        if self.state == InstallerState::Created {
            self.state = InstallerState::CheckedConflicts;
        }
        Ok(())
    }

    /// Download into the cache. Leaves the installation untouched, so it can
    /// be retried.
    pub async fn fetch<D: Downloader>(&mut self, downloader: &D) -> Result<()> {
        self.require(
            &[
                InstallerState::Created,
                InstallerState::CheckedConflicts,
                InstallerState::Fetched,
            ],
            "fetch",
        )?;

        if let Some(spec) = FetchSpec::for_package(&self.package) {
            match downloader.fetch(&spec).await {
                Ok(path) => self.fetched = Some(path),
                Err(e) => {
                    self.state = InstallerState::Failed;
                    return Err(match e {
                        e @ (DecantError::Fetch { .. } | DecantError::Checksum { .. }) => e,
                        other => DecantError::fetch(&self.package.id, other),
                    });
                }
            }
        }

        self.state = InstallerState::Fetched;
        Ok(())
    }

    /// Verify and extract the fetched artifact into its versioned location
    pub fn stage(&mut self) -> Result<()> {
        self.require(&[InstallerState::Fetched], "stage")?;
        if !self.conflicts_checked {
            return Err(DecantError::install(
                &self.package.id,
                "conflicts must be checked before staging",
            ));
        }

        if let Err(e) = self.stage_inner() {
            if let Err(purge) = self.purge_versioned_files() {
                tracing::warn!("Failed to clean up {}: {}", self.package.id, purge);
            }
            return self.fail(e);
        }

        self.state = InstallerState::Staged;
        Ok(())
    }

    fn stage_inner(&mut self) -> Result<()> {
        if let (Some(archive), Some(source)) = (&self.fetched, &self.package.source)
            && let Some(expected) = &source.sha256
        {
            self.ctx.verifier.verify(archive, expected)?;
        }

        let config = self.ctx.config;
        let name = self.package.name().to_string();
        let version = self.package.version.to_string();

        let (staging_root, dest) = match self.package.kind() {
            PackageKind::Formula => (config.cellar.join(".staging"), config.keg_path(&name, &version)),
            PackageKind::Cask => (
                config.caskroom.join(".staging"),
                config.cask_version_path(&name, &version),
            ),
        };
        if dest.exists() {
            return Err(DecantError::install(
                &self.package.id,
                format!("{} {} is already installed", name, version),
            ));
        }

        let staging = staging_root.join(format!("{}-{}", name, version));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let result = self.extract_into(&staging, &dest, &name, &version);
        if staging.exists()
            && let Err(e) = fs::remove_dir_all(&staging)
        {
            tracing::warn!("Failed to remove {}: {}", staging.display(), e);
        }
        let _ = fs::remove_dir(&staging_root);
        result?;

        match self.package.kind() {
            PackageKind::Formula => self.receipt()?.write(&dest)?,
            PackageKind::Cask => self.ctx.tagger.tag(&dest, &self.provenance)?,
        }

        tracing::debug!("Staged {} at {}", self.package.id, dest.display());
        Ok(())
    }

    fn extract_into(&mut self, staging: &Path, dest: &Path, name: &str, version: &str) -> Result<()> {
        let root = match &self.fetched {
            Some(archive) => {
                extract::extract_to(archive, staging)?;
                match self.package.kind() {
                    PackageKind::Formula => extract::bottle_root(staging, name, version)?,
                    PackageKind::Cask => staging.to_path_buf(),
                }
            }
            None => {
                fs::create_dir_all(staging)?;
                staging.to_path_buf()
            }
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&root, dest)?;
        self.created.push(dest.to_path_buf());
        Ok(())
    }

    fn receipt(&self) -> Result<InstallReceipt> {
        let tracker = Tracker::new(self.ctx.config);
        let mut runtime_dependencies = Vec::new();
        for dependency in self.package.runtime_dependencies() {
            let pkg_version = tracker
                .installed(&dependency.id)?
                .map(|record| record.version.to_string())
                .unwrap_or_default();
            runtime_dependencies.push(RuntimeDependency {
                full_name: dependency.id.full_name(),
                pkg_version,
            });
        }

        let used_options = if self.options.used_options.is_empty() {
            self.package.default_options().to_vec()
        } else {
            self.options.used_options.clone()
        };

        Ok(InstallReceipt::for_package(
            &self.package,
            runtime_dependencies,
            self.options.installed_on_request,
            used_options,
        ))
    }

    /// Link the keg, or place the cask's artifacts. Undoes itself on failure;
    /// whatever could not be undone is left for the caller to retry.
    pub fn install_artifacts(&mut self, lock: &PrefixLock) -> Result<()> {
        self.require(&[InstallerState::Staged], "install artifacts")?;

        if let Err(original) = self.install_artifacts_inner(lock) {
            let cleanup = self
                .uninstall_artifacts(lock)
                .and_then(|()| self.purge_versioned_files());
            self.state = match cleanup {
                Ok(()) => InstallerState::RolledBack,
                Err(e) => {
                    tracing::warn!("Could not undo {}: {}", self.package.id, e);
                    InstallerState::Failed
                }
            };
            return Err(as_install_error(&self.package.id, original));
        }

        self.state = InstallerState::ArtifactsInstalled;
        tracing::debug!("Installed artifacts for {}", self.package.id);
        Ok(())
    }

    fn install_artifacts_inner(&mut self, lock: &PrefixLock) -> Result<()> {
        let config = self.ctx.config;
        let name = self.package.name().to_string();
        let version = self.package.version.to_string();

        match self.package.kind() {
            PackageKind::Formula => {
                let opt_only = self.package.keg_only() || self.options.opt_link_only;
                Tracker::new(config).link(&name, &version, opt_only, lock)?;
            }
            PackageKind::Cask => {
                let staged = config.cask_version_path(&name, &version);
                for declared in self.package.artifacts() {
                    let record = self.ctx.artifacts.install(declared, &staged)?;
                    self.installed_artifacts.push(record);
                }

                let metadata = caskroom::metadata_path(config, &name, &version);
                self.created.push(metadata.clone());
                caskroom::write_snapshot(config, &self.package)?;
                caskroom::write_artifacts(config, &name, &version, &self.installed_artifacts)?;
                self.receipt()?.write(&metadata)?;
            }
        }
        Ok(())
    }

    /// Inverse of [`Installer::install_artifacts`]. Safe to call repeatedly.
    pub fn uninstall_artifacts(&mut self, lock: &PrefixLock) -> Result<()> {
        let config = self.ctx.config;
        let name = self.package.name().to_string();
        let version = self.package.version.to_string();

        match self.package.kind() {
            PackageKind::Formula => {
                // Only a keg this installer staged; an in-place reinstall
                // shares the path with the installation being replaced
                let keg = config.keg_path(&name, &version);
                if self.created.contains(&keg) && keg.exists() {
                    symlink::unlink_keg(config, &name, &version, lock)?;
                    symlink::unoptlink(config, &name, &version, lock)?;
                }
            }
            PackageKind::Cask => {
                while let Some(record) = self.installed_artifacts.pop() {
                    if let Err(e) = self.ctx.artifacts.uninstall(&record) {
                        self.installed_artifacts.push(record);
                        return Err(as_install_error(&self.package.id, e.into()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove every versioned path this installer created. Never touches an
    /// installation it did not create.
    pub fn purge_versioned_files(&mut self) -> Result<()> {
        while let Some(path) = self.created.pop() {
            if path.exists()
                && let Err(e) = fs::remove_dir_all(&path)
            {
                self.created.push(path);
                return Err(e.into());
            }
            // Drop now-empty parents such as `Cellar/<name>` or `.metadata`
            let mut parent = path.parent();
            while let Some(dir) = parent {
                if dir == self.ctx.config.cellar
                    || dir == self.ctx.config.caskroom
                    || fs::remove_dir(dir).is_err()
                {
                    break;
                }
                parent = dir.parent();
            }
        }

        if matches!(
            self.state,
            InstallerState::Staged | InstallerState::ArtifactsInstalled
        ) {
            self.state = InstallerState::RolledBack;
        }
        Ok(())
    }

    /// Move the current installation aside so the new version can take its
    /// place. Nothing is deleted until [`Installer::finalize_upgrade`].
    pub fn start_upgrade(&mut self, lock: &PrefixLock) -> Result<()> {
        self.require(&[InstallerState::ArtifactsInstalled], "start upgrade")?;
        if self.backup.is_some() {
            return Ok(());
        }

        let config = self.ctx.config;
        let name = self.package.name().to_string();
        let version = self.package.version.to_string();

        let (root, planned, link) = match self.package.kind() {
            PackageKind::Formula => {
                let root = config.cellar.join(".upgrade").join(&name);
                let keg = config.keg_path(&name, &version);
                let link = symlink::link_state(config, &name, &version);
                (root.clone(), vec![(keg, root.join(&version))], link)
            }
            PackageKind::Cask => {
                let root = config.caskroom.join(&name).join(".upgrade").join(&version);
                let mut planned = Vec::new();
                for (index, record) in self.installed_artifacts.iter().enumerate() {
                    if record.target.symlink_metadata().is_ok() {
                        let file_name = record
                            .target
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        let aside = root.join("artifacts").join(format!("{}-{}", index, file_name));
                        planned.push((record.target.clone(), aside));
                    }
                }
                planned.push((config.cask_version_path(&name, &version), root.join("staged")));
                planned.push((caskroom::metadata_path(config, &name, &version), root.join("metadata")));
                (root, planned, LinkState::Linked)
            }
        };

        if let Some((_, stale)) = planned.iter().find(|(_, aside)| aside.symlink_metadata().is_ok()) {
            return Err(DecantError::install(
                &self.package.id,
                format!("a previous upgrade left a backup at {}", stale.display()),
            ));
        }

        if self.package.kind() == PackageKind::Formula && link != LinkState::Unlinked {
            symlink::unlink_keg(config, &name, &version, lock)?;
            symlink::unoptlink(config, &name, &version, lock)?;
        }

        let mut backup = UpgradeBackup {
            root,
            moves: Vec::new(),
            link,
        };
        for (original, aside) in planned {
            if !original.exists() && original.symlink_metadata().is_err() {
                continue;
            }
            let moved = aside
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .map_err(anyhow::Error::from)
                .and_then(|()| artifact::move_path(&original, &aside));

            if let Err(e) = moved {
                // Put back what already moved, then the links. A backup that
                // cannot be restored stays in place for the caller to retry.
                self.backup = Some(backup);
                if let Err(restore) = self.revert_upgrade(lock) {
                    tracing::warn!("Could not restore {}: {}", self.package.id, restore);
                }
                return Err(DecantError::install(&self.package.id, format!("{e:#}")));
            }
            backup.moves.push((original, aside));
        }

        tracing::debug!("Moved {} {} aside", self.package.id, version);
        self.backup = Some(backup);
        Ok(())
    }

    /// Restore the installation moved aside by [`Installer::start_upgrade`].
    ///
    /// Runs to completion regardless of interrupts.
    pub fn revert_upgrade(&mut self, lock: &PrefixLock) -> Result<()> {
        let Some(mut backup) = self.backup.take() else {
            return Ok(());
        };

        let config = self.ctx.config;
        let name = self.package.name().to_string();
        let version = self.package.version.to_string();

        while let Some((original, aside)) = backup.moves.pop() {
            let restored = if original.symlink_metadata().is_ok() {
                Err(anyhow::anyhow!("{} is occupied", original.display()))
            } else {
                original
                    .parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .map_err(anyhow::Error::from)
                    .and_then(|()| artifact::move_path(&aside, &original))
            };
            if let Err(e) = restored {
                backup.moves.push((original, aside));
                self.backup = Some(backup);
                return Err(DecantError::install(&self.package.id, format!("{e:#}")));
            }
        }

        if self.package.kind() == PackageKind::Formula {
            let relink = match backup.link {
                LinkState::Linked => Tracker::new(config).link(&name, &version, false, lock),
                LinkState::OptLinked => Tracker::new(config).link(&name, &version, true, lock),
                LinkState::Unlinked => Ok(()),
            };
            if let Err(e) = relink {
                // Everything is back in place but the links; a retry relinks
                self.backup = Some(backup);
                return Err(as_install_error(&self.package.id, e));
            }
        }

        remove_backup_dirs(&backup.root);
        tracing::debug!("Restored {} {}", self.package.id, version);
        Ok(())
    }

    /// Delete the installation moved aside by [`Installer::start_upgrade`]
    pub fn finalize_upgrade(&mut self) -> Result<()> {
        let Some(backup) = self.backup.take() else {
            return Ok(());
        };

        for (_, aside) in &backup.moves {
            if aside.symlink_metadata().is_ok() {
                artifact::remove_path(aside)?;
            }
        }
        remove_backup_dirs(&backup.root);

        // The new version's receipt, snapshot and links replace these
        self.installed_artifacts.clear();
        tracing::debug!("Removed previous {} {}", self.package.id, self.package.version);
        Ok(())
    }
}

/// Remove empty backup directories up to and including `.upgrade`
fn remove_backup_dirs(root: &Path) {
    let mut dir = Some(root);
    while let Some(current) = dir {
        let is_upgrade_dir = current.file_name().is_some_and(|n| n == ".upgrade");
        let _ = fs::remove_dir(current.join("artifacts"));
        if fs::remove_dir(current).is_err() || is_upgrade_dir {
            break;
        }
        dir = current.parent();
    }
}

/// Attribute untyped failures to the package being installed
fn as_install_error(id: &PackageId, error: DecantError) -> DecantError {
    match error {
        DecantError::Other(e) => DecantError::install(id, format!("{e:#}")),
        DecantError::Io(e) => DecantError::install(id, e),
        other => other,
    }
}
