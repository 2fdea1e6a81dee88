//! Upgrade orchestration.
//!
//! 1. Resolve targets: every outdated installed package, or exactly the named
//!    ones.
//! 2. Set pinned packages aside.
//! 3. Pair an installer for what is on disk with one for the new version,
//!    adding outdated or missing runtime dependencies.
//! 4. Fetch every new version concurrently.
//! 5. Under the prefix lock, install in dependency order, swapping each old
//!    installation for the new one or restoring it on failure.
//!
//! A package's failure is recorded and the run moves on; only resolution
//! errors, dependency cycles and the prefix lock abort the whole run.

use crate::artifact::{ArtifactInstaller, FsArtifactInstaller};
use crate::config::Config;
use crate::download::{ChecksumVerifier, Downloader, Sha256Verifier};
use crate::error::{DecantError, Result};
use crate::graph::{DependencyResolver, TopologicalHash, build_graph};
use crate::installer::{InstallContext, Installer, InstallerOptions};
use crate::interrupt::Interrupt;
use crate::lifecycle::{InstallationRecord, OutdatedPolicy, Tracker};
use crate::package::{Package, PackageId, PackageKind};
use crate::quarantine::{QuarantineTagger, default_tagger};
use crate::reporter::{ConsoleReporter, Messages, Reporter};
use crate::symlink::{LinkState, PrefixLock};
use crate::version::{DefaultComparator, PkgVersion};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub force: bool,
    pub dry_run: bool,
    pub greedy: bool,
    pub greedy_latest: bool,
    pub greedy_auto_updates: bool,
    pub ignore_pinned: bool,
    pub skip_dependencies: bool,
    pub skip_cask_deps: bool,
}

impl UpgradeOptions {
    pub fn policy(&self) -> OutdatedPolicy {
        OutdatedPolicy {
            greedy: self.greedy,
            greedy_latest: self.greedy_latest,
            greedy_auto_updates: self.greedy_auto_updates,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Upgraded { from: PkgVersion, to: PkgVersion },
    /// A missing dependency installed along the way
    Installed { version: PkgVersion },
    WouldUpgrade { from: PkgVersion, to: PkgVersion },
    WouldInstall { version: PkgVersion },
    UpToDate { version: PkgVersion },
    SkippedPinned { version: PkgVersion },
    Failed(DecantError),
}

impl Outcome {
    /// The package got (or in a dry run would get) its new version
    pub fn proceeded(&self) -> bool {
        matches!(
            self,
            Outcome::Upgraded { .. }
                | Outcome::Installed { .. }
                | Outcome::WouldUpgrade { .. }
                | Outcome::WouldInstall { .. }
        )
    }
}

#[derive(Debug)]
pub struct PackageOutcome {
    pub id: PackageId,
    /// Named on the command line, or selected as outdated
    pub requested: bool,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct UpgradeReport {
    pub outcomes: Vec<PackageOutcome>,
    pub ignore_pinned: bool,
    pub messages: Messages,
}

impl UpgradeReport {
    fn record(&mut self, id: PackageId, requested: bool, outcome: Outcome) {
        self.outcomes.push(PackageOutcome {
            id,
            requested,
            outcome,
        });
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.id.name == name)
            .map(|o| &o.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PackageId, &DecantError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(e) => Some((&o.id, e)),
            _ => None,
        })
    }

    /// 0 unless a requested package failed, or every candidate was pinned
    pub fn exit_code(&self) -> i32 {
        let requested_failed = self
            .outcomes
            .iter()
            .any(|o| o.requested && matches!(o.outcome, Outcome::Failed(_)));
        if requested_failed {
            return 1;
        }

        let pinned = self
            .outcomes
            .iter()
            .any(|o| matches!(o.outcome, Outcome::SkippedPinned { .. }));
        let proceeded = self.outcomes.iter().any(|o| o.outcome.proceeded());
        if pinned && !proceeded && !self.ignore_pinned {
            return 1;
        }
        0
    }
}

/// A package selected for this run
struct Candidate {
    latest: Package,
    installed: Option<InstallationRecord>,
    requested: bool,
}

/// Old and new installers for one package
struct UpgradePair<'a> {
    new: Installer<'a>,
    old: Option<Installer<'a>>,
    requested: bool,
    fetch_error: Option<DecantError>,
}

pub struct Upgrader<'a, D: Downloader> {
    config: &'a Config,
    resolver: &'a dyn DependencyResolver,
    downloader: &'a D,
    verifier: Box<dyn ChecksumVerifier + 'a>,
    artifacts: Box<dyn ArtifactInstaller + 'a>,
    tagger: Box<dyn QuarantineTagger + 'a>,
    reporter: Box<dyn Reporter + 'a>,
    interrupt: Interrupt,
}

impl<'a, D: Downloader> Upgrader<'a, D> {
    pub fn new(config: &'a Config, resolver: &'a dyn DependencyResolver, downloader: &'a D) -> Self {
        Self {
            config,
            resolver,
            downloader,
            verifier: Box::new(Sha256Verifier),
            artifacts: Box::new(FsArtifactInstaller::new(config)),
            tagger: default_tagger(),
            reporter: Box::new(ConsoleReporter::default()),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: impl ChecksumVerifier + 'a) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn with_artifacts(mut self, artifacts: impl ArtifactInstaller + 'a) -> Self {
        self.artifacts = Box::new(artifacts);
        self
    }

    pub fn with_tagger(mut self, tagger: impl QuarantineTagger + 'a) -> Self {
        self.tagger = Box::new(tagger);
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'a) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    fn context(&self) -> InstallContext<'_> {
        InstallContext {
            config: self.config,
            verifier: self.verifier.as_ref(),
            artifacts: self.artifacts.as_ref(),
            tagger: self.tagger.as_ref(),
        }
    }

    pub async fn upgrade(&self, targets: &[String], options: &UpgradeOptions) -> Result<UpgradeReport> {
        let tracker = Tracker::new(self.config);
        let mut report = UpgradeReport {
            ignore_pinned: options.ignore_pinned,
            ..Default::default()
        };

        // 1. Targets
        let candidates = self.select_targets(&tracker, targets, options, &mut report)?;

        // 2. Pinned packages stay as they are
        let mut selected = Vec::new();
        for candidate in candidates {
            let pinned = candidate
                .installed
                .as_ref()
                .filter(|record| record.pinned)
                .map(|record| record.version.clone());
            let Some(version) = pinned else {
                selected.push(candidate);
                continue;
            };

            tracing::info!("Not upgrading pinned {}", candidate.latest.id);
            report.record(
                candidate.latest.id,
                candidate.requested,
                Outcome::SkippedPinned { version },
            );
        }
        if selected.is_empty() {
            return Ok(report);
        }

        // 3. Dependencies and ordering
        let roots: Vec<Package> = selected.iter().map(|c| c.latest.clone()).collect();
        let graph = build_graph(&roots, self.resolver)?;
        if !options.skip_dependencies {
            let before = selected.len();
            self.add_dependencies(&tracker, &graph, options, &mut selected)?;
            let added = selected.len() - before;
            if added > 0 {
                let names: Vec<String> = selected[before..]
                    .iter()
                    .map(|c| c.latest.id.to_string())
                    .collect();
                report.messages.notice(format!(
                    "Also handling {} dependenc{}: {}",
                    added,
                    if added == 1 { "y" } else { "ies" },
                    names.join(", ")
                ));
            }
        }

        let ids: HashSet<PackageId> = selected.iter().map(|c| c.latest.id.clone()).collect();
        let order = graph.order_subset(&ids)?;
        let mut by_id: HashMap<PackageId, Candidate> = selected
            .into_iter()
            .map(|c| (c.latest.id.clone(), c))
            .collect();
        let ordered: Vec<Candidate> = order.iter().filter_map(|id| by_id.remove(id)).collect();

        if options.dry_run {
            for candidate in ordered {
                let outcome = match candidate.installed {
                    Some(record) => Outcome::WouldUpgrade {
                        from: record.version,
                        to: candidate.latest.version,
                    },
                    None => Outcome::WouldInstall {
                        version: candidate.latest.version,
                    },
                };
                report.record(candidate.latest.id, candidate.requested, outcome);
            }
            return Ok(report);
        }

        let ctx = self.context();
        let mut pairs = Vec::with_capacity(ordered.len());
        for candidate in ordered {
            match self.pair(candidate, options, ctx) {
                Ok(pair) => pairs.push(pair),
                Err((id, requested, e)) => report.record(id, requested, Outcome::Failed(e)),
            }
        }
        if pairs.is_empty() {
            return Ok(report);
        }

        // 4. Fetch, bounded by the configured job count
        let downloader = self.downloader;
        let fetched: Vec<(usize, Result<()>)> = stream::iter(pairs.iter_mut().enumerate())
            .map(|(index, pair)| async move { (index, pair.new.fetch(downloader).await) })
            .buffer_unordered(self.config.fetch_jobs.max(1))
            .collect()
            .await;
        for (index, result) in fetched {
            if let Err(e) = result {
                tracing::warn!("{}", e);
                pairs[index].fetch_error = Some(e);
            }
        }

        // 5. Install, dependencies first
        let lock = PrefixLock::acquire(self.config)?;
        let mut failed: HashSet<PackageId> = report.failures().map(|(id, _)| id.clone()).collect();

        for mut pair in pairs {
            let id = pair.new.id().clone();

            if self.interrupt.is_triggered() {
                report.record(id, pair.requested, Outcome::Failed(DecantError::Interrupted));
                continue;
            }

            if let Some(e) = pair.fetch_error.take() {
                failed.insert(id.clone());
                report.record(id, pair.requested, Outcome::Failed(e));
                continue;
            }

            let broken = graph
                .transitive_dependencies(&id)
                .into_iter()
                .find(|dep| failed.contains(dep));
            if let Some(dependency) = broken {
                let error = DecantError::DependencyFailed {
                    package: id.to_string(),
                    dependency: dependency.to_string(),
                };
                failed.insert(id.clone());
                report.record(id, pair.requested, Outcome::Failed(error));
                continue;
            }

            let started = Instant::now();
            match self.swap(&mut pair, &lock) {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    tracing::info!("Installed {} {}", id, pair.new.package().version);
                    self.reporter.notify_installed(pair.new.package(), elapsed);
                    report.messages.package_installed(id.to_string(), elapsed);
                    let to = pair.new.package().version.clone();
                    let outcome = match &pair.old {
                        Some(old) => Outcome::Upgraded {
                            from: old.package().version.clone(),
                            to,
                        },
                        None => Outcome::Installed { version: to },
                    };
                    report.record(id, pair.requested, outcome);
                }
                Err(e) => {
                    if e.is_inconsistent() {
                        tracing::error!("{}", e);
                    } else {
                        tracing::warn!("{}", e);
                    }
                    failed.insert(id.clone());
                    report.record(id, pair.requested, Outcome::Failed(e));
                }
            }
        }

        Ok(report)
    }

    fn select_targets(
        &self,
        tracker: &Tracker<'_>,
        targets: &[String],
        options: &UpgradeOptions,
        report: &mut UpgradeReport,
    ) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();

        if targets.is_empty() {
            let policy = options.policy();
            let comparator = DefaultComparator {
                recheck_sentinels: policy.rechecks_sentinels(),
            };
            for entry in tracker.outdated(self.resolver, policy, &comparator)? {
                candidates.push(Candidate {
                    latest: entry.latest,
                    installed: Some(entry.record),
                    requested: true,
                });
            }
            return Ok(candidates);
        }

        // Every name must resolve before anything else happens
        let packages = targets
            .iter()
            .map(|name| self.resolver.find(name))
            .collect::<Result<Vec<_>>>()?;

        let comparator = DefaultComparator::rechecking();
        let mut seen = HashSet::new();
        for package in packages {
            if !seen.insert(package.id.clone()) {
                continue;
            }
            let Some(record) = tracker.installed(&package.id)? else {
                let error = DecantError::NotInstalled(package.id.to_string());
                report.record(package.id, true, Outcome::Failed(error));
                continue;
            };

            if !options.force
                && let Some(version) = tracker.installed_at_least(&package.id, &package.version, &comparator)?
            {
                report.record(package.id, true, Outcome::UpToDate { version });
                continue;
            }

            candidates.push(Candidate {
                latest: package,
                installed: Some(record),
                requested: true,
            });
        }
        Ok(candidates)
    }

    /// Add runtime dependencies that are missing or outdated
    fn add_dependencies(
        &self,
        tracker: &Tracker<'_>,
        graph: &TopologicalHash,
        options: &UpgradeOptions,
        selected: &mut Vec<Candidate>,
    ) -> Result<()> {
        let comparator = DefaultComparator::default();
        let known: HashSet<PackageId> = selected.iter().map(|c| c.latest.id.clone()).collect();

        for id in graph.keys() {
            if known.contains(id) || (options.skip_cask_deps && id.kind == PackageKind::Cask) {
                continue;
            }
            let Some(latest) = graph.package(id) else {
                continue;
            };

            match tracker.installed(id)? {
                None => selected.push(Candidate {
                    latest: latest.clone(),
                    installed: None,
                    requested: false,
                }),
                Some(record) => {
                    if tracker.installed_at_least(id, &latest.version, &comparator)?.is_some() {
                        continue;
                    }
                    if record.pinned {
                        tracing::warn!("Not upgrading pinned dependency {}", id);
                        continue;
                    }
                    selected.push(Candidate {
                        latest: latest.clone(),
                        installed: Some(record),
                        requested: false,
                    });
                }
            }
        }
        Ok(())
    }

    fn pair<'c>(
        &self,
        candidate: Candidate,
        options: &UpgradeOptions,
        ctx: InstallContext<'c>,
    ) -> std::result::Result<UpgradePair<'c>, (PackageId, bool, DecantError)> {
        let Candidate {
            latest,
            installed,
            requested,
        } = candidate;

        let old = match &installed {
            Some(record) => match Installer::for_installed(record, &latest, ctx) {
                Ok(old) => Some(old),
                Err(e) => return Err((latest.id.clone(), requested, e)),
            },
            None => None,
        };

        // Saved options carry forward, merged with any new defaults
        let mut used_options = installed
            .as_ref()
            .map(|r| r.used_options.clone())
            .unwrap_or_default();
        for default in latest.default_options() {
            if !used_options.contains(default) {
                used_options.push(default.clone());
            }
        }

        // A keg the user unlinked stays unlinked
        let opt_link_only = latest.kind() == PackageKind::Formula
            && installed.as_ref().is_some_and(|r| r.link != LinkState::Linked);

        let new_options = InstallerOptions {
            upgrade: false,
            force: options.force,
            installed_on_request: installed.as_ref().is_some_and(|r| r.installed_on_request),
            used_options,
            opt_link_only,
        };

        Ok(UpgradePair {
            new: Installer::new(latest, new_options, ctx),
            old,
            requested,
            fetch_error: None,
        })
    }

    /// Replace the old installation with the new one, or leave the old one
    /// exactly as it was
    fn swap(&self, pair: &mut UpgradePair<'_>, lock: &PrefixLock) -> Result<()> {
        let Err(original) = self.attempt(pair, lock) else {
            if let Some(old) = pair.old.as_mut()
                && let Err(e) = old.finalize_upgrade()
            {
                tracing::warn!("Upgraded {} but could not remove the old version: {}", old.id(), e);
            }
            return Ok(());
        };

        // Rollback runs to completion; interrupts are not checked here
        let mut problems = Vec::new();
        if let Err(e) = pair.new.uninstall_artifacts(lock) {
            problems.push(e.to_string());
        }
        if let Err(e) = pair.new.purge_versioned_files() {
            problems.push(e.to_string());
        }
        if let Some(old) = pair.old.as_mut()
            && old.started_upgrade()
            && let Err(e) = old.revert_upgrade(lock)
        {
            problems.push(e.to_string());
        }

        if problems.is_empty() {
            Err(original)
        } else {
            Err(DecantError::Revert {
                package: pair.new.id().to_string(),
                message: problems.join("; "),
                original: original.to_string(),
            })
        }
    }

    fn attempt(&self, pair: &mut UpgradePair<'_>, lock: &PrefixLock) -> Result<()> {
        pair.new.check_conflicts()?;
        self.interrupt.check()?;
        if let Some(old) = pair.old.as_mut() {
            old.start_upgrade(lock)?;
        }
        self.interrupt.check()?;
        pair.new.stage()?;
        pair.new.install_artifacts(lock)?;
        Ok(())
    }
}
