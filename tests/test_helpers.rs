// Test helpers for isolated testing
// Every environment lives in its own temporary prefix

#![allow(dead_code)]

use decant::artifact::{ArtifactInstaller, FsArtifactInstaller, InstalledArtifact};
use decant::config::Config;
use decant::download::{ChecksumVerifier, Downloader, FetchSpec, HttpDownloader, Sha256Verifier, sha256_file};
use decant::error::{DecantError, Result};
use decant::installer::{InstallContext, Installer, InstallerOptions};
use decant::package::{Artifact, Package};
use decant::quarantine::NoopTagger;
use decant::symlink::PrefixLock;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Isolated prefix with bottles served from `file://` URLs
///
/// ```text
/// temp/
///   prefix/      Cellar, Caskroom, bin, opt, var/decant
///   sources/     bottles and cask payloads
/// ```
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config: Config,
    pub sources: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().join("prefix");
        let sources = temp_dir.path().join("sources");
        fs::create_dir_all(&prefix).unwrap();
        fs::create_dir_all(&sources).unwrap();

        let mut config = Config::with_prefix(&prefix);
        config.fetch_jobs = 4;
        config.fetch_retries = 0;
        fs::create_dir_all(&config.cellar).unwrap();
        fs::create_dir_all(&config.caskroom).unwrap();

        Self {
            temp_dir,
            config,
            sources,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.config.prefix
    }

    /// Write a bottle holding `files` (relative to the keg), each containing
    /// "<name> <version>". Returns its path and SHA256.
    pub fn bottle(&self, name: &str, version: &str, files: &[&str]) -> (PathBuf, String) {
        let path = self.sources.join(format!("{name}--{version}.bottle.tar.gz"));
        let file = fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let contents = format!("{name} {version}\n");

        for relative in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{name}/{version}/{relative}"),
                    contents.as_bytes(),
                )
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let sha = sha256_file(&path).unwrap();
        (path, sha)
    }

    /// Formula `name` at `version` with a bottle providing `bin/<name>`
    pub fn formula(&self, name: &str, version: &str) -> Package {
        self.formula_with_files(name, version, &[&format!("bin/{name}")])
    }

    pub fn formula_with_files(&self, name: &str, version: &str, files: &[&str]) -> Package {
        let (bottle, sha) = self.bottle(name, version, files);
        Package::formula(name, version).with_source(format!("file://{}", bottle.display()), Some(sha))
    }

    /// Cask `token` at `version` whose payload is a single executable
    /// installed as a binary
    pub fn cask(&self, token: &str, version: &str) -> Package {
        let dir = self.sources.join(format!("{token}-{version}"));
        fs::create_dir_all(&dir).unwrap();
        let payload = dir.join(token);
        fs::write(&payload, format!("#!/bin/sh\necho {token} {version}\n")).unwrap();
        let sha = sha256_file(&payload).unwrap();

        Package::cask(token, version)
            .with_source(format!("file://{}", payload.display()), Some(sha))
            .with_artifact(Artifact::Binary {
                source: token.to_string(),
                target: None,
            })
    }

    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.config.keg_path(name, version)
    }

    /// Contents of `<prefix>/bin/<name>`, following links
    pub fn bin_contents(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.config.bindir.join(name)).ok()
    }

    /// Install `package` as if by an earlier run
    pub async fn install(&self, package: Package) {
        self.install_with(package, true).await
    }

    pub async fn install_with(&self, package: Package, on_request: bool) {
        let config = &self.config;
        let downloader = HttpDownloader::new(config).unwrap();
        let artifacts = FsArtifactInstaller::new(config);
        let ctx = InstallContext {
            config,
            verifier: &Sha256Verifier,
            artifacts: &artifacts,
            tagger: &NoopTagger,
        };
        let options = InstallerOptions {
            installed_on_request: on_request,
            ..Default::default()
        };

        let mut installer = Installer::new(package, options, ctx);
        installer.check_conflicts().unwrap();
        installer.fetch(&downloader).await.unwrap();
        installer.stage().unwrap();
        let lock = PrefixLock::acquire(config).unwrap();
        installer.install_artifacts(&lock).unwrap();
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Real downloader that counts calls and can be told to fail for names
pub struct CountingDownloader {
    inner: HttpDownloader,
    calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl CountingDownloader {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: HttpDownloader::new(config).unwrap(),
            calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for CountingDownloader {
    async fn fetch(&self, spec: &FetchSpec) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.failing.lock().unwrap().contains(&spec.id.name);
        if fail {
            return Err(DecantError::fetch(&spec.id, "connection reset"));
        }
        self.inner.fetch(spec).await
    }

    fn cached(&self, spec: &FetchSpec) -> bool {
        self.inner.cached(spec)
    }

    fn clear_cache(&self, spec: &FetchSpec) -> Result<()> {
        self.inner.clear_cache(spec)
    }
}

/// Filesystem artifact installer that fails for chosen artifact sources
pub struct FailingArtifacts {
    inner: FsArtifactInstaller,
    fail_source: String,
}

impl FailingArtifacts {
    pub fn new(config: &Config, fail_source: &str) -> Self {
        Self {
            inner: FsArtifactInstaller::new(config),
            fail_source: fail_source.to_string(),
        }
    }
}

impl ArtifactInstaller for FailingArtifacts {
    fn install(&self, artifact: &Artifact, staged_root: &Path) -> anyhow::Result<InstalledArtifact> {
        if artifact.source() == self.fail_source {
            anyhow::bail!("injected failure installing {}", artifact.source());
        }
        self.inner.install(artifact, staged_root)
    }

    fn uninstall(&self, installed: &InstalledArtifact) -> anyhow::Result<()> {
        self.inner.uninstall(installed)
    }
}

/// Filesystem artifact installer whose uninstall misbehaves: it either
/// leaves every artifact where it is, or fails its first `failures` calls
pub struct UninstallFaults {
    inner: FsArtifactInstaller,
    ignore: bool,
    failures: AtomicUsize,
}

impl UninstallFaults {
    pub fn ignoring(config: &Config) -> Self {
        Self {
            inner: FsArtifactInstaller::new(config),
            ignore: true,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn failing(config: &Config, failures: usize) -> Self {
        Self {
            inner: FsArtifactInstaller::new(config),
            ignore: false,
            failures: AtomicUsize::new(failures),
        }
    }
}

impl ArtifactInstaller for UninstallFaults {
    fn install(&self, artifact: &Artifact, staged_root: &Path) -> anyhow::Result<InstalledArtifact> {
        self.inner.install(artifact, staged_root)
    }

    fn uninstall(&self, installed: &InstalledArtifact) -> anyhow::Result<()> {
        if self.ignore {
            return Ok(());
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("device busy removing {}", installed.target.display());
        }
        self.inner.uninstall(installed)
    }
}

/// Rejects every checksum of artifacts whose cache path mentions `name`
pub struct RejectingVerifier {
    pub name: String,
}

impl ChecksumVerifier for RejectingVerifier {
    fn verify(&self, path: &Path, expected: &str) -> Result<()> {
        let marker = format!("/{}--", self.name);
        if path.to_string_lossy().contains(&marker) {
            return Err(DecantError::Checksum {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual: "0".repeat(64),
            });
        }
        Sha256Verifier.verify(path, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_is_isolated() {
        let env = TestEnvironment::new();
        assert!(env.config.cellar.starts_with(env.temp_dir.path()));
        assert!(env.config.cache.starts_with(env.temp_dir.path()));
        assert!(env.config.cellar.exists());
    }

    #[test]
    fn test_bottle_checksum_matches() {
        let env = TestEnvironment::new();
        let (path, sha) = env.bottle("jq", "1.7.1", &["bin/jq"]);
        assert_eq!(sha256_file(&path).unwrap(), sha);
    }
}
