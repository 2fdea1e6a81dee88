//! Artifact download manager with a checksum-keyed cache and progress tracking

use crate::config::Config;
use crate::error::{DecantError, Result};
use crate::package::{Package, PackageId};
use crate::version::PkgVersion;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Delay added per failed attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Everything needed to fetch one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub id: PackageId,
    pub version: PkgVersion,
    pub url: String,
    pub sha256: Option<String>,
}

impl FetchSpec {
    /// `None` when the package has nothing to download
    pub fn for_package(package: &Package) -> Option<Self> {
        let source = package.source.as_ref()?;
        Some(Self {
            id: package.id.clone(),
            version: package.version.clone(),
            url: source.url.clone(),
            sha256: source.sha256.clone(),
        })
    }

    /// Unique per package, version and checksum
    pub fn cache_key(&self) -> String {
        let checksum: String = match &self.sha256 {
            Some(sum) => sum.chars().take(12).collect(),
            None => "unverified".to_string(),
        };
        format!("{}--{}--{}", self.id.name, self.version, checksum)
    }

    /// File name of the artifact as published
    pub fn file_name(&self) -> String {
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.id.name)
            .to_string()
    }

    /// `<cache>/<kind>/<key>/<file name>`
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir
            .join(self.id.kind.to_string())
            .join(self.cache_key())
            .join(self.file_name())
    }
}

pub trait Downloader: Send + Sync {
    /// Fetch into the cache, returning the cached path. A verified cache hit
    /// performs no network I/O.
    fn fetch(&self, spec: &FetchSpec) -> impl Future<Output = Result<PathBuf>> + Send;

    fn cached(&self, spec: &FetchSpec) -> bool;

    fn clear_cache(&self, spec: &FetchSpec) -> Result<()>;
}

pub trait ChecksumVerifier {
    /// Errors with [`DecantError::Checksum`] on mismatch
    fn verify(&self, path: &Path, expected: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Verifier;

impl ChecksumVerifier for Sha256Verifier {
    fn verify(&self, path: &Path, expected: &str) -> Result<()> {
        let actual = sha256_file(path)?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(DecantError::Checksum {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

/// SHA256 checksum of a file, hex encoded
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// HTTP(S) and `file://` downloader backed by the on-disk cache
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    cache_dir: PathBuf,
    retries: u32,
    progress: Option<MultiProgress>,
}

impl HttpDownloader {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!("decant/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            cache_dir: config.cache.clone(),
            retries: config.fetch_retries,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn verify(&self, spec: &FetchSpec, path: &Path) -> Result<()> {
        match &spec.sha256 {
            Some(expected) => Sha256Verifier.verify(path, expected),
            None => Ok(()),
        }
    }

    async fn download_once(&self, spec: &FetchSpec, dest: &Path) -> Result<()> {
        if let Some(local) = local_path(&spec.url) {
            fs::copy(&local, dest).await?;
            return Ok(());
        }

        let pb = self.progress.as_ref().map(|mp| {
            let pb = mp.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(format!("⬇ {}", spec.id.name));
            pb
        });

        let mut response = self
            .client
            .get(&spec.url)
            .send()
            .await?
            .error_for_status()?;

        if let Some(pb) = &pb
            && let Some(total) = response.content_length()
        {
            pb.set_length(total);
        }

        let mut file = fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }

        file.flush().await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("✓ {}", spec.id.name));
        }

        Ok(())
    }
}

impl Downloader for HttpDownloader {
    async fn fetch(&self, spec: &FetchSpec) -> Result<PathBuf> {
        let output_path = spec.cache_path(&self.cache_dir);

        // Check if already downloaded and verified
        if output_path.exists() {
            match self.verify(spec, &output_path) {
                Ok(()) => {
                    tracing::debug!("Cache hit for {}", spec.cache_key());
                    return Ok(output_path);
                }
                Err(e) => {
                    tracing::warn!("Discarding cached {}: {}", spec.cache_key(), e);
                    fs::remove_file(&output_path).await?;
                }
            }
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&output_path);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download_once(spec, &partial).await {
                Ok(()) => break,
                Err(e) if attempt <= self.retries => {
                    tracing::warn!(
                        "Download of {} failed (attempt {}/{}): {}",
                        spec.id,
                        attempt,
                        self.retries + 1,
                        e
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    let _ = fs::remove_file(&partial).await;
                    return Err(DecantError::fetch(&spec.id, e));
                }
            }
        }

        if let Err(e) = self.verify(spec, &partial) {
            fs::remove_file(&partial).await?;
            return Err(e);
        }
        fs::rename(&partial, &output_path).await?;

        tracing::debug!("Fetched {} to {}", spec.id, output_path.display());
        Ok(output_path)
    }

    fn cached(&self, spec: &FetchSpec) -> bool {
        spec.cache_path(&self.cache_dir).exists()
    }

    fn clear_cache(&self, spec: &FetchSpec) -> Result<()> {
        let path = spec.cache_path(&self.cache_dir);
        if let Some(dir) = path.parent()
            && dir.exists()
        {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        None
    } else {
        Some(PathBuf::from(url))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".incomplete");
    path.with_file_name(name)
}
