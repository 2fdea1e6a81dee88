//! Filesystem layout and tunables, resolved once per process.
//!
//! Nothing in the crate reads the environment after [`Config::from_env`] has
//! run; every operation receives the `Config` it should act on. Tests build a
//! fully isolated layout with [`Config::with_prefix`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FETCH_JOBS: usize = 8;
const DEFAULT_FETCH_RETRIES: u32 = 3;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    pub caskroom: PathBuf,
    pub cache: PathBuf,
    pub index: PathBuf,
    pub appdir: PathBuf,
    pub bindir: PathBuf,
    /// Maximum number of concurrent downloads
    pub fetch_jobs: usize,
    pub fetch_retries: u32,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("DECANT_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(detect_prefix);

        let mut config = Self::with_prefix(&prefix);
        config.cache = std::env::var_os("DECANT_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);
        if let Some(index) = std::env::var_os("DECANT_INDEX") {
            config.index = PathBuf::from(index);
        }
        config.appdir = std::env::var_os("DECANT_APPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/Applications"));
        if let Some(bindir) = std::env::var_os("DECANT_BINDIR") {
            config.bindir = PathBuf::from(bindir);
        }
        config.fetch_jobs = env_parse("DECANT_FETCH_JOBS", DEFAULT_FETCH_JOBS).max(1);
        config.fetch_retries = env_parse("DECANT_FETCH_RETRIES", DEFAULT_FETCH_RETRIES);
        config.fetch_timeout = Duration::from_secs(env_parse(
            "DECANT_FETCH_TIMEOUT",
            DEFAULT_FETCH_TIMEOUT_SECS,
        ));
        config
    }

    /// Layout with every directory rooted under `prefix`
    pub fn with_prefix(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref().to_path_buf();
        Self {
            cellar: prefix.join("Cellar"),
            caskroom: prefix.join("Caskroom"),
            cache: prefix.join("var/decant/cache"),
            index: prefix.join("var/decant/index.json"),
            appdir: prefix.join("Applications"),
            bindir: prefix.join("bin"),
            prefix,
            fetch_jobs: DEFAULT_FETCH_JOBS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    /// Directory of `<name> -> keg` links recording which keg is linked
    pub fn linked_dir(&self) -> PathBuf {
        self.prefix.join("var/decant/linked")
    }

    pub fn pins_dir(&self) -> PathBuf {
        self.prefix.join("var/decant/pinned")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.prefix.join("var/decant/locks")
    }

    pub fn mandir(&self) -> PathBuf {
        self.prefix.join("share/man")
    }

    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.cellar.join(name).join(version)
    }

    pub fn cask_version_path(&self, token: &str, version: &str) -> PathBuf {
        self.caskroom.join(token).join(version)
    }
}

/// Detect the Homebrew prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Ok(prefix) = std::env::var("HOMEBREW_PREFIX") {
        return PathBuf::from(prefix);
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

fn default_cache_dir() -> PathBuf {
    if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("decant")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/decant")
    } else {
        PathBuf::from(".cache/decant")
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
