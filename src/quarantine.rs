//! Download provenance and quarantine tagging.
//!
//! On macOS staged content is tagged with `com.apple.quarantine` so
//! Gatekeeper knows where it came from. Other platforms record nothing.

use anyhow::Result;
use std::path::Path;

/// Where a staged artifact came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub url: Option<String>,
    pub homepage: Option<String>,
}

pub trait QuarantineTagger {
    fn tag(&self, path: &Path, provenance: &Provenance) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTagger;

impl QuarantineTagger for NoopTagger {
    fn tag(&self, _path: &Path, _provenance: &Provenance) -> Result<()> {
        Ok(())
    }
}

/// Shells out to `xattr`, as the system tools do
#[cfg(target_os = "macos")]
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrTagger;

#[cfg(target_os = "macos")]
impl QuarantineTagger for XattrTagger {
    fn tag(&self, path: &Path, provenance: &Provenance) -> Result<()> {
        use std::process::Command;

        // flags;timestamp;agent;origin
        let value = format!(
            "0181;{:x};decant;{}",
            chrono::Utc::now().timestamp(),
            provenance.url.as_deref().unwrap_or_default()
        );
        let output = Command::new("xattr")
            .args(["-w", "-r", "com.apple.quarantine", &value])
            .arg(path)
            .output()?;

        if !output.status.success() {
            anyhow::bail!(
                "Failed to quarantine {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

pub fn default_tagger() -> Box<dyn QuarantineTagger + Send + Sync> {
    #[cfg(target_os = "macos")]
    {
        Box::new(XattrTagger)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(NoopTagger)
    }
}
