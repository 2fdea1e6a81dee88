//! JSON package index.
//!
//! The formula/cask DSL is evaluated elsewhere; what reaches this crate is a
//! flat JSON array of definitions:
//!
//! ```json
//! [
//!   {"name": "wget", "version": "1.24.5", "revision": 1,
//!    "url": "https://example.org/wget-1.24.5.tar.gz", "sha256": "...",
//!    "dependencies": ["openssl@3", {"name": "pkgconf", "kind": "build"}]},
//!   {"kind": "cask", "name": "firefox", "version": "latest", "auto_updates": true,
//!    "artifacts": [{"type": "app", "source": "Firefox.app"}]}
//! ]
//! ```
//!
//! Dependencies are formulae unless marked `"cask": true`. A tap-qualified
//! name (`user/repo/name`) selects a non-default tap.

use crate::error::{DecantError, Result};
use crate::graph::DependencyResolver;
use crate::package::{
    Artifact, CaskFields, Dependency, DependencyKind, FormulaFields, Package, PackageFields,
    PackageId, PackageKind, Source,
};
use crate::version::PkgVersion;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Minimum similarity for "did you mean" suggestions
const SUGGESTION_THRESHOLD: f64 = 0.85;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        kind: DependencyKind,
        #[serde(default)]
        cask: bool,
    },
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: String,
    #[serde(default)]
    tap: Option<String>,
    #[serde(default = "default_kind")]
    kind: PackageKind,
    version: String,
    #[serde(default)]
    revision: u32,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    conflicts_with: Vec<String>,
    #[serde(default)]
    auto_updates: bool,
    #[serde(default)]
    keg_only: bool,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

fn default_kind() -> PackageKind {
    PackageKind::Formula
}

impl RawPackage {
    fn into_package(self) -> Package {
        let id = match self.tap {
            Some(tap) => PackageId::new(self.kind, tap, self.name),
            None => PackageId::parse(&self.name, self.kind),
        };

        let dependencies = self
            .dependencies
            .into_iter()
            .map(|raw| match raw {
                RawDependency::Name(name) => Dependency {
                    id: PackageId::parse(&name, PackageKind::Formula),
                    kind: DependencyKind::Required,
                },
                RawDependency::Detailed { name, kind, cask } => {
                    let dep_kind = if cask {
                        PackageKind::Cask
                    } else {
                        PackageKind::Formula
                    };
                    Dependency {
                        id: PackageId::parse(&name, dep_kind),
                        kind,
                    }
                }
            })
            .collect();

        let conflicts_with = self
            .conflicts_with
            .iter()
            .map(|name| PackageId::parse(name, self.kind))
            .collect();

        let fields = match self.kind {
            PackageKind::Formula => PackageFields::Formula(FormulaFields {
                keg_only: self.keg_only,
                default_options: self.options,
            }),
            PackageKind::Cask => PackageFields::Cask(CaskFields {
                artifacts: self.artifacts,
            }),
        };

        Package {
            id,
            version: PkgVersion::new(self.version, self.revision),
            homepage: self.homepage,
            source: self.url.map(|url| Source {
                url,
                sha256: self.sha256,
            }),
            dependencies,
            conflicts_with,
            auto_updates: self.auto_updates,
            fields,
        }
    }
}

/// In-memory package index, the default [`DependencyResolver`]
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    packages: HashMap<PackageId, Package>,
}

impl MetadataIndex {
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Self {
        Self {
            packages: packages
                .into_iter()
                .map(|pkg| (pkg.id.clone(), pkg))
                .collect(),
        }
    }

    /// Load an index file. A missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Package index not found: {}", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read package index: {}", path.display()))?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> Result<Self> {
        let raw: Vec<RawPackage> = serde_json::from_str(json)?;
        Ok(Self::from_packages(raw.into_iter().map(RawPackage::into_package)))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn insert(&mut self, package: Package) {
        self.packages.insert(package.id.clone(), package);
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Closest known name, for error messages
    fn suggest(&self, name: &str) -> Option<String> {
        self.packages
            .keys()
            .map(|id| (strsim::jaro_winkler(name, &id.name), id))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id.to_string())
    }

    fn not_found(&self, name: &str) -> DecantError {
        DecantError::Resolution {
            name: name.to_string(),
            suggestion: self.suggest(name),
        }
    }
}

impl DependencyResolver for MetadataIndex {
    fn resolve(&self, id: &PackageId) -> Result<Package> {
        self.packages
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_found(&id.to_string()))
    }

    fn find(&self, name: &str) -> Result<Package> {
        // Formulae win over casks of the same name, as with `brew upgrade <name>`
        for kind in [PackageKind::Formula, PackageKind::Cask] {
            if let Some(pkg) = self.packages.get(&PackageId::parse(name, kind)) {
                return Ok(pkg.clone());
            }
        }
        Err(self.not_found(name))
    }
}
