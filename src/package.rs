//! Immutable package definitions.
//!
//! A [`Package`] is what the metadata layer hands to the orchestrator: the
//! identity, target version, declared dependencies and conflicts, plus the
//! fields that only make sense for one kind (keg-only and default options for
//! formulae, artifact lists for casks).

use crate::version::PkgVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CORE_TAP: &str = "homebrew/core";
pub const CASK_TAP: &str = "homebrew/cask";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    pub fn default_tap(self) -> &'static str {
        match self {
            PackageKind::Formula => CORE_TAP,
            PackageKind::Cask => CASK_TAP,
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKind::Formula => f.write_str("formula"),
            PackageKind::Cask => f.write_str("cask"),
        }
    }
}

/// Stable identity of a package: kind, tap and short name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub kind: PackageKind,
    pub tap: String,
    pub name: String,
}

impl PackageId {
    pub fn new(kind: PackageKind, tap: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            tap: tap.into(),
            name: name.into(),
        }
    }

    pub fn formula(name: impl Into<String>) -> Self {
        Self::new(PackageKind::Formula, CORE_TAP, name)
    }

    pub fn cask(token: impl Into<String>) -> Self {
        Self::new(PackageKind::Cask, CASK_TAP, token)
    }

    /// Parse `name` or `user/repo/name`
    pub fn parse(raw: &str, kind: PackageKind) -> Self {
        match raw.rsplit_once('/') {
            Some((tap, name)) if tap.contains('/') => Self::new(kind, tap, name),
            _ => Self::new(kind, kind.default_tap(), raw),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.tap, self.name)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tap == self.kind.default_tap() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.tap, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Required,
    Recommended,
    Optional,
    Build,
    Test,
}

impl DependencyKind {
    /// Only runtime dependencies participate in install ordering
    pub fn is_runtime(self) -> bool {
        matches!(self, DependencyKind::Required | DependencyKind::Recommended)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: PackageId,
    #[serde(default)]
    pub kind: DependencyKind,
}

/// Where the installable artifact comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// A cask artifact stanza. Paths in `source` are relative to the staged root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    App {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
    Binary {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
    Manpage {
        source: String,
    },
    /// Copied verbatim to an absolute target path
    Artifact { source: String, target: String },
}

impl Artifact {
    pub fn source(&self) -> &str {
        match self {
            Artifact::App { source, .. }
            | Artifact::Binary { source, .. }
            | Artifact::Manpage { source }
            | Artifact::Artifact { source, .. } => source,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Artifact::App { .. } => "app",
            Artifact::Binary { .. } => "binary",
            Artifact::Manpage { .. } => "manpage",
            Artifact::Artifact { .. } => "artifact",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaFields {
    #[serde(default)]
    pub keg_only: bool,
    /// Options applied when no previous installation recorded any
    #[serde(default)]
    pub default_options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaskFields {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackageFields {
    Formula(FormulaFields),
    Cask(CaskFields),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub version: PkgVersion,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub conflicts_with: Vec<PackageId>,
    /// The package updates itself; skipped by outdated checks unless greedy
    #[serde(default)]
    pub auto_updates: bool,
    pub fields: PackageFields,
}

impl Package {
    pub fn formula(name: &str, version: &str) -> Self {
        Self {
            id: PackageId::parse(name, PackageKind::Formula),
            version: PkgVersion::parse(version),
            homepage: None,
            source: None,
            dependencies: Vec::new(),
            conflicts_with: Vec::new(),
            auto_updates: false,
            fields: PackageFields::Formula(FormulaFields::default()),
        }
    }

    pub fn cask(token: &str, version: &str) -> Self {
        Self {
            id: PackageId::parse(token, PackageKind::Cask),
            version: PkgVersion::parse(version),
            homepage: None,
            source: None,
            dependencies: Vec::new(),
            conflicts_with: Vec::new(),
            auto_updates: false,
            fields: PackageFields::Cask(CaskFields::default()),
        }
    }

    pub fn kind(&self) -> PackageKind {
        self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn keg_only(&self) -> bool {
        matches!(&self.fields, PackageFields::Formula(f) if f.keg_only)
    }

    pub fn artifacts(&self) -> &[Artifact] {
        match &self.fields {
            PackageFields::Cask(cask) => &cask.artifacts,
            PackageFields::Formula(_) => &[],
        }
    }

    pub fn default_options(&self) -> &[String] {
        match &self.fields {
            PackageFields::Formula(formula) => &formula.default_options,
            PackageFields::Cask(_) => &[],
        }
    }

    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|dep| dep.kind.is_runtime())
    }

    /// Same definition pinned to another version, used to describe what is
    /// currently on disk
    pub fn with_version(&self, version: PkgVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    pub fn depends_on(mut self, id: PackageId, kind: DependencyKind) -> Self {
        self.dependencies.push(Dependency { id, kind });
        self
    }

    pub fn conflicts_with(mut self, id: PackageId) -> Self {
        self.conflicts_with.push(id);
        self
    }

    pub fn with_source(mut self, url: impl Into<String>, sha256: Option<String>) -> Self {
        self.source = Some(Source {
            url: url.into(),
            sha256,
        });
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        if let PackageFields::Cask(cask) = &mut self.fields {
            cask.artifacts.push(artifact);
        }
        self
    }

    pub fn keg_only_formula(mut self) -> Self {
        if let PackageFields::Formula(formula) = &mut self.fields {
            formula.keg_only = true;
        }
        self
    }

    pub fn auto_updating(mut self) -> Self {
        self.auto_updates = true;
        self
    }
}
