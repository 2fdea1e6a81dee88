//! Package versions and their ordering.
//!
//! A [`PkgVersion`] is a version string plus a revision, written `1.4.0_2` on
//! disk (the Cellar directory name). Revisions break ties between builds of the
//! same upstream version. Two sentinel versions exist: `latest` (casks that
//! always download the newest upstream build) and `HEAD` / `HEAD-<commit>`
//! (formulae built from a branch tip). Sentinels cannot be compared against
//! upstream without re-resolving them, so the default comparator treats them as
//! satisfied.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PkgVersion {
    pub version: String,
    pub revision: u32,
}

impl PkgVersion {
    pub fn new(version: impl Into<String>, revision: u32) -> Self {
        Self {
            version: version.into(),
            revision,
        }
    }

    /// Parse a Cellar directory name such as `1.4.0_32`
    pub fn parse(raw: &str) -> Self {
        let (version, revision) = split_revision(raw);
        Self::new(version, revision)
    }

    pub fn is_latest(&self) -> bool {
        self.version == "latest"
    }

    pub fn is_head(&self) -> bool {
        self.version == "HEAD" || self.version.starts_with("HEAD-")
    }

    pub fn is_sentinel(&self) -> bool {
        self.is_latest() || self.is_head()
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision > 0 {
            write!(f, "{}_{}", self.version, self.revision)
        } else {
            f.write_str(&self.version)
        }
    }
}

impl From<String> for PkgVersion {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<PkgVersion> for String {
    fn from(version: PkgVersion) -> Self {
        version.to_string()
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let base = match (self.is_sentinel(), other.is_sentinel()) {
            (false, false) => compare_versions(&self.version, &other.version),
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (true, true) => self.version.cmp(&other.version),
        };
        base.then(self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split a trailing `_<digits>` revision off a version string
fn split_revision(raw: &str) -> (&str, u32) {
    if let Some(pos) = raw.rfind('_') {
        let suffix = &raw[pos + 1..];
        if !suffix.is_empty()
            && suffix.chars().all(|c| c.is_ascii_digit())
            && let Ok(revision) = suffix.parse()
        {
            return (&raw[..pos], revision);
        }
    }
    (raw, 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u64),
    Pre(u8),
    Word(String),
}

fn pre_release_rank(word: &str) -> Option<u8> {
    match word {
        "dev" => Some(0),
        "a" | "alpha" => Some(1),
        "b" | "beta" => Some(2),
        "pre" | "preview" => Some(3),
        "rc" => Some(4),
        _ => None,
    }
}

fn tokenize(version: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = version.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            tokens.push(Token::Num(digits.parse().unwrap_or(u64::MAX)));
        } else if c.is_ascii_alphabetic() {
            let mut word = String::new();
            while let Some(&l) = chars.peek().filter(|l| l.is_ascii_alphabetic()) {
                word.push(l.to_ascii_lowercase());
                chars.next();
            }
            match pre_release_rank(&word) {
                Some(rank) => tokens.push(Token::Pre(rank)),
                None => tokens.push(Token::Word(word)),
            }
        } else {
            chars.next();
        }
    }

    tokens
}

fn compare_tokens(a: Option<&Token>, b: Option<&Token>) -> Ordering {
    use Token::*;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(Num(x)), Some(Num(y))) => x.cmp(y),
        (Some(Pre(x)), Some(Pre(y))) => x.cmp(y),
        (Some(Word(x)), Some(Word(y))) => x.cmp(y),
        // A missing component counts as zero
        (None, Some(Num(y))) => 0.cmp(y),
        (Some(Num(x)), None) => x.cmp(&0),
        // 1.0 > 1.0rc1
        (None, Some(Pre(_))) => Ordering::Greater,
        (Some(Pre(_)), None) => Ordering::Less,
        // 1.0a > 1.0
        (None, Some(Word(_))) => Ordering::Less,
        (Some(Word(_)), None) => Ordering::Greater,
        (Some(Num(_)), Some(_)) => Ordering::Greater,
        (Some(_), Some(Num(_))) => Ordering::Less,
        (Some(Pre(_)), Some(Word(_))) => Ordering::Less,
        (Some(Word(_)), Some(Pre(_))) => Ordering::Greater,
    }
}

/// Compare two version strings component by component
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_tokens = tokenize(a);
    let b_tokens = tokenize(b);

    for i in 0..a_tokens.len().max(b_tokens.len()) {
        match compare_tokens(a_tokens.get(i), b_tokens.get(i)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// Decides whether an installed version is behind the latest known one.
pub trait VersionComparator {
    /// `Less` means `installed` is outdated relative to `latest`.
    fn compare(&self, installed: &PkgVersion, latest: &PkgVersion) -> Ordering;
}

/// Total order on (version, revision); sentinels are satisfied unless
/// `recheck_sentinels` asks for them to be re-resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparator {
    pub recheck_sentinels: bool,
}

impl DefaultComparator {
    pub fn rechecking() -> Self {
        Self {
            recheck_sentinels: true,
        }
    }
}

impl VersionComparator for DefaultComparator {
    fn compare(&self, installed: &PkgVersion, latest: &PkgVersion) -> Ordering {
        if installed.is_sentinel() || latest.is_sentinel() {
            if !self.recheck_sentinels {
                return Ordering::Equal;
            }
            // `latest` can never be proven current without downloading it
            if installed.is_latest() || latest.is_latest() {
                return Ordering::Less;
            }
            if installed == latest {
                return Ordering::Equal;
            }
            return Ordering::Less;
        }
        installed.cmp(latest)
    }
}
