//! User-facing progress and post-update bookkeeping

use crate::error::{DecantError, Result};
use crate::package::Package;
use crate::upgrade::{Outcome, UpgradeReport};
use colored::Colorize;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Names added, modified, deleted and renamed for one package kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// (old name, new name)
    pub renamed: Vec<(String, String)>,
}

impl KindChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub formulae: KindChanges,
    pub casks: KindChanges,
}

pub trait Reporter {
    fn notify_installed(&self, package: &Package, duration: Duration);

    /// Package definitions changed in a tap between two revisions
    fn report_changes(&self, old_rev: &str, new_rev: &str) -> Result<ChangeReport>;
}

/// Per-run message collector, owned by the run instead of the process
#[derive(Debug, Clone, Default)]
pub struct Messages {
    install_times: Vec<(String, Duration)>,
    notices: Vec<String>,
}

impl Messages {
    pub fn package_installed(&mut self, name: impl Into<String>, duration: Duration) {
        self.install_times.push((name.into(), duration));
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    pub fn install_times(&self) -> &[(String, Duration)] {
        &self.install_times
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn is_empty(&self) -> bool {
        self.install_times.is_empty() && self.notices.is_empty()
    }

    pub fn display(&self, show_times: bool) {
        for notice in &self.notices {
            println!("{} {}", "==>".blue().bold(), notice);
        }
        if show_times && !self.install_times.is_empty() {
            println!("{} Installation times", "==>".blue().bold());
            for (name, duration) in &self.install_times {
                println!("{:<32} {:>6.3} s", name, duration.as_secs_f64());
            }
        }
    }
}

/// Prints to the terminal; reads changes from a tap's git checkout
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    pub tap_path: Option<PathBuf>,
}

impl Reporter for ConsoleReporter {
    fn notify_installed(&self, package: &Package, duration: Duration) {
        println!(
            "  {} {} {} {}",
            "✓".green(),
            package.id.to_string().bold().green(),
            package.version.to_string().dimmed(),
            format!("({:.1}s)", duration.as_secs_f64()).dimmed()
        );
    }

    fn report_changes(&self, old_rev: &str, new_rev: &str) -> Result<ChangeReport> {
        let tap = self
            .tap_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No tap checkout configured"))?;

        let output = Command::new("git")
            .arg("-C")
            .arg(tap)
            .args(["diff", "--name-status", "-M"])
            .arg(format!("{}..{}", old_rev, new_rev))
            .output()?;

        if !output.status.success() {
            return Err(DecantError::Other(anyhow::anyhow!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_name_status(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionKind {
    Formula,
    Cask,
}

/// `Formula/j/jq.rb` -> (Formula, "jq")
fn classify(path: &str) -> Option<(DefinitionKind, String)> {
    let (dir, rest) = path.split_once('/')?;
    let kind = match dir {
        "Formula" | "HomebrewFormula" => DefinitionKind::Formula,
        "Casks" => DefinitionKind::Cask,
        _ => return None,
    };
    let file = rest.rsplit('/').next()?;
    let name = file
        .strip_suffix(".rb")
        .or_else(|| file.strip_suffix(".json"))?;
    Some((kind, name.to_string()))
}

/// Parse `git diff --name-status -M` output
pub fn parse_name_status(output: &str) -> ChangeReport {
    let mut report = ChangeReport::default();

    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(status), Some(path)) = (fields.next(), fields.next()) else {
            continue;
        };

        let Some((kind, name)) = classify(path) else {
            continue;
        };
        let changes = match kind {
            DefinitionKind::Formula => &mut report.formulae,
            DefinitionKind::Cask => &mut report.casks,
        };

        match status.chars().next() {
            Some('A') => changes.added.push(name),
            Some('M') => changes.modified.push(name),
            Some('D') => changes.deleted.push(name),
            Some('R') => match fields.next().and_then(classify) {
                Some((new_kind, new_name)) if new_kind == kind => {
                    changes.renamed.push((name, new_name));
                }
                Some((new_kind, new_name)) => {
                    // Moved between Formula/ and Casks/
                    changes.deleted.push(name);
                    match new_kind {
                        DefinitionKind::Formula => report.formulae.added.push(new_name),
                        DefinitionKind::Cask => report.casks.added.push(new_name),
                    }
                }
                None => changes.deleted.push(name),
            },
            _ => {}
        }
    }

    report
}

/// Print the end-of-run summary
pub fn print_summary(report: &UpgradeReport) {
    let mut upgraded = Vec::new();
    let mut pinned = Vec::new();
    let mut failures = Vec::new();

    for entry in &report.outcomes {
        match &entry.outcome {
            Outcome::Upgraded { from, to } => {
                upgraded.push(format!("{} {} -> {}", entry.id, from, to));
            }
            Outcome::Installed { version } => {
                upgraded.push(format!("{} {} (dependency)", entry.id, version));
            }
            Outcome::WouldUpgrade { from, to } => {
                println!("Would upgrade {} {} -> {}", entry.id.to_string().cyan(), from.to_string().dimmed(), to.to_string().cyan());
            }
            Outcome::WouldInstall { version } => {
                println!("Would install {} {}", entry.id.to_string().cyan(), version.to_string().cyan());
            }
            Outcome::UpToDate { version } => {
                println!("{} {} {} already installed", "⚠".yellow(), entry.id, version);
            }
            Outcome::SkippedPinned { version } => pinned.push(format!("{} {}", entry.id, version)),
            Outcome::Failed(error) => failures.push((entry.id.to_string(), error)),
        }
    }

    if !pinned.is_empty() {
        let message = format!(
            "Not upgrading {} pinned package{}: {}",
            pinned.len(),
            if pinned.len() == 1 { "" } else { "s" },
            pinned.join(", ")
        );
        if report.ignore_pinned {
            println!("{} {}", "⚠".yellow(), message);
        } else {
            eprintln!("{} {}", "✗".red(), message);
        }
    }

    if !upgraded.is_empty() {
        println!(
            "{} Upgraded {} package{}",
            "✓".green().bold(),
            upgraded.len().to_string().bold(),
            if upgraded.len() == 1 { "" } else { "s" }
        );
        for line in &upgraded {
            println!("  {}", line);
        }
    }

    if !failures.is_empty() {
        eprintln!(
            "{} {} package{} failed",
            "✗".red().bold(),
            failures.len().to_string().bold(),
            if failures.len() == 1 { "" } else { "s" }
        );
        for (name, error) in &failures {
            let line = format!("  {} [{}]: {}", name.bold(), error.category(), error);
            if error.is_inconsistent() {
                eprintln!("{}", line.red().bold());
            } else {
                eprintln!("{}", line);
            }
        }
    }
}
