use colored::Colorize;
use decant::config::Config;
use decant::error::Result;
use decant::lifecycle::{OutdatedPolicy, Tracker};
use decant::metadata::MetadataIndex;
use decant::package::PackageKind;
use decant::symlink::LinkState;
use decant::version::DefaultComparator;
use std::io::IsTerminal;

pub fn list(config: &Config) -> Result<()> {
    let tracker = Tracker::new(config);
    let records = tracker.installed_all()?;

    if records.is_empty() {
        println!("No packages installed");
        return Ok(());
    }

    let is_tty = std::io::stdout().is_terminal();
    for (kind, heading) in [(PackageKind::Formula, "Formulae"), (PackageKind::Cask, "Casks")] {
        let group: Vec<_> = records.iter().filter(|r| r.id.kind == kind).collect();
        if group.is_empty() {
            continue;
        }

        if is_tty {
            println!("{} {}", "==>".bold().green(), heading.bold());
        }
        for record in group {
            if !is_tty {
                println!("{} {}", record.id.name, record.version);
                continue;
            }

            let mut tags = Vec::new();
            if record.pinned {
                tags.push("pinned".yellow().to_string());
            }
            match record.link {
                LinkState::Unlinked => tags.push("unlinked".red().to_string()),
                LinkState::OptLinked if kind == PackageKind::Formula => {
                    tags.push("keg-only".dimmed().to_string())
                }
                _ => {}
            }

            let suffix = if tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", tags.join(", "))
            };
            println!(
                "  {} {}{}",
                record.id.name.bold(),
                record.version.to_string().dimmed(),
                suffix
            );
        }
    }

    Ok(())
}

pub fn outdated(config: &Config, policy: OutdatedPolicy, json: bool) -> Result<()> {
    let index = MetadataIndex::load(&config.index)?;
    let tracker = Tracker::new(config);
    let comparator = DefaultComparator {
        recheck_sentinels: policy.rechecks_sentinels(),
    };
    let entries = tracker.outdated(&index, policy, &comparator)?;

    if json {
        let rows: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.record.id.full_name(),
                    "kind": entry.record.id.kind.to_string(),
                    "installed_version": entry.record.version.to_string(),
                    "current_version": entry.latest.version.to_string(),
                    "pinned": entry.record.pinned,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if entries.is_empty() {
        if std::io::stdout().is_terminal() {
            println!("{} All packages are up to date", "✓".green());
        }
        return Ok(());
    }

    for entry in &entries {
        let pinned = if entry.record.pinned {
            format!(" [pinned at {}]", entry.record.version).yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{} ({}) < {}{}",
            entry.record.id.name.bold(),
            entry.record.version.to_string().dimmed(),
            entry.latest.version.to_string().cyan(),
            pinned
        );
    }

    Ok(())
}
