use colored::Colorize;
use decant::config::Config;
use decant::error::{DecantError, Result};
use decant::graph::DependencyResolver;
use decant::lifecycle::Tracker;
use decant::metadata::MetadataIndex;
use decant::package::{PackageId, PackageKind};

/// Installed packages may have left the index, so fall back to what is on disk
fn resolve_id(index: &MetadataIndex, tracker: &Tracker<'_>, name: &str) -> Result<PackageId> {
    match index.find(name) {
        Ok(package) => Ok(package.id),
        Err(e @ DecantError::Resolution { .. }) => {
            for kind in [PackageKind::Formula, PackageKind::Cask] {
                let id = PackageId::parse(name, kind);
                if tracker.installed(&id)?.is_some() {
                    return Ok(id);
                }
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Returns the number of packages that could not be pinned
pub fn pin(config: &Config, names: &[String]) -> Result<usize> {
    let index = MetadataIndex::load(&config.index)?;
    let tracker = Tracker::new(config);
    let mut failed = 0;

    for name in names {
        let result = resolve_id(&index, &tracker, name).and_then(|id| tracker.pin(&id).map(|_| id));
        match result {
            Ok(id) => println!("  {} Pinned {}", "✓".green(), id.to_string().bold().green()),
            Err(e) => {
                eprintln!("  {} {}", "✗".red(), e);
                failed += 1;
            }
        }
    }

    Ok(failed)
}

pub fn unpin(config: &Config, names: &[String]) -> Result<usize> {
    let index = MetadataIndex::load(&config.index)?;
    let tracker = Tracker::new(config);
    let mut failed = 0;

    for name in names {
        let result = resolve_id(&index, &tracker, name).and_then(|id| Ok((tracker.unpin(&id)?, id)));
        match result {
            Ok((true, id)) => println!("  {} Unpinned {}", "✓".green(), id.to_string().bold().green()),
            Ok((false, id)) => println!("  {} {} is not pinned", "⚠".yellow(), id.to_string().bold()),
            Err(e) => {
                eprintln!("  {} {}", "✗".red(), e);
                failed += 1;
            }
        }
    }

    Ok(failed)
}
