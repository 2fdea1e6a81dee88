use colored::Colorize;
use decant::config::Config;
use decant::error::Result;
use decant::graph::{DependencyResolver, build_graph};
use decant::metadata::MetadataIndex;

/// Print the runtime closure of `name` in install order
pub fn deps(config: &Config, name: &str) -> Result<()> {
    let index = MetadataIndex::load(&config.index)?;
    let package = index.find(name)?;
    let graph = build_graph(std::slice::from_ref(&package), &index)?;

    let order: Vec<_> = graph
        .topological_order()?
        .into_iter()
        .filter(|id| *id != package.id)
        .collect();

    if order.is_empty() {
        println!("{} No runtime dependencies", "✓".green());
        return Ok(());
    }

    for id in order {
        let version = graph
            .package(&id)
            .map(|p| p.version.to_string())
            .unwrap_or_default();
        println!("{} {}", id.to_string().cyan(), version.dimmed());
    }
    Ok(())
}
