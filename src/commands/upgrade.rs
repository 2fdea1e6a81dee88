use colored::Colorize;
use decant::config::Config;
use decant::download::HttpDownloader;
use decant::error::Result;
use decant::interrupt::Interrupt;
use decant::metadata::MetadataIndex;
use decant::reporter::print_summary;
use decant::upgrade::{UpgradeOptions, Upgrader};
use indicatif::MultiProgress;
use std::io::IsTerminal;

/// Run an upgrade and return the process exit code
pub async fn upgrade(
    config: &Config,
    names: &[String],
    options: &UpgradeOptions,
    display_times: bool,
) -> Result<i32> {
    let index = MetadataIndex::load(&config.index)?;

    let mut downloader = HttpDownloader::new(config)?;
    if std::io::stdout().is_terminal() {
        downloader = downloader.with_progress(MultiProgress::new());
    }

    let interrupt = Interrupt::new();
    interrupt.install_ctrl_c_handler();

    if options.dry_run {
        println!("{} Dry run, nothing will be changed", "ℹ".blue());
    }

    let upgrader = Upgrader::new(config, &index, &downloader).with_interrupt(interrupt);
    let report = upgrader.upgrade(names, options).await?;

    if report.outcomes.is_empty() {
        println!("{} Everything is up to date", "✓".green());
        return Ok(0);
    }

    report.messages.display(display_times);
    print_summary(&report);
    Ok(report.exit_code())
}
