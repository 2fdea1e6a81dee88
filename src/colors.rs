//! Terminal color selection.
//!
//! `NO_COLOR` (https://no-color.org/) wins over everything, then
//! `CLICOLOR_FORCE`, then `CLICOLOR=0`. Otherwise color follows whether
//! stdout is a terminal.

use colored::control;
use std::io::IsTerminal;

/// Whether to color output, given the relevant environment and TTY status
pub fn color_choice(
    no_color: Option<&str>,
    clicolor: Option<&str>,
    clicolor_force: Option<&str>,
    is_tty: bool,
) -> bool {
    if no_color.is_some() {
        return false;
    }
    if clicolor_force.is_some_and(|v| v != "0") {
        return true;
    }
    if clicolor == Some("0") {
        return false;
    }
    is_tty
}

/// Call early in main(); applies to all `colored` output in the process
pub fn init_colors() {
    let no_color = std::env::var("NO_COLOR").ok();
    let clicolor = std::env::var("CLICOLOR").ok();
    let clicolor_force = std::env::var("CLICOLOR_FORCE").ok();

    control::set_override(color_choice(
        no_color.as_deref(),
        clicolor.as_deref(),
        clicolor_force.as_deref(),
        std::io::stdout().is_terminal(),
    ));
}
