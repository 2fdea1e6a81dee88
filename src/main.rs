mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use decant::colors;
use decant::config::Config;
use decant::lifecycle::OutdatedPolicy;
use decant::upgrade::UpgradeOptions;

#[derive(Parser)]
#[command(name = "dct")]
#[command(author, version, about = "Dependency-aware upgrades for Homebrew formulae and casks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Clone, Copy)]
struct GreedyArgs {
    /// Also upgrade casks that update themselves or track "latest"
    #[arg(long, short = 'g')]
    greedy: bool,

    /// Also upgrade casks whose version is "latest"
    #[arg(long)]
    greedy_latest: bool,

    /// Also upgrade casks that update themselves
    #[arg(long)]
    greedy_auto_updates: bool,
}

impl GreedyArgs {
    fn policy(self) -> OutdatedPolicy {
        OutdatedPolicy {
            greedy: self.greedy,
            greedy_latest: self.greedy_latest,
            greedy_auto_updates: self.greedy_auto_updates,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade outdated packages, or only the named ones
    Upgrade {
        /// Formula or cask names (all outdated packages if empty)
        names: Vec<String>,

        /// Reinstall even if up to date, and ignore conflicts
        #[arg(short, long)]
        force: bool,

        /// Show what would be upgraded without changing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[command(flatten)]
        greedy: GreedyArgs,

        /// Do not fail the run because of pinned packages
        #[arg(long)]
        ignore_pinned: bool,

        /// Do not upgrade or install dependencies
        #[arg(long, alias = "ignore-dependencies")]
        skip_dependencies: bool,

        /// Do not upgrade or install cask dependencies
        #[arg(long)]
        skip_cask_deps: bool,

        /// Print per-package installation times
        #[arg(long)]
        display_times: bool,
    },

    /// Show outdated installed packages
    Outdated {
        #[command(flatten)]
        greedy: GreedyArgs,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a package's runtime dependencies in install order
    Deps {
        /// Formula or cask name
        name: String,
    },

    /// List installed packages
    List,

    /// Exclude packages from upgrades
    Pin {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Allow pinned packages to be upgraded again
    Unpin {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "decant=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    colors::init_colors();

    let config = Config::from_env();
    tracing::debug!("Using prefix {}", config.prefix.display());

    let code = match cli.command {
        Commands::Upgrade {
            names,
            force,
            dry_run,
            greedy,
            ignore_pinned,
            skip_dependencies,
            skip_cask_deps,
            display_times,
        } => {
            let options = UpgradeOptions {
                force,
                dry_run,
                greedy: greedy.greedy,
                greedy_latest: greedy.greedy_latest,
                greedy_auto_updates: greedy.greedy_auto_updates,
                ignore_pinned,
                skip_dependencies,
                skip_cask_deps,
            };
            commands::upgrade(&config, &names, &options, display_times).await?
        }
        Commands::Outdated { greedy, json } => {
            commands::outdated(&config, greedy.policy(), json)?;
            0
        }
        Commands::Deps { name } => {
            commands::deps(&config, &name)?;
            0
        }
        Commands::List => {
            commands::list(&config)?;
            0
        }
        Commands::Pin { names } => i32::from(commands::pin(&config, &names)? > 0),
        Commands::Unpin { names } => i32::from(commands::unpin(&config, &names)? > 0),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "dct", &mut std::io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
