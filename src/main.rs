//! akh-decide CLI: resolve preference scenarios and run decision cycles.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use akh_decide::config::DeciderConfig;
use akh_decide::scenario::Scenario;

#[derive(Parser)]
#[command(name = "akh-decide", version, about = "Preference-resolution decider")]
struct Cli {
    /// Decider configuration (TOML). Overrides a scenario's own `[config]`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a scenario's slot once and print the outcome.
    Resolve {
        /// Scenario file.
        scenario: PathBuf,
    },

    /// Deposit a scenario's preferences on the top goal and run decision cycles.
    Run {
        /// Scenario file.
        scenario: PathBuf,

        /// Number of decision cycles.
        #[arg(long, default_value = "1")]
        cycles: u64,
    },

    /// Print the default configuration, or write it to a file.
    Config {
        /// Write to this path instead of printing.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn load_scenario(path: &Path, config: Option<&DeciderConfig>) -> Result<Scenario> {
    let mut scenario = Scenario::load(path)?;
    if let Some(config) = config {
        scenario.config = Some(config.clone());
    }
    Ok(scenario)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(DeciderConfig::load)
        .transpose()?;

    match cli.command {
        Commands::Resolve { scenario } => {
            let report = load_scenario(&scenario, config.as_ref())?.resolve()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                println!("{report}");
            }
        }

        Commands::Run { scenario, cycles } => {
            let report = load_scenario(&scenario, config.as_ref())?.run(cycles)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                println!("{report}");
            }
        }

        Commands::Config { write } => {
            let config = config.unwrap_or_default();
            match write {
                Some(path) => {
                    config.save(&path)?;
                    println!("Wrote configuration to {}", path.display());
                }
                None if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&config).into_diagnostic()?);
                }
                None => print!("{}", config.to_toml()?),
            }
        }
    }

    Ok(())
}
