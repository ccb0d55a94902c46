//! Grove CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod document;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Replace-by-source reconciliation for typed entity graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the incoming graph of a document into its target graph
    Reconcile {
        /// Fixture document (JSON)
        document: PathBuf,

        /// Entity sources to replace; repeat for several
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// Shuffle visitation order with this seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Print the planned operations without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate a document
    Check {
        /// Fixture document (JSON)
        document: PathBuf,
    },
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };

    // Initialize logging; RUST_LOG wins over flags and config
    let log_level = if cli.verbose { "debug" } else { config.log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "grove={0},grove_core={0},grove_reconcile={0}",
            log_level
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Grove v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Reconcile {
            document,
            sources,
            seed,
            json,
            dry_run,
        } => {
            let mut options = config.reconcile;
            if seed.is_some() {
                options.shuffle_seed = seed;
            }
            let output = if json {
                commands::Output::Json
            } else {
                commands::Output::Text
            };
            commands::reconcile(&document, &sources, options, output, dry_run)
        }
        Commands::Check { document } => commands::check(&document),
        Commands::Version => {
            println!("Grove v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
