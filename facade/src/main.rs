use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use tickflow::{Facade, FacadeConfig};

/// tickflow - plugin-based dataflow host
#[derive(Parser, Debug)]
#[command(name = "tickflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered modules, data types and patterns
    List,

    /// Print a pattern as JSON
    Describe {
        /// Pattern name
        pattern: String,
    },

    /// Run a dataflow file for a fixed duration
    Run {
        /// Graph description (JSON)
        dataflow: PathBuf,

        /// Seconds to keep the network running
        #[arg(short = 'd', long = "duration-secs", default_value_t = 10)]
        duration_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            FacadeConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => FacadeConfig::from_env().context("Failed to load config from environment")?,
    };

    let mut facade = Facade::new(&config);

    match cli.command {
        Commands::List => {
            let registry = facade.registry();
            println!("Modules:");
            for module in registry.modules() {
                println!(
                    "  {} ({}, api {}): {}",
                    module.key,
                    module.source,
                    module.api_version,
                    module.plugin_types.join(", ")
                );
            }
            println!("Data types:");
            for name in registry.datatype_names() {
                println!("  {name}");
            }
            println!("Patterns:");
            for name in registry.pattern_names() {
                println!("  {name}");
            }
        }
        Commands::Describe { pattern } => {
            let pattern = facade.instantiate_pattern(&pattern)?;
            println!("{}", serde_json::to_string_pretty(&pattern)?);
        }
        Commands::Run {
            dataflow,
            duration_secs,
        } => {
            facade
                .load_dataflow_file(&dataflow)
                .with_context(|| format!("Failed to load dataflow {}", dataflow.display()))?;
            facade.start()?;
            info!(duration_secs, "Dataflow running");

            thread::sleep(Duration::from_secs(duration_secs));

            facade.stop()?;
            info!("Dataflow finished");
        }
    }

    Ok(())
}
