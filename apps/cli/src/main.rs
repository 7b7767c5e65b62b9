//! fhir-catalog: build and maintain a StructureDefinition catalog
//!
//! Usage:
//!   fhir-catalog build [--family us-core]
//!   fhir-catalog prune USCorePatientProfile
//!   fhir-catalog stats

mod commands;
mod config;
mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::logging::init_logging;

#[derive(Parser, Debug)]
#[clap(name = "fhir-catalog")]
#[clap(about = "Normalize FHIR StructureDefinitions into a searchable catalog")]
struct Cli {
    /// Configuration file (defaults to ./fhir-catalog.toml when present)
    #[clap(short, long, env = "FHIR_CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the catalog output directory
    #[clap(short, long)]
    output: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process configured packages and merge them into the catalog
    Build {
        /// Only build these families (repeatable)
        #[clap(long = "family")]
        families: Vec<String>,
    },
    /// Remove entries from the catalog by name
    Prune {
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Print the master index
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::Build { families } => commands::build(&config, &families).await,
        Command::Prune { names } => commands::prune(&config, &names),
        Command::Stats => commands::stats(&config),
    }
}
