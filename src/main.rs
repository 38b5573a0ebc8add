//! relstm - declarative state machines over relational tables
//!
//! Loads machine definitions and seed tables from a YAML file, then lists,
//! shows or invokes actions on machine instances.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{parse_value, AppConfig};
use relstm_core::{Resources, Runtime};
use relstm_storage::MemoryBackend;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relstm")]
#[command(about = "Declarative state machines over relational tables")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "RELSTM_CONFIG")]
    config: Option<PathBuf>,

    /// Current principal as accessor=value
    #[arg(short, long)]
    principal: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List machine types
    Machines,

    /// List instances of a machine type
    List {
        /// Machine type
        machine: String,

        /// Equality filter on a property (repeatable)
        #[arg(short, long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, Value)>,
    },

    /// Show an instance
    Show {
        /// Machine type
        machine: String,

        /// ID components, in key order
        #[arg(required = true)]
        id: Vec<String>,
    },

    /// Invoke an action
    Invoke {
        /// Machine type
        machine: String,

        /// Action name
        action: String,

        /// Target ID components; omitted for creating actions
        #[arg(short, long = "ref", num_args = 1..)]
        reference: Vec<String>,

        /// Action argument (repeatable)
        #[arg(short, long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, Value)>,
    },
}

/// Parses `key=value`, reading the value as JSON when possible.
fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no '=' in '{}'", s))?;
    Ok((key.to_string(), parse_value(value)))
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    if let Some(principal) = &cli.principal {
        config.set_principal(principal)?;
    }

    let backend = Arc::new(MemoryBackend::from_config(&config.storage)?);
    let resources = Resources::new().with_backend(config.runtime.default_backend.clone(), backend);
    let runtime = Runtime::from_config(&config.runtime, resources)?;

    let output = commands::execute(&runtime, cli.command)?;
    println!("{}", output);
    Ok(())
}
