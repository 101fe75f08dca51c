// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # DTP Registry CLI
//!
//! The `dtp` binary runs the digital twin registry and its operator tasks.
//!
//! ## Commands
//!
//! - `dtp serve` - Run the HTTP API, last-data refresher and binding planner
//! - `dtp update [--dry-run]` - Apply catalog schema migrations
//! - `dtp seed [--force]` - Seed the demo catalog
//! - `dtp scan --root <dir>` - Register twin descriptors found on disk
//! - `dtp config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use dtp_core::domain::registry_config::{LoggingConfig, RegistryConfigManifest};
use dtp_registry::commands::{self, ConfigCommand};

/// DTP Registry - Digital twin catalog and portal backend
#[derive(Parser)]
#[command(name = "dtp")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "DTP_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); falls back to the config file
    #[arg(long, global = true, env = "DTP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); falls back to the config file
    #[arg(long, global = true, env = "DTP_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry server
    #[command(name = "serve")]
    Serve {
        #[command(flatten)]
        command: commands::ServeCommand,
    },

    /// Update the catalog database schema
    #[command(name = "update")]
    Update {
        #[command(flatten)]
        command: commands::UpdateCommand,
    },

    /// Seed the demo catalog
    #[command(name = "seed")]
    Seed {
        #[command(flatten)]
        command: commands::SeedCommand,
    },

    /// Register twin descriptors from a directory tree
    #[command(name = "scan")]
    Scan {
        #[command(flatten)]
        command: commands::ScanCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let configured = configured_logging(cli.config.as_deref());
    let level = cli
        .log_level
        .clone()
        .or_else(|| configured.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured.map(|l| l.format))
        .unwrap_or_else(|| "text".to_string());
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Serve { command }) => commands::serve::execute(command, cli.config).await,
        Some(Commands::Update { command }) => commands::update::execute(command, cli.config).await,
        Some(Commands::Seed { command }) => commands::seed::execute(command, cli.config).await,
        Some(Commands::Scan { command }) => commands::scan::execute(command, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Logging section of the config file, read before the subscriber exists.
/// Load errors are reported later by the command itself.
fn configured_logging(path: Option<&Path>) -> Option<LoggingConfig> {
    RegistryConfigManifest::load_or_default(path.map(Path::to_path_buf))
        .ok()?
        .spec
        .observability?
        .logging
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
