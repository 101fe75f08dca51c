// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use dtp_core::domain::registry_config::RegistryConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./dtp-config.yaml)
        #[arg(short, long, default_value = "./dtp-config.yaml")]
        output: PathBuf,

        /// Demo settings: demo tenant, bootstrap grants, local backends
        #[arg(long)]
        demo: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, demo } => generate(output, demo),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = RegistryConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. DTP_CONFIG_PATH: {}",
            std::env::var("DTP_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./dtp-config.yaml");
        println!("  4. ~/.dtp/config.yaml");
        println!("  5. /etc/dtp/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Deployment:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!("  Default tenant: {}", spec.registry.default_tenant);
    println!();

    println!("{}", "Catalog store:".bold());
    match &spec.database {
        // Only the reference is shown; it may embed credentials.
        Some(db) if db.url.starts_with("env:") => {
            println!("  PostgreSQL ({}), pool {}", db.url, db.max_connections)
        }
        Some(db) => println!("  PostgreSQL (inline URL), pool {}", db.max_connections),
        None => println!("  In-memory {}", "(not persisted)".dimmed()),
    }
    println!();

    println!("{}", "Portal cards:".bold());
    println!(
        "  Grant all users on ungranted cards: {}",
        spec.bootstrap.grant_all_on_empty_card
    );
    println!();

    println!("{}", "Last data:".bold());
    println!("  Enabled: {}", spec.last_data.enabled);
    println!("  Interval: {}s", spec.last_data.interval_seconds);
    println!("  Lookup timeout: {}ms", spec.last_data.lookup_timeout_ms);
    println!("  Concurrency: {}", spec.last_data.concurrency);
    match &spec.backends.influx {
        Some(influx) => println!("  InfluxDB: {} (org {}, bucket {})", influx.url, influx.org, influx.bucket),
        None => println!("  InfluxDB: {}", "(not configured)".dimmed()),
    }
    match &spec.backends.timescale {
        Some(ts) => println!("  Observation store: {}", ts.url),
        None => println!("  Observation store: {}", "(not configured)".dimmed()),
    }
    println!();

    println!("{}", "Event tail:".bold());
    println!("  Poll interval: {}ms", spec.event_tail.poll_interval_ms);
    println!("  Lookback: {}s", spec.event_tail.lookback_seconds);
    println!("  Batch limit: {}", spec.event_tail.batch_limit);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = RegistryConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, demo: bool) -> Result<()> {
    let manifest = if demo {
        RegistryConfigManifest::demo()
    } else {
        RegistryConfigManifest::default()
    };

    manifest
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_demo_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dtp-config.yaml");

        generate(path.clone(), true).unwrap();
        let loaded = RegistryConfigManifest::from_yaml_file(&path).unwrap();

        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.spec.registry.default_tenant, "demo");
        assert!(loaded.spec.bootstrap.grant_all_on_empty_card);
        assert!(loaded.spec.backends.influx.is_some());
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "apiVersion: dtp.io/v1\nkind: NodeConfig\nmetadata:\n  name: x\n",
        )
        .unwrap();

        assert!(validate(Some(path)).is_err());
    }
}
