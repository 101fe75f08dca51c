// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Twin scan command: registers every twin descriptor found under a root
//! directory (one twin per sub-directory).

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use dtp_core::application::twin_scanner::TwinScanner;
use dtp_core::infrastructure::event_bus::EventBus;

use super::{build_registry, load_config};

#[derive(Args)]
pub struct ScanCommand {
    /// Directory whose sub-directories hold twin descriptors
    #[arg(long, value_name = "DIR", default_value = "./twins")]
    root: PathBuf,
}

pub async fn execute(cmd: ScanCommand, config_path: Option<PathBuf>) -> Result<()> {
    if !cmd.root.is_dir() {
        bail!("{} is not a directory", cmd.root.display());
    }

    let config = load_config(config_path)?;
    let (_, registry) = build_registry(&config, EventBus::with_default_capacity()).await?;

    println!("Scanning {}...", cmd.root.display());
    let report = TwinScanner::new(registry)
        .scan(&cmd.root)
        .await
        .with_context(|| format!("Failed to scan {}", cmd.root.display()))?;

    for twin_id in &report.upserted {
        println!("  {} {}", "✓".green(), twin_id);
    }
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.folder.display(),
            failure.error
        );
    }

    let summary = format!(
        "{} twin(s) registered, {} folder(s) failed",
        report.upserted.len(),
        report.failures.len()
    );
    if report.failures.is_empty() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }

    Ok(())
}
