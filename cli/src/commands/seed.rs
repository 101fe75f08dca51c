// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Demo seed command
//!
//! Populates the configured catalog with the demo users, portal cards,
//! sample twins and core services. The seed is recorded in the catalog and
//! runs once unless `--force` is given.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use dtp_core::application::bootstrap::{DemoSeeder, SeedReport};
use dtp_core::infrastructure::event_bus::EventBus;

use super::{build_registry, load_config};

#[derive(Args)]
pub struct SeedCommand {
    /// Re-apply the seed and replace the sample twins
    #[arg(long)]
    force: bool,
}

pub async fn execute(cmd: SeedCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.spec.database.is_none() {
        println!(
            "{}",
            "No database configured; the seed only lives for this process.".yellow()
        );
    }

    let (_, registry) = build_registry(&config, EventBus::with_default_capacity()).await?;
    let report = DemoSeeder::new(registry)
        .seed(cmd.force)
        .await
        .context("Demo seed failed")?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &SeedReport) {
    if !report.applied {
        println!(
            "{}",
            "Demo seed already applied. Use --force to re-apply.".yellow()
        );
        return;
    }

    println!("{}", "✓ Demo seed applied".green());
    println!("  Users created:       {}", report.users_created);
    println!("  Cards created:       {}", report.cards_created);
    println!("  Twins written:       {}", report.twins_written);
    println!("  Services registered: {}", report.services_registered);
    println!("  Card grants:         {}", report.card_grants);
    println!("  Service grants:      {}", report.service_grants);
}
