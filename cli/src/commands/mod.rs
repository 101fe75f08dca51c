// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the DTP registry CLI

pub mod config;
pub mod scan;
pub mod seed;
pub mod serve;
pub mod update;

pub use self::config::ConfigCommand;
pub use self::scan::ScanCommand;
pub use self::seed::SeedCommand;
pub use self::serve::ServeCommand;
pub use self::update::UpdateCommand;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use dtp_core::application::card_reconciler::{BootstrapPolicy, CardReconciler};
use dtp_core::application::registry::Registry;
use dtp_core::application::store_factory::create_catalog_store;
use dtp_core::domain::registry_config::RegistryConfigManifest;
use dtp_core::domain::repository::CatalogStore;
use dtp_core::infrastructure::event_bus::EventBus;

/// Load, override and validate the configuration
pub(crate) fn load_config(config_path: Option<PathBuf>) -> Result<RegistryConfigManifest> {
    let config =
        RegistryConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Catalog store and a registry on top of it, wired from configuration
pub(crate) async fn build_registry(
    config: &RegistryConfigManifest,
    event_bus: EventBus,
) -> Result<(Arc<dyn CatalogStore>, Arc<Registry>)> {
    let store = create_catalog_store(&config.spec)
        .await
        .context("Failed to open catalog store")?;
    let reconciler = CardReconciler::new(BootstrapPolicy {
        grant_all_on_empty_card: config.spec.bootstrap.grant_all_on_empty_card,
    });
    let registry = Arc::new(Registry::new(
        store.clone(),
        reconciler,
        event_bus,
        config.spec.registry.default_tenant.clone(),
    ));
    Ok((store, registry))
}
