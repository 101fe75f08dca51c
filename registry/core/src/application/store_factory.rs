// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Factory - Application Layer
//!
//! Picks the catalog store implementation from configuration. A configured
//! database selects PostgreSQL; otherwise the process runs on the in-memory
//! store and loses its catalog on exit.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::registry_config::{resolve_secret, RegistryConfigSpec};
use crate::domain::repository::{CatalogStore, PostgresConfig, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{InMemoryCatalogStore, PostgresCatalogStore};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Storage backend selected by `spec.database`
pub fn storage_backend(spec: &RegistryConfigSpec) -> Result<StorageBackend> {
    let Some(database) = &spec.database else {
        return Ok(StorageBackend::InMemory);
    };
    let connection_string = resolve_secret(&database.url)
        .with_context(|| format!("database url '{}' did not resolve", database.url))?;
    Ok(StorageBackend::PostgreSQL(PostgresConfig { connection_string }))
}

/// Creates the CatalogStore implementation for the configured backend
pub async fn create_catalog_store(spec: &RegistryConfigSpec) -> Result<Arc<dyn CatalogStore>> {
    match storage_backend(spec)? {
        StorageBackend::InMemory => {
            warn!("No database configured; using the in-memory catalog store");
            Ok(Arc::new(InMemoryCatalogStore::new()))
        }
        StorageBackend::PostgreSQL(config) => {
            let max_connections = spec
                .database
                .as_ref()
                .map_or(DEFAULT_MAX_CONNECTIONS, |d| d.max_connections);
            let db = Database::new(&config.connection_string, max_connections).await?;
            info!(max_connections, "Connected catalog store to PostgreSQL");
            Ok(Arc::new(PostgresCatalogStore::new(db.get_pool().clone())))
        }
    }
}
