// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Registry
//!
//! Create, replace, patch, detach and list catalog entries. Every twin write
//! runs in one catalog transaction:
//!
//! ```text
//! begin -> lock twin -> write twin -> reconcile card (savepoint) -> append event -> commit
//! ```
//!
//! so the entry, its portal card and its catalog event become visible
//! together. Committed events are then fanned out on the in-process
//! [`EventBus`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Catalog write path and lazy listing

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::application::card_reconciler::{CardReconciler, ReconcileOutcome};
use crate::domain::error::CatalogError;
use crate::domain::events::NewCatalogEvent;
use crate::domain::repository::{CatalogStore, CatalogTransaction};
use crate::domain::service::{NewService, Service, ServiceCategory, ServiceId};
use crate::domain::twin::{
    FieldPatch, Interfaces, Twin, TwinDependencies, TwinFilter, TwinId, TwinMetadata, TwinPatch,
    STATUS_DEPRECATED,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;

/// Upsert request. Omitted attribute bags keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertTwin {
    #[serde(default, alias = "@id")]
    pub twin_id: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub metadata: Option<TwinMetadata>,
    #[serde(default)]
    pub interfaces: Option<Interfaces>,
    #[serde(default)]
    pub dependencies: Option<TwinDependencies>,
}

impl UpsertTwin {
    pub fn new(twin_id: impl Into<String>) -> Self {
        Self {
            twin_id: twin_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    pub twin: Twin,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "detached", rename_all = "lowercase")]
pub enum DetachOutcome {
    /// Entry kept with status `deprecated`
    Soft { twin: Box<Twin> },
    /// Entry removed
    Hard { twin_id: TwinId },
}

pub struct Registry {
    store: Arc<dyn CatalogStore>,
    reconciler: CardReconciler,
    event_bus: EventBus,
    default_tenant: String,
}

impl Registry {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        reconciler: CardReconciler,
        event_bus: EventBus,
        default_tenant: impl Into<String>,
    ) -> Self {
        Self {
            store,
            reconciler,
            event_bus,
            default_tenant: default_tenant.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    fn tenant_or_default(&self, tenant: Option<String>) -> String {
        tenant
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.default_tenant.clone())
    }

    /// Create or replace a twin. Fields present in the request replace the
    /// stored ones; omitted fields are kept (or empty for a new twin).
    pub async fn upsert(&self, request: UpsertTwin) -> Result<UpsertResult, CatalogError> {
        let id = request.twin_id.trim();
        if id.is_empty() {
            return Err(CatalogError::Validation("twin id is required".to_string()));
        }
        let twin_id = TwinId::new(id);
        if let Some(tenant) = &request.tenant {
            reject_blank_tenant(tenant)?;
        }

        let mut tx = self.store.begin().await?;
        tx.lock_twin(&twin_id).await?;

        let existing = tx.find_twin(&twin_id).await?;
        let mut twin = existing
            .clone()
            .unwrap_or_else(|| Twin::new(twin_id.clone(), self.default_tenant.clone()));

        if request.tenant.is_some() || existing.is_none() {
            twin.tenant = self.tenant_or_default(request.tenant);
        }
        if let Some(metadata) = request.metadata {
            twin.metadata = metadata;
        }
        if let Some(interfaces) = request.interfaces {
            twin.interfaces = interfaces;
        }
        if let Some(dependencies) = request.dependencies {
            twin.dependencies = dependencies;
        }
        twin.updated_at = Utc::now();

        let created = tx.save_twin(&twin).await?;
        let card = self.reconciler.reconcile_best_effort(tx.as_mut(), &twin).await;
        self.append_and_commit(tx, NewCatalogEvent::twin_updated(&twin)?).await?;

        metrics::record_registry_write("upsert");
        info!(twin_id = %twin.twin_id, tenant = %twin.tenant, created, "Twin upserted");
        Ok(UpsertResult { twin, created, card })
    }

    /// Apply only the fields present in `patch`. `NotFound` when absent.
    pub async fn partial_update(&self, twin_id: &TwinId, patch: TwinPatch) -> Result<Twin, CatalogError> {
        if let FieldPatch::Set(tenant) = &patch.tenant {
            reject_blank_tenant(tenant)?;
        }

        let mut tx = self.store.begin().await?;
        tx.lock_twin(twin_id).await?;

        let mut twin = tx
            .find_twin(twin_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("twin {}", twin_id)))?;

        let default_tenant = self.default_tenant.clone();
        patch.tenant.apply(&mut twin.tenant, || default_tenant);
        twin.tenant = twin.tenant.trim().to_string();
        patch.metadata.apply(&mut twin.metadata, TwinMetadata::default);
        patch.interfaces.apply(&mut twin.interfaces, Interfaces::default);
        patch.dependencies.apply(&mut twin.dependencies, TwinDependencies::default);
        twin.updated_at = Utc::now();

        tx.save_twin(&twin).await?;
        self.reconciler.reconcile_best_effort(tx.as_mut(), &twin).await;
        self.append_and_commit(tx, NewCatalogEvent::twin_updated(&twin)?).await?;

        metrics::record_registry_write("patch");
        info!(twin_id = %twin.twin_id, "Twin partially updated");
        Ok(twin)
    }

    /// Soft detach flips the status to `deprecated`; hard detach deletes the
    /// entry. Portal cards are left alone on hard detach so a re-registered
    /// twin finds its card and grants again.
    pub async fn detach(&self, twin_id: &TwinId, soft: bool) -> Result<DetachOutcome, CatalogError> {
        let mut tx = self.store.begin().await?;
        tx.lock_twin(twin_id).await?;

        let mut twin = tx
            .find_twin(twin_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("twin {}", twin_id)))?;

        if soft {
            twin.metadata.status = Some(STATUS_DEPRECATED.to_string());
            twin.updated_at = Utc::now();
            tx.save_twin(&twin).await?;
            self.reconciler.reconcile_best_effort(tx.as_mut(), &twin).await;
            self.append_and_commit(tx, NewCatalogEvent::twin_updated(&twin)?).await?;

            metrics::record_registry_write("soft_detach");
            info!(twin_id = %twin_id, "Twin deprecated");
            Ok(DetachOutcome::Soft { twin: Box::new(twin) })
        } else {
            if !tx.delete_twin(twin_id).await? {
                return Err(CatalogError::NotFound(format!("twin {}", twin_id)));
            }
            self.append_and_commit(tx, NewCatalogEvent::twin_deleted(&twin.tenant, twin_id))
                .await?;

            metrics::record_registry_write("hard_detach");
            info!(twin_id = %twin_id, "Twin deleted");
            Ok(DetachOutcome::Hard { twin_id: twin_id.clone() })
        }
    }

    /// Register a companion service. Category and interfaces are required.
    pub async fn register_service(&self, request: NewService) -> Result<Service, CatalogError> {
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CatalogError::Validation("category is required".to_string()))?
            .parse::<ServiceCategory>()
            .map_err(|e| CatalogError::Validation(e.to_string()))?;
        let interfaces = request
            .interfaces
            .ok_or_else(|| CatalogError::Validation("interfaces are required".to_string()))?;

        let service_id = ServiceId::new();
        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| Service::default_name(category, &service_id));
        let now = Utc::now();
        let service = Service {
            service_id,
            name,
            tenant: self.tenant_or_default(request.tenant),
            category,
            interfaces,
            health: request.health.filter(|h| !h.trim().is_empty()),
            twin_ref: request.twin_ref.filter(|t| !t.as_str().trim().is_empty()),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.save_service(&service).await?;
        self.append_and_commit(tx, NewCatalogEvent::service_updated(&service)?)
            .await?;

        metrics::record_registry_write("register_service");
        info!(service_id = %service.service_id, category = %service.category, name = %service.name, "Service registered");
        Ok(service)
    }

    pub async fn get(&self, twin_id: &TwinId) -> Result<Twin, CatalogError> {
        self.store
            .find_twin(twin_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("twin {}", twin_id)))
    }

    /// Lazily stream twins matching `filter`, in twin id order.
    pub fn list(&self, filter: TwinFilter) -> BoxStream<'_, Result<Twin, CatalogError>> {
        self.store
            .stream_twins(filter)
            .map(|r| r.map_err(CatalogError::from))
            .boxed()
    }

    async fn append_and_commit(
        &self,
        mut tx: Box<dyn CatalogTransaction>,
        event: NewCatalogEvent,
    ) -> Result<(), CatalogError> {
        let stored = tx.append_event(&event).await?;
        tx.commit().await?;
        self.event_bus.publish(stored);
        Ok(())
    }
}

/// An explicit tenant must name one; omit it to get the default tenant.
fn reject_blank_tenant(tenant: &str) -> Result<(), CatalogError> {
    if tenant.trim().is_empty() {
        return Err(CatalogError::Validation("tenant cannot be blank".to_string()));
    }
    Ok(())
}
