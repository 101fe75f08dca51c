// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! RBAC Resolver
//!
//! Turns a caller identity into the twins and services they may see. Staff
//! asking for scope `all` see everything; everyone else is filtered through
//! an [`AllowedSet`] built from their grants. An empty grant set is an empty
//! result, never an error.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Visibility resolution over the catalog read path

use futures::TryStreamExt;
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::CatalogError;
use crate::domain::rbac::{AllowedSet, Caller, Scope, Visibility};
use crate::domain::repository::CatalogStore;
use crate::domain::service::Service;
use crate::domain::twin::{Twin, TwinFilter, TwinId};

#[derive(Clone)]
pub struct RbacResolver {
    store: Arc<dyn CatalogStore>,
}

impl RbacResolver {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Resolve an authenticated username against the user directory.
    pub async fn caller(&self, username: &str) -> Result<Caller, CatalogError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CatalogError::Unauthorized("missing caller identity".to_string()));
        }
        self.store
            .find_user_by_username(username)
            .await?
            .map(|u| Caller::from(&u))
            .ok_or_else(|| CatalogError::Unauthorized(format!("unknown user '{}'", username)))
    }

    /// Twin visibility for the caller.
    pub async fn visibility(&self, caller: &Caller, scope: Scope) -> Result<Visibility, CatalogError> {
        if !caller.is_filtered(scope) {
            return Ok(Visibility::Unrestricted);
        }
        let cards = self.store.cards_granted_to(caller.user_id).await?;
        let allowed = AllowedSet::from_cards(&cards);
        debug!(
            user = %caller.username,
            cards = cards.len(),
            linked_twins = allowed.twin_ids.len(),
            "Resolved twin visibility"
        );
        Ok(Visibility::Restricted(allowed))
    }

    /// Service visibility: direct service grants, plus services attached to
    /// a visible twin or sharing a granted card URL.
    pub async fn service_visibility(&self, caller: &Caller, scope: Scope) -> Result<Visibility, CatalogError> {
        let mut allowed = match self.visibility(caller, scope).await? {
            Visibility::Unrestricted => return Ok(Visibility::Unrestricted),
            Visibility::Restricted(allowed) => allowed,
        };

        if !allowed.urls.is_empty() {
            let mut twins = self.store.stream_twins(TwinFilter::default());
            while let Some(twin) = twins.try_next().await? {
                allowed.absorb_endpoint_match(&twin);
            }
        }

        let granted = self.store.services_granted_to(caller.user_id).await?;
        Ok(Visibility::Restricted(allowed.with_services(granted)))
    }

    pub async fn visible_twins(
        &self,
        caller: &Caller,
        scope: Scope,
        filter: TwinFilter,
    ) -> Result<Vec<Twin>, CatalogError> {
        let visibility = self.visibility(caller, scope).await?;
        let twins: Vec<Twin> = self
            .store
            .stream_twins(filter)
            .try_filter(|t| futures::future::ready(visibility.allows_twin(t)))
            .try_collect()
            .await?;
        Ok(twins)
    }

    /// A single twin; invisible twins are reported as not found.
    pub async fn visible_twin(&self, caller: &Caller, id: &TwinId) -> Result<Twin, CatalogError> {
        let twin = self
            .store
            .find_twin(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("twin {}", id)))?;
        if self.visibility(caller, Scope::All).await?.allows_twin(&twin) {
            Ok(twin)
        } else {
            Err(CatalogError::NotFound(format!("twin {}", id)))
        }
    }

    pub async fn visible_services(
        &self,
        caller: &Caller,
        scope: Scope,
        tenant: Option<&str>,
    ) -> Result<Vec<Service>, CatalogError> {
        let visibility = self.service_visibility(caller, scope).await?;
        let services = self.store.list_services(tenant).await?;
        Ok(services
            .into_iter()
            .filter(|s| visibility.allows_service(s))
            .collect())
    }
}
