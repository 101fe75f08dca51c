// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Catalog Store Interfaces
//!
//! Persistence contract for the registry. Reads go straight to a
//! [`CatalogStore`]; every write happens inside a [`CatalogTransaction`]
//! obtained from [`CatalogStore::begin`], so a twin write, its card
//! reconciliation and its catalog event commit (or vanish) together.
//!
//! | Trait | Implementations |
//! |-------|----------------|
//! | `CatalogStore` | `InMemoryCatalogStore`, `PostgresCatalogStore` |
//! | `CatalogTransaction` | `InMemoryTransaction`, `PostgresTransaction` |
//!
//! ## Storage Backend Abstraction
//!
//! The concrete store is selected at startup from configuration
//! (`spec.database` in `dtp-config.yaml`). In-memory storage serves
//! development and tests; PostgreSQL serves production.
//!
//! ## Locking
//!
//! [`CatalogTransaction::lock_twin`] serializes all transactions touching the
//! same twin id until commit or rollback. Transactions for different twins
//! proceed independently (PostgreSQL) or are serialized wholesale
//! (in-memory). Dropping a transaction without committing rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::domain::events::{CatalogEvent, NewCatalogEvent};
use crate::domain::portal::{CardGrant, CardId, PortalCard, ServiceGrant, User, UserId};
use crate::domain::service::{Service, ServiceId};
use crate::domain::twin::{Twin, TwinFilter, TwinId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Read side of the catalog plus the entry point for write transactions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, RepositoryError>;

    async fn find_twin(&self, id: &TwinId) -> Result<Option<Twin>, RepositoryError>;

    /// Lazily stream twins matching `filter` in twin id order
    fn stream_twins(&self, filter: TwinFilter) -> BoxStream<'_, Result<Twin, RepositoryError>>;

    /// Services in registration order, optionally for one tenant
    async fn list_services(&self, tenant: Option<&str>) -> Result<Vec<Service>, RepositoryError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError>;

    async fn find_card(&self, id: CardId) -> Result<Option<PortalCard>, RepositoryError>;

    /// All cards in creation order
    async fn list_cards(&self) -> Result<Vec<PortalCard>, RepositoryError>;

    /// Cards the user holds a grant for
    async fn cards_granted_to(&self, user: UserId) -> Result<Vec<PortalCard>, RepositoryError>;

    /// Services the user holds a direct grant for
    async fn services_granted_to(&self, user: UserId) -> Result<Vec<ServiceId>, RepositoryError>;

    async fn list_card_grants(&self, user: Option<UserId>) -> Result<Vec<CardGrant>, RepositoryError>;

    async fn list_service_grants(&self, user: Option<UserId>) -> Result<Vec<ServiceGrant>, RepositoryError>;

    /// Events for `tenant` strictly newer than `after`, oldest first
    async fn events_since(
        &self,
        tenant: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogEvent>, RepositoryError>;

    /// Whether a one-time bootstrap step has been recorded
    async fn bootstrap_applied(&self, key: &str) -> Result<bool, RepositoryError>;
}

/// A single write transaction against the catalog.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Serialize with every other transaction locking the same twin id
    async fn lock_twin(&mut self, id: &TwinId) -> Result<(), RepositoryError>;

    async fn find_twin(&mut self, id: &TwinId) -> Result<Option<Twin>, RepositoryError>;

    /// Insert or replace; returns `true` when the row was inserted
    async fn save_twin(&mut self, twin: &Twin) -> Result<bool, RepositoryError>;

    /// Returns `false` when no such twin existed
    async fn delete_twin(&mut self, id: &TwinId) -> Result<bool, RepositoryError>;

    async fn save_service(&mut self, service: &Service) -> Result<(), RepositoryError>;

    /// Cards linked to the twin in canonical `(created_at, id)` order, row-locked
    async fn cards_linked_to(&mut self, id: &TwinId) -> Result<Vec<PortalCard>, RepositoryError>;

    /// Earliest card with no linked twin and exactly this name
    async fn find_unlinked_card_by_name(&mut self, name: &str) -> Result<Option<PortalCard>, RepositoryError>;

    /// Insert or replace
    async fn save_card(&mut self, card: &PortalCard) -> Result<(), RepositoryError>;

    /// Deletes the card and its grants
    async fn delete_card(&mut self, id: CardId) -> Result<bool, RepositoryError>;

    async fn card_grantees(&mut self, card: CardId) -> Result<Vec<UserId>, RepositoryError>;

    /// Idempotent; returns `true` when the grant was created
    async fn grant_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError>;

    async fn revoke_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError>;

    /// Re-point every grant on `from` to `to`, skipping users who already
    /// hold `to`. Returns the number of grants created on `to`.
    async fn move_card_grants(&mut self, from: CardId, to: CardId) -> Result<usize, RepositoryError>;

    async fn service_grantees(&mut self, service: ServiceId) -> Result<Vec<UserId>, RepositoryError>;

    async fn grant_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError>;

    async fn revoke_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError>;

    /// `Conflict` when the username is taken
    async fn insert_user(&mut self, user: &User) -> Result<(), RepositoryError>;

    /// Deletes the user and all their grants
    async fn delete_user(&mut self, id: UserId) -> Result<bool, RepositoryError>;

    async fn list_user_ids(&mut self) -> Result<Vec<UserId>, RepositoryError>;

    /// Append to the event log; the store assigns id and timestamp
    async fn append_event(&mut self, event: &NewCatalogEvent) -> Result<CatalogEvent, RepositoryError>;

    /// Record a one-time bootstrap step; `false` when already recorded
    async fn mark_bootstrap(&mut self, key: &str) -> Result<bool, RepositoryError>;

    async fn savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError>;

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError>;

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                RepositoryError::Conflict(db.message().to_string())
            }
            // Foreign key violation: the referenced user/card/service is gone
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23503") => {
                RepositoryError::NotFound(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
