// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Catalog Store Implementations
//!
//! Infrastructure implementations of the catalog store contract defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve twins, services, cards, grants and events
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresCatalogStore** - production store; per-twin advisory locks,
//!   row locks on linked cards, savepoints for reconciliation
//! - **InMemoryCatalogStore** - development and test store; write
//!   transactions work on a private copy of the tables and are serialized
//!   by a single writer lock, so commit publishes atomically and dropping a
//!   transaction discards its changes. Events are buffered per transaction
//!   and appended to the shared log on commit.
//!
//! The in-memory read methods never touch the writer lock. Code holding an
//! open transaction may still read committed state through the store.

pub mod postgres_catalog;

pub use postgres_catalog::PostgresCatalogStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::events::{CatalogEvent, NewCatalogEvent};
use crate::domain::portal::{CardGrant, CardId, PortalCard, ServiceGrant, User, UserId};
use crate::domain::repository::{CatalogStore, CatalogTransaction, RepositoryError};
use crate::domain::service::{Service, ServiceId};
use crate::domain::twin::{Twin, TwinFilter, TwinId};

/// Mutable catalog tables. Write transactions work on a copy of these.
#[derive(Debug, Clone, Default)]
struct CatalogTables {
    twins: BTreeMap<TwinId, Twin>,
    services: HashMap<ServiceId, Service>,
    users: HashMap<UserId, User>,
    cards: HashMap<CardId, PortalCard>,
    card_grants: HashSet<CardGrant>,
    service_grants: HashSet<ServiceGrant>,
    bootstrap: HashSet<String>,
}

impl CatalogTables {
    fn sorted_cards<'a>(cards: impl Iterator<Item = &'a PortalCard>) -> Vec<PortalCard> {
        let mut cards: Vec<PortalCard> = cards.cloned().collect();
        cards.sort_by_key(PortalCard::canonical_key);
        cards
    }
}

/// Committed state. The event log is append-only and never copied into a
/// transaction; new events are buffered and appended on commit.
#[derive(Debug, Default)]
struct CatalogState {
    tables: CatalogTables,
    events: Vec<CatalogEvent>,
}

#[derive(Clone, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<RwLock<CatalogState>>,
    writer: Arc<Mutex<()>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, RepositoryError> {
        let guard = self.writer.clone().lock_owned().await;
        let (working, last_event) = {
            let state = self.state.read();
            (state.tables.clone(), state.events.last().cloned())
        };
        Ok(Box::new(InMemoryTransaction {
            _guard: guard,
            shared: self.state.clone(),
            working,
            last_event,
            pending_events: Vec::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn find_twin(&self, id: &TwinId) -> Result<Option<Twin>, RepositoryError> {
        Ok(self.state.read().tables.twins.get(id).cloned())
    }

    fn stream_twins(&self, filter: TwinFilter) -> BoxStream<'_, Result<Twin, RepositoryError>> {
        let matching: Vec<Twin> = self
            .state
            .read()
            .tables
            .twins
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        stream::iter(matching.into_iter().map(Ok)).boxed()
    }

    async fn list_services(&self, tenant: Option<&str>) -> Result<Vec<Service>, RepositoryError> {
        let state = self.state.read();
        let mut services: Vec<Service> = state
            .tables
            .services
            .values()
            .filter(|s| tenant.is_none_or(|t| s.tenant == t))
            .cloned()
            .collect();
        services.sort_by_key(|s| (s.created_at, s.service_id.0));
        Ok(services)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().tables.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let mut users: Vec<User> = self.state.read().tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn find_card(&self, id: CardId) -> Result<Option<PortalCard>, RepositoryError> {
        Ok(self.state.read().tables.cards.get(&id).cloned())
    }

    async fn list_cards(&self) -> Result<Vec<PortalCard>, RepositoryError> {
        Ok(CatalogTables::sorted_cards(self.state.read().tables.cards.values()))
    }

    async fn cards_granted_to(&self, user: UserId) -> Result<Vec<PortalCard>, RepositoryError> {
        let state = self.state.read();
        let tables = &state.tables;
        Ok(CatalogTables::sorted_cards(
            tables
                .card_grants
                .iter()
                .filter(|g| g.user_id == user)
                .filter_map(|g| tables.cards.get(&g.card_id)),
        ))
    }

    async fn services_granted_to(&self, user: UserId) -> Result<Vec<ServiceId>, RepositoryError> {
        Ok(self
            .state
            .read()
            .tables
            .service_grants
            .iter()
            .filter(|g| g.user_id == user)
            .map(|g| g.service_id)
            .collect())
    }

    async fn list_card_grants(&self, user: Option<UserId>) -> Result<Vec<CardGrant>, RepositoryError> {
        Ok(self
            .state
            .read()
            .tables
            .card_grants
            .iter()
            .filter(|g| user.is_none_or(|u| g.user_id == u))
            .copied()
            .collect())
    }

    async fn list_service_grants(&self, user: Option<UserId>) -> Result<Vec<ServiceGrant>, RepositoryError> {
        Ok(self
            .state
            .read()
            .tables
            .service_grants
            .iter()
            .filter(|g| user.is_none_or(|u| g.user_id == u))
            .copied()
            .collect())
    }

    async fn events_since(
        &self,
        tenant: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogEvent>, RepositoryError> {
        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.tenant == tenant && e.created_at > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn bootstrap_applied(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.state.read().tables.bootstrap.contains(key))
    }
}

/// Write transaction over a private copy of the catalog tables.
pub struct InMemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    shared: Arc<RwLock<CatalogState>>,
    working: CatalogTables,
    /// Last committed event when the transaction began
    last_event: Option<CatalogEvent>,
    pending_events: Vec<CatalogEvent>,
    /// Name, tables and pending event count at each savepoint
    savepoints: Vec<(&'static str, CatalogTables, usize)>,
}

impl InMemoryTransaction {
    fn latest_event(&self) -> Option<&CatalogEvent> {
        self.pending_events.last().or(self.last_event.as_ref())
    }

    fn next_event_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.latest_event() {
            Some(last) if last.created_at >= now => last.created_at + Duration::microseconds(1),
            _ => now,
        }
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, RepositoryError> {
        self.savepoints
            .iter()
            .rposition(|(n, _, _)| *n == name)
            .ok_or_else(|| RepositoryError::Database(format!("no savepoint named {}", name)))
    }
}

#[async_trait]
impl CatalogTransaction for InMemoryTransaction {
    async fn lock_twin(&mut self, _id: &TwinId) -> Result<(), RepositoryError> {
        // The writer lock already serializes every transaction.
        Ok(())
    }

    async fn find_twin(&mut self, id: &TwinId) -> Result<Option<Twin>, RepositoryError> {
        Ok(self.working.twins.get(id).cloned())
    }

    async fn save_twin(&mut self, twin: &Twin) -> Result<bool, RepositoryError> {
        Ok(self
            .working
            .twins
            .insert(twin.twin_id.clone(), twin.clone())
            .is_none())
    }

    async fn delete_twin(&mut self, id: &TwinId) -> Result<bool, RepositoryError> {
        Ok(self.working.twins.remove(id).is_some())
    }

    async fn save_service(&mut self, service: &Service) -> Result<(), RepositoryError> {
        self.working.services.insert(service.service_id, service.clone());
        Ok(())
    }

    async fn cards_linked_to(&mut self, id: &TwinId) -> Result<Vec<PortalCard>, RepositoryError> {
        Ok(CatalogTables::sorted_cards(
            self.working
                .cards
                .values()
                .filter(|c| c.linked_twin.as_ref() == Some(id)),
        ))
    }

    async fn find_unlinked_card_by_name(&mut self, name: &str) -> Result<Option<PortalCard>, RepositoryError> {
        Ok(CatalogTables::sorted_cards(
            self.working
                .cards
                .values()
                .filter(|c| c.linked_twin.is_none() && c.name == name),
        )
        .into_iter()
        .next())
    }

    async fn save_card(&mut self, card: &PortalCard) -> Result<(), RepositoryError> {
        self.working.cards.insert(card.card_id, card.clone());
        Ok(())
    }

    async fn delete_card(&mut self, id: CardId) -> Result<bool, RepositoryError> {
        self.working.card_grants.retain(|g| g.card_id != id);
        Ok(self.working.cards.remove(&id).is_some())
    }

    async fn card_grantees(&mut self, card: CardId) -> Result<Vec<UserId>, RepositoryError> {
        let mut users: Vec<UserId> = self
            .working
            .card_grants
            .iter()
            .filter(|g| g.card_id == card)
            .map(|g| g.user_id)
            .collect();
        users.sort();
        Ok(users)
    }

    async fn grant_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError> {
        if !self.working.users.contains_key(&user) {
            return Err(RepositoryError::NotFound(format!("user {}", user)));
        }
        if !self.working.cards.contains_key(&card) {
            return Err(RepositoryError::NotFound(format!("card {}", card)));
        }
        Ok(self.working.card_grants.insert(CardGrant { user_id: user, card_id: card }))
    }

    async fn revoke_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError> {
        Ok(self
            .working
            .card_grants
            .remove(&CardGrant { user_id: user, card_id: card }))
    }

    async fn move_card_grants(&mut self, from: CardId, to: CardId) -> Result<usize, RepositoryError> {
        let moving: Vec<UserId> = self
            .working
            .card_grants
            .iter()
            .filter(|g| g.card_id == from)
            .map(|g| g.user_id)
            .collect();

        let mut created = 0;
        for user_id in moving {
            self.working.card_grants.remove(&CardGrant { user_id, card_id: from });
            if self.working.card_grants.insert(CardGrant { user_id, card_id: to }) {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn service_grantees(&mut self, service: ServiceId) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self
            .working
            .service_grants
            .iter()
            .filter(|g| g.service_id == service)
            .map(|g| g.user_id)
            .collect())
    }

    async fn grant_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError> {
        if !self.working.users.contains_key(&user) {
            return Err(RepositoryError::NotFound(format!("user {}", user)));
        }
        if !self.working.services.contains_key(&service) {
            return Err(RepositoryError::NotFound(format!("service {}", service)));
        }
        Ok(self.working.service_grants.insert(ServiceGrant {
            user_id: user,
            service_id: service,
        }))
    }

    async fn revoke_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError> {
        Ok(self.working.service_grants.remove(&ServiceGrant {
            user_id: user,
            service_id: service,
        }))
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        if self.working.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        self.working.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn delete_user(&mut self, id: UserId) -> Result<bool, RepositoryError> {
        self.working.card_grants.retain(|g| g.user_id != id);
        self.working.service_grants.retain(|g| g.user_id != id);
        Ok(self.working.users.remove(&id).is_some())
    }

    async fn list_user_ids(&mut self) -> Result<Vec<UserId>, RepositoryError> {
        let mut ids: Vec<UserId> = self.working.users.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_event(&mut self, event: &NewCatalogEvent) -> Result<CatalogEvent, RepositoryError> {
        let created_at = self.next_event_timestamp();
        let event_id = self.latest_event().map_or(1, |e| e.event_id + 1);
        let stored = CatalogEvent {
            event_id,
            tenant: event.tenant.clone(),
            event_type: event.event_type,
            payload: event.payload.clone(),
            created_at,
        };
        self.pending_events.push(stored.clone());
        Ok(stored)
    }

    async fn mark_bootstrap(&mut self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.working.bootstrap.insert(key.to_string()))
    }

    async fn savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        self.savepoints
            .push((name, self.working.clone(), self.pending_events.len()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        let at = self.savepoint_index(name)?;
        // Rolling back keeps the savepoint itself, as in SQL.
        self.savepoints.truncate(at + 1);
        let (_, tables, pending) = &self.savepoints[at];
        self.working = tables.clone();
        self.pending_events.truncate(*pending);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        let at = self.savepoint_index(name)?;
        self.savepoints.truncate(at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let this = *self;
        let mut shared = this.shared.write();
        shared.tables = this.working;
        shared.events.extend(this.pending_events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NewCatalogEvent;

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = InMemoryCatalogStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.save_twin(&Twin::new(TwinId::from("dt:Lift_001"), "demo"))
                .await
                .unwrap();
        }
        assert!(store.find_twin(&TwinId::from("dt:Lift_001")).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        let created = tx
            .save_twin(&Twin::new(TwinId::from("dt:Lift_001"), "demo"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(created);
        assert!(store.find_twin(&TwinId::from("dt:Lift_001")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_savepoint_rollback_keeps_earlier_writes() {
        let store = InMemoryCatalogStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save_twin(&Twin::new(TwinId::from("dt:A"), "demo")).await.unwrap();

        tx.savepoint("inner").await.unwrap();
        tx.save_twin(&Twin::new(TwinId::from("dt:B"), "demo")).await.unwrap();
        tx.rollback_to_savepoint("inner").await.unwrap();
        tx.release_savepoint("inner").await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.find_twin(&TwinId::from("dt:A")).await.unwrap().is_some());
        assert!(store.find_twin(&TwinId::from("dt:B")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_are_buffered_until_commit() {
        let store = InMemoryCatalogStore::new();
        let epoch = DateTime::<Utc>::MIN_UTC;

        let mut tx = store.begin().await.unwrap();
        let kept = tx
            .append_event(&NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:A")))
            .await
            .unwrap();
        tx.savepoint("inner").await.unwrap();
        tx.append_event(&NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:B")))
            .await
            .unwrap();
        tx.rollback_to_savepoint("inner").await.unwrap();
        tx.release_savepoint("inner").await.unwrap();
        assert!(store.events_since("demo", epoch, 10).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let events = store.events_since("demo", epoch, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, kept.event_id);

        // Ids and timestamps continue from the committed log.
        let mut tx = store.begin().await.unwrap();
        let next = tx
            .append_event(&NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:C")))
            .await
            .unwrap();
        drop(tx);
        assert_eq!(next.event_id, kept.event_id + 1);
        assert!(next.created_at > kept.created_at);
        assert_eq!(store.events_since("demo", epoch, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_card_grants_unions_without_duplicates() {
        let store = InMemoryCatalogStore::new();
        let alice = User::new("alice", None, false);
        let bob = User::new("bob", None, false);
        let canonical = PortalCard::new("Lift", "", None);
        let duplicate = PortalCard::new("Lift", "", None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&alice).await.unwrap();
        tx.insert_user(&bob).await.unwrap();
        tx.save_card(&canonical).await.unwrap();
        tx.save_card(&duplicate).await.unwrap();
        tx.grant_card(alice.user_id, canonical.card_id).await.unwrap();
        tx.grant_card(alice.user_id, duplicate.card_id).await.unwrap();
        tx.grant_card(bob.user_id, duplicate.card_id).await.unwrap();

        let created = tx
            .move_card_grants(duplicate.card_id, canonical.card_id)
            .await
            .unwrap();
        assert_eq!(created, 1);

        let mut expected = vec![alice.user_id, bob.user_id];
        expected.sort();
        assert_eq!(tx.card_grantees(canonical.card_id).await.unwrap(), expected);
        assert!(tx.card_grantees(duplicate.card_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = InMemoryCatalogStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&User::new("demo", None, false)).await.unwrap();
        let err = tx.insert_user(&User::new("demo", None, true)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_event_timestamps_strictly_increase() {
        let store = InMemoryCatalogStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx
            .append_event(&NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:A")))
            .await
            .unwrap();
        let b = tx
            .append_event(&NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:B")))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(b.created_at > a.created_at);
        assert_eq!(b.event_id, a.event_id + 1);

        let tail = store.events_since("demo", a.created_at, 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_id, b.event_id);
    }
}
