// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Card Reconciler
//!
//! Keeps exactly one portal card per twin. Runs inside the registry's write
//! transaction after every twin write (upsert, partial update, soft detach):
//!
//! 1. lock the twin id and load its linked cards in canonical order
//! 2. with no linked card, adopt an unlinked card named like the twin or
//!    create a fresh one
//! 3. merge duplicates into the canonical card, carrying every grant over
//! 4. refresh the canonical card's name and URL
//! 5. optionally grant an ungranted card to every known user
//!
//! Duplicates appear when two writers for a brand-new twin each created a
//! card before either committed; whichever reconciliation runs next folds
//! them back together.
//!
//! [`CardReconciler::reconcile_best_effort`] wraps a pass in a savepoint so
//! a failure rolls back the card changes only and never fails the catalog
//! write that triggered it.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Portal card lifecycle driven by twin writes

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::portal::{CardId, PortalCard};
use crate::domain::repository::{CatalogTransaction, RepositoryError};
use crate::domain::twin::Twin;
use crate::infrastructure::metrics;

const SAVEPOINT: &str = "card_reconcile";

/// Grant policy applied to cards left without any grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapPolicy {
    /// Grant the card to every known user. Demo environments only.
    pub grant_all_on_empty_card: bool,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub card_id: Option<CardId>,
    pub created: bool,
    pub linked_by_name: bool,
    pub refreshed: bool,
    pub duplicates_merged: usize,
    pub grants_moved: usize,
    pub bootstrap_grants: usize,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        if self.created {
            "created"
        } else if self.linked_by_name {
            "linked"
        } else if self.duplicates_merged > 0 {
            "merged"
        } else if self.refreshed {
            "refreshed"
        } else {
            "unchanged"
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CardReconciler {
    policy: BootstrapPolicy,
}

impl CardReconciler {
    pub fn new(policy: BootstrapPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BootstrapPolicy {
        self.policy
    }

    /// Reconcile inside a savepoint. Failures are logged, counted and rolled
    /// back to the savepoint; the surrounding transaction stays usable.
    pub async fn reconcile_best_effort(
        &self,
        tx: &mut dyn CatalogTransaction,
        twin: &Twin,
    ) -> Option<ReconcileOutcome> {
        if let Err(e) = tx.savepoint(SAVEPOINT).await {
            warn!(twin_id = %twin.twin_id, error = %e, "Card reconciliation skipped: savepoint failed");
            metrics::record_reconcile("failed", 0);
            return None;
        }

        match self.reconcile(tx, twin).await {
            Ok(outcome) => {
                if let Err(e) = tx.release_savepoint(SAVEPOINT).await {
                    warn!(twin_id = %twin.twin_id, error = %e, "Failed to release reconcile savepoint");
                }
                metrics::record_reconcile(outcome.label(), outcome.duplicates_merged);
                Some(outcome)
            }
            Err(e) => {
                warn!(twin_id = %twin.twin_id, error = %e, "Card reconciliation failed; card left stale");
                metrics::record_reconcile("failed", 0);
                if let Err(rollback) = tx.rollback_to_savepoint(SAVEPOINT).await {
                    warn!(twin_id = %twin.twin_id, error = %rollback, "Failed to roll back reconcile savepoint");
                }
                None
            }
        }
    }

    /// One reconciliation pass for `twin`. Errors propagate.
    pub async fn reconcile(
        &self,
        tx: &mut dyn CatalogTransaction,
        twin: &Twin,
    ) -> Result<ReconcileOutcome, RepositoryError> {
        tx.lock_twin(&twin.twin_id).await?;

        let mut outcome = ReconcileOutcome::default();
        let display_name = twin.display_name().to_string();
        let endpoint = twin.endpoint().map(str::to_string);

        let mut linked = tx.cards_linked_to(&twin.twin_id).await?;
        let (mut canonical, duplicates) = if linked.is_empty() {
            (self.adopt_or_create(tx, twin, &mut outcome).await?, Vec::new())
        } else {
            let rest = linked.split_off(1);
            (linked.remove(0), rest)
        };

        for duplicate in duplicates {
            let moved = tx.move_card_grants(duplicate.card_id, canonical.card_id).await?;
            tx.delete_card(duplicate.card_id).await?;
            info!(
                twin_id = %twin.twin_id,
                canonical = %canonical.card_id,
                duplicate = %duplicate.card_id,
                grants_moved = moved,
                "Merged duplicate portal card"
            );
            outcome.duplicates_merged += 1;
            outcome.grants_moved += moved;
        }

        let mut changed = false;
        if canonical.name != display_name {
            canonical.name = display_name;
            changed = true;
        }
        // A twin without an endpoint never blanks an existing card URL.
        if let Some(endpoint) = endpoint {
            if canonical.url != endpoint {
                canonical.url = endpoint;
                changed = true;
            }
        }
        if changed && !outcome.created {
            canonical.updated_at = Utc::now();
            tx.save_card(&canonical).await?;
            outcome.refreshed = true;
        }

        if self.policy.grant_all_on_empty_card && tx.card_grantees(canonical.card_id).await?.is_empty() {
            for user in tx.list_user_ids().await? {
                if tx.grant_card(user, canonical.card_id).await? {
                    outcome.bootstrap_grants += 1;
                }
            }
            if outcome.bootstrap_grants > 0 {
                info!(
                    card_id = %canonical.card_id,
                    grants = outcome.bootstrap_grants,
                    "Bootstrap policy granted card to all users"
                );
            }
        }

        outcome.card_id = Some(canonical.card_id);
        debug!(twin_id = %twin.twin_id, ?outcome, "Card reconciled");
        Ok(outcome)
    }

    async fn adopt_or_create(
        &self,
        tx: &mut dyn CatalogTransaction,
        twin: &Twin,
        outcome: &mut ReconcileOutcome,
    ) -> Result<PortalCard, RepositoryError> {
        let display_name = twin.display_name();

        if let Some(mut card) = tx.find_unlinked_card_by_name(display_name).await? {
            card.linked_twin = Some(twin.twin_id.clone());
            card.updated_at = Utc::now();
            tx.save_card(&card).await?;
            outcome.linked_by_name = true;
            info!(twin_id = %twin.twin_id, card_id = %card.card_id, "Linked existing portal card by name");
            return Ok(card);
        }

        let card = PortalCard::new(
            display_name,
            twin.endpoint().unwrap_or_default(),
            Some(twin.twin_id.clone()),
        );
        tx.save_card(&card).await?;
        outcome.created = true;
        info!(twin_id = %twin.twin_id, card_id = %card.card_id, "Created portal card");
        Ok(card)
    }
}
