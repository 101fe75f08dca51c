// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Portal users, cards and grants.
//!
//! A portal card is the UI entry point for a dashboard. Cards may point back
//! at a twin (`linked_twin`); the card reconciler keeps at most one card per
//! linked twin. Grants are the only unit of visibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::service::ServiceId;
use crate::domain::twin::TwinId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub Uuid);

impl CardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry in the user directory. Authentication happens upstream; the
/// registry only needs the identity and the staff flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, email: Option<String>, is_staff: bool) -> Self {
        let username = username.into();
        let email = email
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| username.clone());
        Self {
            user_id: UserId::new(),
            username,
            email,
            is_staff,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalCard {
    pub card_id: CardId,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_twin: Option<TwinId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PortalCard {
    pub fn new(name: impl Into<String>, url: impl Into<String>, linked_twin: Option<TwinId>) -> Self {
        let now = Utc::now();
        Self {
            card_id: CardId::new(),
            name: name.into(),
            url: url.into(),
            linked_twin,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical ordering among cards linked to the same twin.
    pub fn canonical_key(&self) -> (DateTime<Utc>, CardId) {
        (self.created_at, self.card_id)
    }
}

/// (user, card) visibility relation, unique on the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardGrant {
    pub user_id: UserId,
    pub card_id: CardId,
}

/// (user, service) visibility relation, unique on the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceGrant {
    pub user_id: UserId,
    pub service_id: ServiceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCard {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub linked_twin: Option<TwinId>,
}
