// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Visibility rules for twins and services.
//!
//! A caller's visibility is derived from the cards (and services) they hold
//! grants for. Cards reach twins two ways: an explicit `linked_twin`
//! reference, or a URL equal to the twin's declared endpoint. Both are
//! unioned into one [`AllowedSet`].

use serde::Deserialize;
use std::collections::HashSet;

use crate::domain::portal::{PortalCard, User, UserId};
use crate::domain::service::{Service, ServiceId};
use crate::domain::twin::{normalize_endpoint, Twin, TwinId};

/// Query hint controlling whether a staff caller is filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Mine,
    #[default]
    All,
}

/// Authenticated caller as resolved from the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub username: String,
    pub is_staff: bool,
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username.clone(),
            is_staff: user.is_staff,
        }
    }
}

impl Caller {
    /// Filtering is skipped only for staff asking for everything.
    pub fn is_filtered(&self, scope: Scope) -> bool {
        !self.is_staff || scope == Scope::Mine
    }
}

/// Everything a filtered caller may see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedSet {
    /// Twins reachable through a linked card or an endpoint match
    pub twin_ids: HashSet<TwinId>,
    /// Normalized URLs of granted cards
    pub urls: HashSet<String>,
    /// Display names of granted cards
    pub card_names: HashSet<String>,
    /// Services granted directly
    pub service_ids: HashSet<ServiceId>,
}

impl AllowedSet {
    /// Seed from granted cards: linked twins and card URLs.
    pub fn from_cards<'a>(cards: impl IntoIterator<Item = &'a PortalCard>) -> Self {
        let mut set = Self::default();
        for card in cards {
            if let Some(twin_id) = &card.linked_twin {
                set.twin_ids.insert(twin_id.clone());
            }
            let url = normalize_endpoint(&card.url);
            if !url.is_empty() {
                set.urls.insert(url.to_string());
            }
            set.card_names.insert(card.name.clone());
        }
        set
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceId>) -> Self {
        self.service_ids.extend(services);
        self
    }

    fn matches_url(&self, endpoint: Option<&str>) -> bool {
        endpoint
            .map(normalize_endpoint)
            .is_some_and(|e| !e.is_empty() && self.urls.contains(e))
    }

    /// Fold in twins whose endpoint matches a granted card URL.
    pub fn absorb_endpoint_match(&mut self, twin: &Twin) {
        if self.matches_url(twin.endpoint()) {
            self.twin_ids.insert(twin.twin_id.clone());
        }
    }

    pub fn allows_twin(&self, twin: &Twin) -> bool {
        self.twin_ids.contains(&twin.twin_id)
            || self.matches_url(twin.endpoint())
            || self.legacy_name_match(&twin.twin_id)
    }

    /// Legacy cards never linked to a twin are matched by name. A card whose
    /// name collides with an unrelated twin id exposes that twin.
    fn legacy_name_match(&self, twin_id: &TwinId) -> bool {
        self.card_names.contains(twin_id.as_str())
    }

    pub fn allows_service(&self, service: &Service) -> bool {
        self.service_ids.contains(&service.service_id)
            || service
                .twin_ref
                .as_ref()
                .is_some_and(|t| self.twin_ids.contains(t))
            || self.matches_url(service.endpoint())
    }
}

/// Result of visibility resolution for one caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Unrestricted,
    Restricted(AllowedSet),
}

impl Visibility {
    pub fn allows_twin(&self, twin: &Twin) -> bool {
        match self {
            Visibility::Unrestricted => true,
            Visibility::Restricted(set) => set.allows_twin(twin),
        }
    }

    pub fn allows_service(&self, service: &Service) -> bool {
        match self {
            Visibility::Unrestricted => true,
            Visibility::Restricted(set) => set.allows_service(service),
        }
    }
}
