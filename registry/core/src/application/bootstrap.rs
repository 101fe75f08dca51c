// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Demo Seeder
//!
//! One-time population of a demo deployment: portal users, portal cards,
//! sample twins and the core UI services. Application is recorded under the
//! bootstrap key [`DEMO_SEED_KEY`]; later runs are no-ops unless forced.
//!
//! Twins are written through the [`Registry`] so their cards are reconciled
//! and catalog events are emitted like any other write.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::application::registry::{Registry, UpsertTwin};
use crate::domain::error::CatalogError;
use crate::domain::portal::{PortalCard, User};
use crate::domain::service::{NewService, ServiceId};
use crate::domain::twin::{Interfaces, TwinDependencies, TwinId, TwinMetadata};

pub const DEMO_SEED_KEY: &str = "demo_seed";

const DEMO_TENANT: &str = "demo";
const DEMO_USER: &str = "demo@example.com";
const ADMIN_USER: &str = "admin@example.com";

const DEMO_CARDS: &[(&str, &str)] = &[
    ("Lift Maintenance", "http://localhost:3001"),
    ("Energy & HVAC", "http://localhost:3002"),
];

struct CoreService {
    name: &'static str,
    api: &'static str,
    health: Option<&'static str>,
}

const CORE_SERVICES: &[CoreService] = &[
    CoreService {
        name: "Django Admin",
        api: "http://localhost:8085/admin",
        health: Some("http://localhost:8085/api/healthz"),
    },
    CoreService {
        name: "Neo4j Browser",
        api: "http://localhost:7474",
        health: None,
    },
    CoreService {
        name: "InfluxDB",
        api: "http://localhost:8086",
        health: Some("http://localhost:8086/health"),
    },
    CoreService {
        name: "MinIO Console",
        api: "http://localhost:9101",
        health: None,
    },
    CoreService {
        name: "Twin Composer",
        api: "http://localhost:1880",
        health: None,
    },
];

/// What a seeding run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// `false` when the seed had already been applied and was skipped
    pub applied: bool,
    pub users_created: usize,
    pub cards_created: usize,
    pub twins_written: usize,
    pub services_registered: usize,
    pub card_grants: usize,
    pub service_grants: usize,
}

pub struct DemoSeeder {
    registry: Arc<Registry>,
}

impl DemoSeeder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Apply the demo seed. With `force`, re-apply even when already
    /// recorded and replace the seeded twins.
    pub async fn seed(&self, force: bool) -> Result<SeedReport, CatalogError> {
        let store = self.registry.store();
        if !force && store.bootstrap_applied(DEMO_SEED_KEY).await? {
            info!("Demo seed already applied; skipping");
            return Ok(SeedReport::default());
        }

        info!(force, "Applying demo seed");
        let mut report = SeedReport {
            applied: true,
            ..Default::default()
        };

        // Users and cards
        let mut new_users = Vec::new();
        for (username, is_staff) in [(DEMO_USER, false), (ADMIN_USER, true)] {
            if store.find_user_by_username(username).await?.is_none() {
                new_users.push(User::new(username, None, is_staff));
            }
        }
        let existing_cards: Vec<String> = store.list_cards().await?.into_iter().map(|c| c.name).collect();
        let new_cards: Vec<PortalCard> = DEMO_CARDS
            .iter()
            .filter(|(name, _)| !existing_cards.iter().any(|n| n == name))
            .map(|(name, url)| PortalCard::new(*name, *url, None))
            .collect();

        let mut tx = store.begin().await?;
        for user in &new_users {
            tx.insert_user(user).await?;
        }
        for card in &new_cards {
            tx.save_card(card).await?;
        }
        tx.commit().await?;
        report.users_created = new_users.len();
        report.cards_created = new_cards.len();

        // Twins, through the registry so cards get reconciled
        for request in demo_twins() {
            let id = TwinId::new(request.twin_id.clone());
            if force || store.find_twin(&id).await?.is_none() {
                self.registry.upsert(request).await?;
                report.twins_written += 1;
            }
        }

        // Core services
        let existing_services = store.list_services(None).await?;
        let mut core_ids: Vec<ServiceId> = Vec::new();
        for core in CORE_SERVICES {
            if let Some(found) = existing_services.iter().find(|s| s.name == core.name) {
                core_ids.push(found.service_id);
                continue;
            }
            let service = self
                .registry
                .register_service(NewService {
                    category: Some("UI".to_string()),
                    interfaces: Some(Interfaces {
                        api: Some(core.api.to_string()),
                        extra: BTreeMap::from([("public".to_string(), json!(true))]),
                        ..Default::default()
                    }),
                    name: Some(core.name.to_string()),
                    tenant: Some(DEMO_TENANT.to_string()),
                    health: core.health.map(str::to_string),
                    twin_ref: None,
                })
                .await?;
            core_ids.push(service.service_id);
            report.services_registered += 1;
        }

        // Grants for anything nobody can see yet
        let cards = store.list_cards().await?;
        let mut tx = store.begin().await?;
        let users = tx.list_user_ids().await?;
        for card in &cards {
            if tx.card_grantees(card.card_id).await?.is_empty() {
                for user in &users {
                    if tx.grant_card(*user, card.card_id).await? {
                        report.card_grants += 1;
                    }
                }
            }
        }
        for service_id in &core_ids {
            if tx.service_grantees(*service_id).await?.is_empty() {
                for user in &users {
                    if tx.grant_service(*user, *service_id).await? {
                        report.service_grants += 1;
                    }
                }
            }
        }
        tx.mark_bootstrap(DEMO_SEED_KEY).await?;
        tx.commit().await?;

        info!(?report, "Demo seed complete");
        Ok(report)
    }
}

fn demo_twin(id: &str, name: Option<&str>, domain: &[&str], stream: &str, api: &str) -> UpsertTwin {
    UpsertTwin {
        twin_id: id.to_string(),
        tenant: Some(DEMO_TENANT.to_string()),
        metadata: Some(TwinMetadata {
            status: Some("instantiated".to_string()),
            domain: domain.iter().map(|d| d.to_string()).collect(),
            name: name.map(str::to_string),
            ..Default::default()
        }),
        interfaces: Some(Interfaces {
            data_streams: vec![stream.to_string()],
            api: Some(api.to_string()),
            ..Default::default()
        }),
        dependencies: Some(TwinDependencies::default()),
    }
}

// Lift and energy twins carry their card's name so the seeded cards are
// adopted instead of duplicated.
fn demo_twins() -> Vec<UpsertTwin> {
    vec![
        demo_twin(
            "dt:Lift_001",
            Some("Lift Maintenance"),
            &["Lift"],
            "MQTT:dtp/lift/alerts",
            "http://localhost:3001",
        ),
        demo_twin(
            "dt:EnergyHVAC_001",
            Some("Energy & HVAC"),
            &["Energy", "HVAC"],
            "MQTT:dtp/energy_hvac/events",
            "http://localhost:3002",
        ),
        demo_twin(
            "dt:RoomSensor_101",
            None,
            &["Temperature"],
            "MQTT:dtp/sensors/room1/temp",
            "http://localhost:8086",
        ),
        demo_twin(
            "dt:RoomSensor_102",
            None,
            &["Temperature"],
            "MQTT:dtp/sensors/room2/temp",
            "http://localhost:8086",
        ),
    ]
}
