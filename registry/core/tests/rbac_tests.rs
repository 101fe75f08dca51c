// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Integration tests for visibility resolution over a populated catalog.

use dtp_core::application::card_reconciler::CardReconciler;
use dtp_core::application::rbac_resolver::RbacResolver;
use dtp_core::application::registry::{Registry, UpsertTwin};
use dtp_core::domain::error::CatalogError;
use dtp_core::domain::portal::{PortalCard, User};
use dtp_core::domain::rbac::{Caller, Scope};
use dtp_core::domain::repository::CatalogStore;
use dtp_core::domain::service::NewService;
use dtp_core::domain::twin::{Interfaces, TwinFilter, TwinId};
use dtp_core::infrastructure::event_bus::EventBus;
use dtp_core::infrastructure::repositories::InMemoryCatalogStore;
use std::sync::Arc;

struct Fixture {
    store: Arc<dyn CatalogStore>,
    registry: Registry,
    rbac: RbacResolver,
    staff: Caller,
    viewer: Caller,
}

async fn fixture() -> Fixture {
    let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    let registry = Registry::new(
        store.clone(),
        CardReconciler::default(),
        EventBus::with_default_capacity(),
        "demo",
    );

    let staff = User::new("admin@example.com", None, true);
    let viewer = User::new("demo@example.com", None, false);
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&staff).await.unwrap();
    tx.insert_user(&viewer).await.unwrap();
    tx.commit().await.unwrap();

    for (id, api) in [
        ("dt:Lift_001", Some("http://localhost:3001")),
        ("dt:EnergyHVAC_001", Some("http://localhost:3002/")),
        ("dt:RoomSensor_101", None),
    ] {
        let mut request = UpsertTwin::new(id);
        request.interfaces = Some(Interfaces {
            api: api.map(str::to_string),
            ..Default::default()
        });
        registry.upsert(request).await.unwrap();
    }

    Fixture {
        rbac: RbacResolver::new(store.clone()),
        store,
        registry,
        staff: Caller::from(&staff),
        viewer: Caller::from(&viewer),
    }
}

impl Fixture {
    async fn card_for(&self, twin: &str) -> PortalCard {
        self.store
            .list_cards()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.linked_twin.as_ref().is_some_and(|t| t.as_str() == twin))
            .unwrap()
    }

    async fn grant(&self, caller: &Caller, card: &PortalCard) {
        let mut tx = self.store.begin().await.unwrap();
        tx.grant_card(caller.user_id, card.card_id).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn save_card(&self, card: &PortalCard) {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_card(card).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn visible_ids(&self, caller: &Caller, scope: Scope) -> Vec<String> {
        self.rbac
            .visible_twins(caller, scope, TwinFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.twin_id.0)
            .collect()
    }
}

#[tokio::test]
async fn test_caller_resolution() {
    let fx = fixture().await;
    assert_eq!(fx.rbac.caller("demo@example.com").await.unwrap(), fx.viewer);
    assert!(matches!(fx.rbac.caller("").await, Err(CatalogError::Unauthorized(_))));
    assert!(matches!(
        fx.rbac.caller("ghost@example.com").await,
        Err(CatalogError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_user_without_grants_sees_nothing() {
    let fx = fixture().await;
    assert!(fx.visible_ids(&fx.viewer, Scope::All).await.is_empty());
    assert!(fx.visible_ids(&fx.viewer, Scope::Mine).await.is_empty());
}

#[tokio::test]
async fn test_staff_scope_all_is_unfiltered_but_mine_is_not() {
    let fx = fixture().await;
    assert_eq!(fx.visible_ids(&fx.staff, Scope::All).await.len(), 3);
    assert!(fx.visible_ids(&fx.staff, Scope::Mine).await.is_empty());

    fx.grant(&fx.staff, &fx.card_for("dt:Lift_001").await).await;
    assert_eq!(fx.visible_ids(&fx.staff, Scope::Mine).await, vec!["dt:Lift_001"]);
}

#[tokio::test]
async fn test_linked_card_grant_exposes_twin() {
    let fx = fixture().await;
    fx.grant(&fx.viewer, &fx.card_for("dt:RoomSensor_101").await).await;
    assert_eq!(fx.visible_ids(&fx.viewer, Scope::All).await, vec!["dt:RoomSensor_101"]);
}

#[tokio::test]
async fn test_card_url_matches_twin_endpoint() {
    let fx = fixture().await;
    let card = PortalCard::new("Energy dashboard", "http://localhost:3002", None);
    fx.save_card(&card).await;
    fx.grant(&fx.viewer, &card).await;

    // Trailing slash on the twin endpoint is ignored.
    assert_eq!(fx.visible_ids(&fx.viewer, Scope::All).await, vec!["dt:EnergyHVAC_001"]);
}

#[tokio::test]
async fn test_legacy_card_name_matches_twin_id() {
    let fx = fixture().await;
    let card = PortalCard::new("dt:RoomSensor_101", "", None);
    fx.save_card(&card).await;
    fx.grant(&fx.viewer, &card).await;

    assert_eq!(fx.visible_ids(&fx.viewer, Scope::All).await, vec!["dt:RoomSensor_101"]);
}

#[tokio::test]
async fn test_invisible_twin_reads_as_not_found() {
    let fx = fixture().await;
    let err = fx
        .rbac
        .visible_twin(&fx.viewer, &TwinId::from("dt:Lift_001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotFound(_)));

    let twin = fx
        .rbac
        .visible_twin(&fx.staff, &TwinId::from("dt:Lift_001"))
        .await
        .unwrap();
    assert_eq!(twin.twin_id.as_str(), "dt:Lift_001");
}

#[tokio::test]
async fn test_service_visibility_paths() {
    let fx = fixture().await;
    let register = |name: &str, api: Option<&str>, twin: Option<&str>| NewService {
        category: Some("analytics".into()),
        interfaces: Some(Interfaces {
            api: api.map(str::to_string),
            ..Default::default()
        }),
        name: Some(name.to_string()),
        twin_ref: twin.map(TwinId::from),
        ..Default::default()
    };

    let attached = fx
        .registry
        .register_service(register("lift-analytics", None, Some("dt:Lift_001")))
        .await
        .unwrap();
    let same_url = fx
        .registry
        .register_service(register("lift-ui", Some("http://localhost:3001/"), None))
        .await
        .unwrap();
    let granted = fx
        .registry
        .register_service(register("grafana", Some("http://localhost:3000"), None))
        .await
        .unwrap();
    fx.registry
        .register_service(register("hidden", Some("http://localhost:9999"), None))
        .await
        .unwrap();

    fx.grant(&fx.viewer, &fx.card_for("dt:Lift_001").await).await;
    let mut tx = fx.store.begin().await.unwrap();
    tx.grant_service(fx.viewer.user_id, granted.service_id).await.unwrap();
    tx.commit().await.unwrap();

    let mut names: Vec<String> = fx
        .rbac
        .visible_services(&fx.viewer, Scope::All, None)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["grafana", "lift-analytics", "lift-ui"]);
    assert_ne!(attached.service_id, same_url.service_id);

    let all = fx.rbac.visible_services(&fx.staff, Scope::All, None).await.unwrap();
    assert_eq!(all.len(), 4);
}
