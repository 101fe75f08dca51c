// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Integration tests for the last-data cache against a mocked InfluxDB.

use dtp_core::application::card_reconciler::CardReconciler;
use dtp_core::application::last_data::LastDataCache;
use dtp_core::application::registry::{Registry, UpsertTwin};
use dtp_core::domain::freshness::{SOURCE_ALERT, SOURCE_ENERGY};
use dtp_core::domain::registry_config::{BackendsConfig, InfluxConfig, LastDataConfig};
use dtp_core::domain::repository::CatalogStore;
use dtp_core::domain::twin::{Interfaces, TwinId, TwinMetadata};
use dtp_core::infrastructure::event_bus::EventBus;
use dtp_core::infrastructure::repositories::InMemoryCatalogStore;
use dtp_core::infrastructure::timeseries::TimeSeriesBackends;
use mockito::Matcher;
use std::sync::Arc;
use std::time::Duration;

const ALERT_CSV: &str = "#datatype,string,long,dateTime:RFC3339\n\
#group,false,false,false\n\
#default,_result,,\n\
,result,table,_time\n\
,_result,0,2026-03-01T10:15:00Z\n";

const EMPTY_CSV: &str = "\r\n";

fn twin(id: &str, domains: &[&str], streams: &[&str]) -> UpsertTwin {
    let mut request = UpsertTwin::new(id);
    request.metadata = Some(TwinMetadata {
        domain: domains.iter().map(|d| d.to_string()).collect(),
        ..Default::default()
    });
    request.interfaces = Some(Interfaces {
        data_streams: streams.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    });
    request
}

async fn seeded(server_url: &str) -> LastDataCache {
    let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    let registry = Registry::new(
        store.clone(),
        CardReconciler::default(),
        EventBus::with_default_capacity(),
        "demo",
    );
    registry.upsert(twin("dt:Lift_001", &["Lift"], &[])).await.unwrap();
    registry
        .upsert(twin("dt:EnergyHVAC_001", &["Energy", "HVAC"], &[]))
        .await
        .unwrap();
    registry
        .upsert(twin("dt:RoomSensor_101", &["Temperature"], &["MQTT:dtp/sensors/room1/temp"]))
        .await
        .unwrap();
    registry.upsert(twin("dt:Gateway", &[], &[])).await.unwrap();

    let backends = TimeSeriesBackends::from_config(
        &BackendsConfig {
            influx: Some(InfluxConfig {
                url: server_url.to_string(),
                org: "dtp-org".to_string(),
                bucket: "signals".to_string(),
                token: Some("test-token".to_string()),
            }),
            timescale: None,
        },
        Duration::from_secs(2),
    )
    .unwrap();

    LastDataCache::new(store, Arc::new(backends), LastDataConfig::default())
}

#[tokio::test]
async fn test_refresh_pass_builds_snapshot() {
    let mut server = mockito::Server::new_async().await;
    let alert = server
        .mock("POST", "/api/v2/query")
        .match_query(Matcher::UrlEncoded("org".into(), "dtp-org".into()))
        .match_header("authorization", "Token test-token")
        .match_body(Matcher::Regex(r#"r.lift_id == "lift-001""#.into()))
        .with_status(200)
        .with_header("content-type", "text/csv")
        .with_body(ALERT_CSV)
        .create_async()
        .await;
    let energy = server
        .mock("POST", "/api/v2/query")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex(r#"r._measurement == "energy""#.into()))
        .with_status(200)
        .with_body(EMPTY_CSV)
        .create_async()
        .await;

    let cache = seeded(&server.url()).await;
    assert!(cache.snapshot().refreshed_at.is_none());

    let count = cache.refresh_once().await.unwrap();
    assert_eq!(count, 4);

    let lift = cache.cached(&TwinId::from("dt:Lift_001"));
    assert_eq!(lift.source.as_deref(), Some(SOURCE_ALERT));
    assert_eq!(
        lift.last_seen.unwrap().to_rfc3339(),
        "2026-03-01T10:15:00+00:00"
    );

    // No energy sample yet, no observation store, no probe for the gateway.
    assert!(cache.cached(&TwinId::from("dt:EnergyHVAC_001")).is_unknown());
    assert!(cache.cached(&TwinId::from("dt:RoomSensor_101")).is_unknown());
    assert!(cache.cached(&TwinId::from("dt:Gateway")).is_unknown());

    let status = cache.status();
    assert_eq!(status.entries, 4);
    assert!(status.refreshed_at.is_some());

    alert.assert_async().await;
    energy.assert_async().await;
    assert_ne!(SOURCE_ALERT, SOURCE_ENERGY);
}

#[tokio::test]
async fn test_backend_errors_do_not_fail_the_pass() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v2/query")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let cache = seeded(&server.url()).await;
    cache.refresh_once().await.unwrap();

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.entries.len(), 4);
    assert!(snapshot.entries.values().all(|e| e.is_unknown()));
}

#[tokio::test]
async fn test_snapshot_is_replaced_not_mutated() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v2/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(ALERT_CSV)
        .create_async()
        .await;

    let cache = seeded(&server.url()).await;
    cache.refresh_once().await.unwrap();
    let before = cache.snapshot();

    let mut updates = cache.subscribe();
    cache.refresh_once().await.unwrap();
    assert!(updates.has_changed().unwrap());

    let after = cache.snapshot();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.entries.len(), after.entries.len());
}
