// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Last-Data Cache - Background freshness refresher
//!
//! Periodically walks the whole registry, asks the time-series backends when
//! each twin last produced data, and publishes the result as one immutable
//! [`FreshnessSnapshot`]. Readers take the current `Arc` from a
//! `tokio::sync::watch` channel and never observe a half-built map.
//!
//! Lookups are best-effort. A failed or timed-out lookup yields "unknown"
//! for that twin only; a failed pass keeps the previous snapshot and the
//! next tick runs as usual.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Freshness snapshot, on-demand lookups, refresher lifecycle

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::error::CatalogError;
use crate::domain::freshness::{
    BackendError, FreshnessEntry, FreshnessProbe, FreshnessSnapshot, TimeSeriesBackend,
};
use crate::domain::registry_config::LastDataConfig;
use crate::domain::repository::CatalogStore;
use crate::domain::twin::{Twin, TwinFilter, TwinId};
use crate::infrastructure::metrics;

/// Refresher state reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RefresherStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_seconds: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub entries: usize,
}

pub struct LastDataCache {
    store: Arc<dyn CatalogStore>,
    backend: Arc<dyn TimeSeriesBackend>,
    config: LastDataConfig,
    snapshot: watch::Sender<Arc<FreshnessSnapshot>>,
    shutdown_token: CancellationToken,
    started: AtomicBool,
}

impl LastDataCache {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        backend: Arc<dyn TimeSeriesBackend>,
        config: LastDataConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(FreshnessSnapshot::default()));
        Self {
            store,
            backend,
            config,
            snapshot,
            shutdown_token: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Last completed snapshot. Empty until the first pass finishes.
    pub fn snapshot(&self) -> Arc<FreshnessSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Watch for newly published snapshots
    pub fn subscribe(&self) -> watch::Receiver<Arc<FreshnessSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> RefresherStatus {
        let snapshot = self.snapshot();
        RefresherStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            interval_seconds: self.config.interval_seconds,
            refreshed_at: snapshot.refreshed_at,
            entries: snapshot.entries.len(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown_token.is_cancelled()
    }

    /// Spawn the refresher. At most one refresher runs per cache; later calls
    /// return `None`. The first pass runs immediately.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Last-data refresher is disabled");
            return None;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Last-data refresher already started; ignoring second start");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.run().await;
        }))
    }

    /// Stop the refresher. The current pass is abandoned.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    async fn run(&self) {
        info!(
            interval_seconds = self.config.interval_seconds,
            concurrency = self.config.concurrency,
            "Starting last-data refresher"
        );

        let mut tick = interval(self.config.interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    tokio::select! {
                        result = self.refresh_once() => match result {
                            Ok(count) => debug!(twins = count, "Last-data refresh pass completed"),
                            Err(e) => warn!(error = %e, "Last-data refresh pass failed; keeping previous snapshot"),
                        },
                        _ = self.shutdown_token.cancelled() => break,
                    }
                }
                _ = self.shutdown_token.cancelled() => break,
            }
        }

        info!("Last-data refresher stopped");
    }

    /// Recompute freshness for every twin and publish a new snapshot.
    pub async fn refresh_once(&self) -> Result<usize, CatalogError> {
        let started = Instant::now();

        let twins: Vec<Twin> = self
            .store
            .stream_twins(TwinFilter::default())
            .try_collect()
            .await?;
        let count = twins.len();
        let entries = self.compute_many(twins).await;

        self.snapshot.send_replace(Arc::new(FreshnessSnapshot {
            entries,
            refreshed_at: Some(Utc::now()),
        }));
        metrics::record_refresh(started.elapsed().as_secs_f64());
        Ok(count)
    }

    /// Cached freshness for one twin
    pub fn cached(&self, twin_id: &TwinId) -> FreshnessEntry {
        self.snapshot.borrow().get(twin_id)
    }

    /// Compute freshness for many twins with bounded concurrency.
    pub async fn compute_many(&self, twins: Vec<Twin>) -> HashMap<TwinId, FreshnessEntry> {
        stream::iter(twins)
            .map(|twin| async move {
                let entry = self.compute(&twin).await;
                (twin.twin_id, entry)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// On-demand freshness for one twin, bypassing the cache. Never fails:
    /// lookup errors and timeouts yield "unknown".
    pub async fn compute(&self, twin: &Twin) -> FreshnessEntry {
        let Some(probe) = FreshnessProbe::for_twin(twin) else {
            return FreshnessEntry::unknown();
        };
        let source = probe.source_label();

        match self.lookup(&probe).await {
            Ok(Some(at)) => FreshnessEntry::seen(at, source),
            Ok(None) => FreshnessEntry::unknown(),
            Err(e) => {
                debug!(twin_id = %twin.twin_id, source, error = %e, "Freshness lookup failed");
                metrics::record_lookup_failure(source);
                FreshnessEntry::unknown()
            }
        }
    }

    async fn lookup(&self, probe: &FreshnessProbe) -> Result<Option<DateTime<Utc>>, BackendError> {
        let query = async {
            match probe {
                FreshnessProbe::LiftAlert { lift_id } => self.backend.latest_alert(lift_id).await,
                FreshnessProbe::Observation { signal } => self.backend.latest_observation(signal).await,
                FreshnessProbe::Energy { site } => self.backend.latest_energy(site.as_deref()).await,
            }
        };

        tokio::time::timeout(self.config.lookup_timeout(), query)
            .await
            .unwrap_or(Err(BackendError::Timeout(self.config.lookup_timeout_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryCatalogStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::time::Duration;

    struct ScriptedBackend;

    #[async_trait]
    impl TimeSeriesBackend for ScriptedBackend {
        async fn latest_alert(&self, lift_id: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
            match lift_id {
                "lift-001" => Ok(Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap())),
                _ => Err(BackendError::Request("connection refused".into())),
            }
        }

        async fn latest_observation(&self, _signal: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn latest_energy(&self, _site: Option<&str>) -> Result<Option<DateTime<Utc>>, BackendError> {
            Ok(None)
        }
    }

    fn cache(config: LastDataConfig) -> LastDataCache {
        LastDataCache::new(
            Arc::new(InMemoryCatalogStore::new()),
            Arc::new(ScriptedBackend),
            config,
        )
    }

    fn twin(id: &str, domain: &str) -> Twin {
        let mut t = Twin::new(TwinId::from(id), "demo");
        t.metadata.domain = vec![domain.to_string()];
        t
    }

    #[tokio::test]
    async fn test_compute_resolves_lift_alert() {
        let cache = cache(LastDataConfig::default());
        let entry = cache.compute(&twin("dt:Lift_001", "Lift")).await;
        assert_eq!(entry.source.as_deref(), Some("influx:alert"));
        assert!(entry.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_compute_absorbs_failures_and_timeouts() {
        let cache = cache(LastDataConfig {
            lookup_timeout_ms: 50,
            ..Default::default()
        });

        assert!(cache.compute(&twin("dt:Lift_002", "Lift")).await.is_unknown());

        let mut sensor = twin("dt:RoomSensor_101", "Temperature");
        sensor.interfaces.data_streams = vec!["MQTT:dtp/sensors/room1/temp".into()];
        assert!(cache.compute(&sensor).await.is_unknown());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let cache = Arc::new(cache(LastDataConfig::default()));
        let first = cache.start();
        assert!(first.is_some());
        assert!(cache.start().is_none());
        assert!(cache.is_running());

        cache.stop();
        first.unwrap().await.unwrap();
        assert!(!cache.is_running());
    }

    #[tokio::test]
    async fn test_disabled_refresher_does_not_start() {
        let cache = Arc::new(cache(LastDataConfig {
            enabled: false,
            ..Default::default()
        }));
        assert!(cache.start().is_none());
        assert!(!cache.status().running);
    }
}
