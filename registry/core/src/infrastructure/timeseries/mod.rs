// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Time-series collaborators consulted by the last-data cache.
//!
//! [`TimeSeriesBackends`] routes each lookup to the configured store:
//! alerts and energy samples to InfluxDB, signal observations to the
//! observation database. A lookup whose store is not configured fails with
//! `BackendError::NotConfigured`.

pub mod influx;
pub mod timescale;

pub use influx::InfluxBackend;
pub use timescale::TimescaleBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::freshness::{BackendError, TimeSeriesBackend};
use crate::domain::registry_config::{resolve_secret, BackendsConfig};

#[derive(Clone, Default)]
pub struct TimeSeriesBackends {
    influx: Option<InfluxBackend>,
    timescale: Option<TimescaleBackend>,
}

impl TimeSeriesBackends {
    pub fn new(influx: Option<InfluxBackend>, timescale: Option<TimescaleBackend>) -> Self {
        Self { influx, timescale }
    }

    pub fn from_config(config: &BackendsConfig, lookup_timeout: Duration) -> Result<Self, BackendError> {
        let influx = match &config.influx {
            Some(cfg) => {
                info!(url = %cfg.url, bucket = %cfg.bucket, "InfluxDB freshness backend configured");
                Some(InfluxBackend::new(cfg, lookup_timeout)?)
            }
            None => None,
        };

        let timescale = match &config.timescale {
            Some(cfg) => match resolve_secret(&cfg.url) {
                Some(url) => {
                    info!("Observation store freshness backend configured");
                    Some(TimescaleBackend::connect_lazy(&url, lookup_timeout)?)
                }
                None => {
                    warn!(url = %cfg.url, "Observation store URL could not be resolved; observations disabled");
                    None
                }
            },
            None => None,
        };

        Ok(Self { influx, timescale })
    }
}

#[async_trait]
impl TimeSeriesBackend for TimeSeriesBackends {
    async fn latest_alert(&self, lift_id: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        match &self.influx {
            Some(influx) => influx.latest_alert(lift_id).await,
            None => Err(BackendError::NotConfigured("influx")),
        }
    }

    async fn latest_observation(&self, signal: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        match &self.timescale {
            Some(store) => store.latest_observation(signal).await,
            None => Err(BackendError::NotConfigured("timescale")),
        }
    }

    async fn latest_energy(&self, site: Option<&str>) -> Result<Option<DateTime<Utc>>, BackendError> {
        match &self.influx {
            Some(influx) => influx.latest_energy(site).await,
            None => Err(BackendError::NotConfigured("influx")),
        }
    }
}
