// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Freshness
//!
//! "When did this twin last produce data?" The answer depends on the twin's
//! domain tags: lifts report alerts, temperature sensors report observations
//! for a named signal, energy/HVAC twins report energy samples. This module
//! holds the probe selection heuristic and the contract the time-series
//! collaborators implement; the refresher lives in
//! `crate::application::last_data`.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Probe selection, freshness values, backend contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::twin::{Twin, TwinId};

pub const SOURCE_ALERT: &str = "influx:alert";
pub const SOURCE_OBSERVATION: &str = "timescale:observation";
pub const SOURCE_ENERGY: &str = "influx:energy";

/// Latest known data point for one twin. Both fields are `None` when the
/// freshness is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessEntry {
    pub last_seen: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

impl FreshnessEntry {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn seen(at: DateTime<Utc>, source: &str) -> Self {
        Self {
            last_seen: Some(at),
            source: Some(source.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.last_seen.is_none()
    }
}

/// Whole-map result of one refresher pass. Published as a unit and never
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessSnapshot {
    pub entries: HashMap<TwinId, FreshnessEntry>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl FreshnessSnapshot {
    /// Unknown for twins the last pass did not cover.
    pub fn get(&self, twin_id: &TwinId) -> FreshnessEntry {
        self.entries.get(twin_id).cloned().unwrap_or_default()
    }
}

/// Which external lookup answers freshness for a twin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessProbe {
    LiftAlert { lift_id: String },
    Observation { signal: String },
    Energy { site: Option<String> },
}

impl FreshnessProbe {
    /// Pick the probe for a twin from its domain tags. First match wins in
    /// the order Lift, Temperature, Energy/HVAC. `None` means the twin's
    /// freshness is unknown without any lookup.
    pub fn for_twin(twin: &Twin) -> Option<Self> {
        if twin.has_domain("Lift") {
            let lift_id = twin
                .metadata
                .extra_str("lift_id")
                .map(str::to_string)
                .unwrap_or_else(|| lift_id_from_twin_id(twin.twin_id.as_str()));
            return Some(FreshnessProbe::LiftAlert { lift_id });
        }
        if twin.has_domain("Temperature") {
            let signal = twin
                .metadata
                .extra_str("signal_name")
                .map(str::to_string)
                .or_else(|| {
                    twin.interfaces
                        .data_streams
                        .iter()
                        .find_map(|s| signal_from_stream(s))
                })?;
            return Some(FreshnessProbe::Observation { signal });
        }
        if twin.has_domain("Energy") || twin.has_domain("HVAC") {
            let site = twin.metadata.extra_str("site").map(str::to_string);
            return Some(FreshnessProbe::Energy { site });
        }
        None
    }

    pub fn source_label(&self) -> &'static str {
        match self {
            FreshnessProbe::LiftAlert { .. } => SOURCE_ALERT,
            FreshnessProbe::Observation { .. } => SOURCE_OBSERVATION,
            FreshnessProbe::Energy { .. } => SOURCE_ENERGY,
        }
    }
}

/// `dt:Lift_001` -> `lift-001`
pub fn lift_id_from_twin_id(twin_id: &str) -> String {
    let local = twin_id.rsplit(':').next().unwrap_or(twin_id);
    local.to_ascii_lowercase().replace('_', "-")
}

/// `MQTT:dtp/sensors/room1/temp` -> `temp_room_1`
pub fn signal_from_stream(stream: &str) -> Option<String> {
    let path = stream.split_once(':').map(|(_, p)| p).unwrap_or(stream);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let at = segments.iter().position(|s| *s == "sensors")?;
    let place = segments.get(at + 1)?;
    let kind = segments.get(at + 2)?;

    let split = place
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(place.len());
    let (stem, number) = place.split_at(split);
    if stem.is_empty() {
        return None;
    }
    Some(if number.is_empty() {
        format!("{}_{}", kind, stem)
    } else {
        format!("{}_{}_{}", kind, stem, number)
    })
}

/// Errors from time-series collaborators. Always absorbed to "unknown" by
/// the freshness cache.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Lookup timed out after {0} ms")]
    Timeout(u64),

    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Malformed backend response: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        BackendError::Request(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Request(err.to_string())
    }
}

/// Read-only time-series lookups. Each answers a single timestamp or `None`.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    /// Latest alert record for a lift
    async fn latest_alert(&self, lift_id: &str) -> Result<Option<DateTime<Utc>>, BackendError>;

    /// Latest observation for a named signal
    async fn latest_observation(&self, signal: &str) -> Result<Option<DateTime<Utc>>, BackendError>;

    /// Latest energy sample, optionally scoped to a site
    async fn latest_energy(&self, site: Option<&str>) -> Result<Option<DateTime<Utc>>, BackendError>;
}
