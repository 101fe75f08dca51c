// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::domain::service::Service;
use crate::domain::twin::{Twin, TwinId};

/// Kinds of catalog deltas recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogEventType {
    TwinUpdated,
    TwinDeleted,
    ServiceUpdated,
}

impl CatalogEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogEventType::TwinUpdated => "twin-updated",
            CatalogEventType::TwinDeleted => "twin-deleted",
            CatalogEventType::ServiceUpdated => "service-updated",
        }
    }
}

impl fmt::Display for CatalogEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twin-updated" => Ok(CatalogEventType::TwinUpdated),
            "twin-deleted" => Ok(CatalogEventType::TwinDeleted),
            "service-updated" => Ok(CatalogEventType::ServiceUpdated),
            other => Err(format!("unknown catalog event type '{}'", other)),
        }
    }
}

/// Event not yet appended. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCatalogEvent {
    pub tenant: String,
    pub event_type: CatalogEventType,
    pub payload: Value,
}

impl NewCatalogEvent {
    /// Full snapshot of the twin after the write.
    pub fn twin_updated(twin: &Twin) -> Result<Self, serde_json::Error> {
        Ok(Self {
            tenant: twin.tenant.clone(),
            event_type: CatalogEventType::TwinUpdated,
            payload: serde_json::to_value(twin)?,
        })
    }

    /// Deletes only carry the id.
    pub fn twin_deleted(tenant: &str, twin_id: &TwinId) -> Self {
        Self {
            tenant: tenant.to_string(),
            event_type: CatalogEventType::TwinDeleted,
            payload: json!({ "twin_id": twin_id }),
        }
    }

    pub fn service_updated(service: &Service) -> Result<Self, serde_json::Error> {
        Ok(Self {
            tenant: service.tenant.clone(),
            event_type: CatalogEventType::ServiceUpdated,
            payload: serde_json::to_value(service)?,
        })
    }
}

/// Append-only catalog delta. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub event_id: i64,
    pub tenant: String,
    #[serde(rename = "type")]
    pub event_type: CatalogEventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl CatalogEvent {
    /// Position of this record in the per-tenant tail order.
    pub fn cursor(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_payload_only_carries_id() {
        let ev = NewCatalogEvent::twin_deleted("demo", &TwinId::from("dt:Lift_001"));
        assert_eq!(ev.payload, json!({"twin_id": "dt:Lift_001"}));
        assert_eq!(ev.event_type.as_str(), "twin-deleted");
    }

    #[test]
    fn test_event_type_round_trips_through_str() {
        for ty in [
            CatalogEventType::TwinUpdated,
            CatalogEventType::TwinDeleted,
            CatalogEventType::ServiceUpdated,
        ] {
            assert_eq!(ty.as_str().parse::<CatalogEventType>().unwrap(), ty);
            assert_eq!(serde_json::to_value(ty).unwrap(), json!(ty.as_str()));
        }
    }
}
