// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::twin::{Interfaces, TwinId};

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for a companion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of service categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCategory {
    #[serde(rename = "analytics")]
    Analytics,
    #[serde(rename = "data-management")]
    DataManagement,
    #[serde(rename = "actuation")]
    Actuation,
    #[serde(rename = "UI")]
    Ui,
    #[serde(rename = "simulation")]
    Simulation,
    #[serde(rename = "monitoring")]
    Monitoring,
    #[serde(rename = "storage")]
    Storage,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 7] = [
        ServiceCategory::Analytics,
        ServiceCategory::DataManagement,
        ServiceCategory::Actuation,
        ServiceCategory::Ui,
        ServiceCategory::Simulation,
        ServiceCategory::Monitoring,
        ServiceCategory::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Analytics => "analytics",
            ServiceCategory::DataManagement => "data-management",
            ServiceCategory::Actuation => "actuation",
            ServiceCategory::Ui => "UI",
            ServiceCategory::Simulation => "simulation",
            ServiceCategory::Monitoring => "monitoring",
            ServiceCategory::Storage => "storage",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for ServiceCategory {
    type Err = UnknownCategory;

    /// Case-insensitive; `data_management` is accepted for `data-management`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Companion capability registered next to twins (analytics, UI, ...).
/// The id is generated on registration and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub service_id: ServiceId,
    pub name: String,
    pub tenant: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub interfaces: Interfaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin_ref: Option<TwinId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// `<category>-<first 8 id chars>`
    pub fn default_name(category: ServiceCategory, id: &ServiceId) -> String {
        let short: String = id.0.simple().to_string().chars().take(8).collect();
        format!("{}-{}", category, short)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.interfaces.endpoint()
    }
}

/// Registration request. `category` and `interfaces` are required; they are
/// optional here so a missing field surfaces as a validation error rather
/// than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewService {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub interfaces: Option<Interfaces>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default, alias = "twin")]
    pub twin_ref: Option<TwinId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("ui".parse::<ServiceCategory>().unwrap(), ServiceCategory::Ui);
        assert_eq!(
            "Data_Management".parse::<ServiceCategory>().unwrap(),
            ServiceCategory::DataManagement
        );
        assert!("telemetry".parse::<ServiceCategory>().is_err());
    }

    #[test]
    fn test_category_wire_names() {
        let json = serde_json::to_string(&ServiceCategory::DataManagement).unwrap();
        assert_eq!(json, "\"data-management\"");
        let json = serde_json::to_string(&ServiceCategory::Ui).unwrap();
        assert_eq!(json, "\"UI\"");
    }

    #[test]
    fn test_default_name_uses_id_prefix() {
        let id = ServiceId::from_string("12345678-9abc-def0-1234-56789abcdef0").unwrap();
        assert_eq!(
            Service::default_name(ServiceCategory::Analytics, &id),
            "analytics-12345678"
        );
    }
}
