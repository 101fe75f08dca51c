// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Twin Aggregate
//!
//! A registry entry describing a monitored real-world asset or process. The
//! twin id is an opaque, globally unique string (`dt:RoomSensor_101`) and is
//! the upsert key.
//!
//! The attribute bags (`metadata`, `interfaces`, `dependencies`) are typed
//! structures with the handful of fields the registry reasons about
//! (status, domain tags, display name, data streams, API endpoint,
//! static/dynamic dependency lists). Anything else a producer sends is kept
//! verbatim in a flattened `extra` map so descriptors can grow without a
//! schema change here.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Twin value objects, list filtering and patch semantics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status written by a soft detach.
pub const STATUS_DEPRECATED: &str = "deprecated";

/// Opaque twin identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TwinId(pub String);

impl TwinId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TwinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TwinId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Descriptive attributes of a twin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinMetadata {
    /// Lifecycle status (`instantiated`, `deprecated`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Domain tags (`Lift`, `Temperature`, `Energy`, ...). Accepts a bare
    /// string on input.
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain: Vec<String>,

    /// Human-readable name; the twin id is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TwinMetadata {
    /// Look up a string attribute from the extension map.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Declared data streams and reachable API endpoint. Shared by twins and
/// services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interfaces {
    #[serde(default)]
    pub data_streams: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Interfaces {
    /// The declared endpoint, if it is non-blank.
    pub fn endpoint(&self) -> Option<&str> {
        self.api.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Static and dynamic references to other registry entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinDependencies {
    #[serde(default, rename = "static")]
    pub static_refs: Vec<String>,

    #[serde(default)]
    pub dynamic: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    pub twin_id: TwinId,
    pub tenant: String,
    #[serde(default)]
    pub metadata: TwinMetadata,
    #[serde(default)]
    pub interfaces: Interfaces,
    #[serde(default)]
    pub dependencies: TwinDependencies,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Twin {
    pub fn new(twin_id: TwinId, tenant: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            twin_id,
            tenant: tenant.into(),
            metadata: TwinMetadata::default(),
            interfaces: Interfaces::default(),
            dependencies: TwinDependencies::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name shown on the portal card: `metadata.name`, else the twin id.
    pub fn display_name(&self) -> &str {
        self.metadata
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.twin_id.as_str())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.interfaces.endpoint()
    }

    /// Case-insensitive domain tag membership.
    pub fn has_domain(&self, tag: &str) -> bool {
        self.metadata
            .domain
            .iter()
            .any(|d| d.eq_ignore_ascii_case(tag))
    }

    /// Routing actions implied by the declared interfaces.
    pub fn bindings(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .interfaces
            .data_streams
            .iter()
            .map(|s| format!("subscribe route -> {}", s))
            .collect();
        if let Some(api) = self.endpoint() {
            actions.push(format!("expose api proxy -> {}", api));
        }
        actions
    }
}

/// Filter for registry listings. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TwinFilter {
    /// Exact tenant match
    pub tenant: Option<String>,
    /// Exact, case-sensitive match on `metadata.status`
    pub status: Option<String>,
    /// Membership in `metadata.domain` (exact)
    pub domain: Option<String>,
}

impl TwinFilter {
    pub fn matches(&self, twin: &Twin) -> bool {
        if let Some(tenant) = &self.tenant {
            if &twin.tenant != tenant {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if twin.metadata.status.as_ref() != Some(status) {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if !twin.metadata.domain.iter().any(|d| d == domain) {
                return false;
            }
        }
        true
    }
}

/// Tri-state field used by partial updates.
///
/// `Absent` leaves the stored value alone, `Clear` resets it, `Set` replaces
/// it. With `#[serde(default)]` on the containing field, a missing key
/// decodes to `Absent` and an explicit `null` to `Clear`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldPatch<T> {
    #[default]
    Absent,
    Clear,
    Set(T),
}

impl<T> FieldPatch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldPatch::Absent)
    }

    /// Apply onto `current`, using `reset` for an explicit clear.
    pub fn apply(self, current: &mut T, reset: impl FnOnce() -> T) {
        match self {
            FieldPatch::Absent => {}
            FieldPatch::Clear => *current = reset(),
            FieldPatch::Set(value) => *current = value,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldPatch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => FieldPatch::Set(value),
            None => FieldPatch::Clear,
        })
    }
}

/// Body of a partial update. Only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwinPatch {
    #[serde(default)]
    pub tenant: FieldPatch<String>,
    #[serde(default)]
    pub metadata: FieldPatch<TwinMetadata>,
    #[serde(default)]
    pub interfaces: FieldPatch<Interfaces>,
    #[serde(default)]
    pub dependencies: FieldPatch<TwinDependencies>,
}

impl TwinPatch {
    pub fn is_empty(&self) -> bool {
        self.tenant.is_absent()
            && self.metadata.is_absent()
            && self.interfaces.is_absent()
            && self.dependencies.is_absent()
    }
}

/// Trailing-slash and whitespace insensitive form of an endpoint/URL.
pub fn normalize_endpoint(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn twin(id: &str) -> Twin {
        Twin::new(TwinId::from(id), "demo")
    }

    #[test]
    fn test_metadata_keeps_unknown_attributes() {
        let meta: TwinMetadata = serde_json::from_value(json!({
            "status": "instantiated",
            "domain": "Lift",
            "owner": "facilities",
        }))
        .unwrap();

        assert_eq!(meta.domain, vec!["Lift".to_string()]);
        assert_eq!(meta.extra_str("owner"), Some("facilities"));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["owner"], "facilities");
        assert_eq!(back["domain"], json!(["Lift"]));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut t = twin("dt:RoomSensor_101");
        assert_eq!(t.display_name(), "dt:RoomSensor_101");

        t.metadata.name = Some("  ".to_string());
        assert_eq!(t.display_name(), "dt:RoomSensor_101");

        t.metadata.name = Some("Room 101".to_string());
        assert_eq!(t.display_name(), "Room 101");
    }

    #[test]
    fn test_filter_status_is_case_sensitive() {
        let mut t = twin("dt:Lift_001");
        t.metadata.status = Some("Deprecated".to_string());
        t.metadata.domain = vec!["Lift".to_string()];

        let by_status = TwinFilter {
            status: Some("deprecated".to_string()),
            ..Default::default()
        };
        assert!(!by_status.matches(&t));

        let by_domain = TwinFilter {
            tenant: Some("demo".to_string()),
            domain: Some("Lift".to_string()),
            ..Default::default()
        };
        assert!(by_domain.matches(&t));

        let other_tenant = TwinFilter {
            tenant: Some("acme".to_string()),
            ..Default::default()
        };
        assert!(!other_tenant.matches(&t));
    }

    #[test]
    fn test_patch_distinguishes_absent_and_null() {
        let patch: TwinPatch = serde_json::from_value(json!({
            "interfaces": null,
            "metadata": {"status": "deprecated"},
        }))
        .unwrap();

        assert!(patch.tenant.is_absent());
        assert!(patch.dependencies.is_absent());
        assert_eq!(patch.interfaces, FieldPatch::Clear);
        assert!(matches!(patch.metadata, FieldPatch::Set(ref m) if m.status.as_deref() == Some("deprecated")));
    }

    #[test]
    fn test_bindings_follow_interfaces() {
        let mut t = twin("dt:Lift_001");
        t.interfaces.data_streams = vec!["MQTT:dtp/lift/alerts".to_string()];
        t.interfaces.api = Some("http://localhost:3001".to_string());

        assert_eq!(
            t.bindings(),
            vec![
                "subscribe route -> MQTT:dtp/lift/alerts".to_string(),
                "expose api proxy -> http://localhost:3001".to_string(),
            ]
        );
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint(" http://host:8086/ "), "http://host:8086");
        assert_eq!(normalize_endpoint("http://host:8086"), "http://host:8086");
    }
}
