// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Twin Scanner
//!
//! Registers twins from a directory tree. Each immediate sub-directory that
//! holds a `twin.yaml`, `twin.yml` or `twin.json` descriptor is normalized
//! and upserted through the [`Registry`]:
//!
//! - id from `@id` / `twin_id`, else `dt:<folder>_001`
//! - tenant defaults to the registry default tenant
//! - metadata defaults to `{status: instantiated, name: <name or folder>}`
//! - a missing API endpoint is inferred from the first published port of a
//!   UI service in the folder's compose file
//!
//! A broken folder is reported and skipped; the scan carries on.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::registry::{Registry, UpsertTwin};
use crate::domain::twin::TwinId;

const DESCRIPTOR_FILES: &[&str] = &["twin.yaml", "twin.yml", "twin.json"];
const COMPOSE_FILES: &[&str] = &["compose.yaml", "docker-compose.yaml", "compose.yml"];

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid descriptor {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Catalog(#[from] crate::domain::error::CatalogError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub folder: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub upserted: Vec<TwinId>,
    pub failures: Vec<ScanFailure>,
}

pub struct TwinScanner {
    registry: Arc<Registry>,
}

impl TwinScanner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Scan the sub-directories of `root`. Fails only when `root` itself
    /// cannot be read.
    pub async fn scan(&self, root: &Path) -> Result<ScanReport, ScanError> {
        let entries = std::fs::read_dir(root).map_err(|source| ScanError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut folders: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();

        let mut report = ScanReport::default();
        for folder in folders {
            match self.scan_folder(&folder).await {
                Ok(Some(twin_id)) => report.upserted.push(twin_id),
                Ok(None) => debug!(folder = %folder.display(), "No twin descriptor; skipping"),
                Err(e) => {
                    warn!(folder = %folder.display(), error = %e, "Twin scan failed for folder");
                    report.failures.push(ScanFailure {
                        folder,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            root = %root.display(),
            upserted = report.upserted.len(),
            failed = report.failures.len(),
            "Twin scan complete"
        );
        Ok(report)
    }

    async fn scan_folder(&self, folder: &Path) -> Result<Option<TwinId>, ScanError> {
        let Some(request) = load_descriptor(folder)? else {
            return Ok(None);
        };
        let result = self.registry.upsert(request).await?;
        Ok(Some(result.twin.twin_id))
    }
}

/// Read and normalize the descriptor in `folder`, if there is one.
pub fn load_descriptor(folder: &Path) -> Result<Option<UpsertTwin>, ScanError> {
    let Some(path) = DESCRIPTOR_FILES
        .iter()
        .map(|name| folder.join(name))
        .find(|p| p.is_file())
    else {
        return Ok(None);
    };

    let text = std::fs::read_to_string(&path).map_err(|source| ScanError::Io {
        path: path.clone(),
        source,
    })?;
    let parse_error = |message: String| ScanError::Parse {
        path: path.clone(),
        message,
    };

    let raw: Value = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string()))?
    };
    let raw = match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(parse_error("descriptor must be a mapping".to_string())),
    };

    let folder_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let normalized = normalize(raw, &folder_name, infer_api(folder));
    serde_json::from_value(normalized)
        .map(Some)
        .map_err(|e| parse_error(e.to_string()))
}

fn non_empty_str<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn non_empty_object(raw: &Map<String, Value>, key: &str) -> Option<Value> {
    raw.get(key)
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        .cloned()
}

fn normalize(raw: Map<String, Value>, folder_name: &str, inferred_api: Option<String>) -> Value {
    let twin_id = non_empty_str(&raw, "@id")
        .or_else(|| non_empty_str(&raw, "twin_id"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("dt:{}_001", folder_name));

    let mut interfaces = raw
        .get("interfaces")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let has_api = non_empty_str(&interfaces, "api").is_some();
    if !has_api {
        if let Some(api) = inferred_api {
            interfaces.insert("api".to_string(), Value::String(api));
        }
    }
    interfaces
        .entry("data_streams")
        .or_insert_with(|| Value::Array(Vec::new()));

    let metadata = non_empty_object(&raw, "metadata").unwrap_or_else(|| {
        json!({
            "status": "instantiated",
            "name": non_empty_str(&raw, "name").unwrap_or(folder_name),
        })
    });
    let dependencies =
        non_empty_object(&raw, "dependencies").unwrap_or_else(|| json!({"static": [], "dynamic": []}));

    let mut out = json!({
        "twin_id": twin_id,
        "metadata": metadata,
        "interfaces": interfaces,
        "dependencies": dependencies,
    });
    if let Some(tenant) = non_empty_str(&raw, "tenant") {
        out["tenant"] = Value::String(tenant.to_string());
    }
    out
}

/// `http://localhost:<port>` from the first published port of the `ui`
/// service (or any service whose name ends in `ui`).
fn infer_api(folder: &Path) -> Option<String> {
    COMPOSE_FILES
        .iter()
        .map(|name| folder.join(name))
        .filter(|p| p.is_file())
        .find_map(|p| {
            let text = std::fs::read_to_string(&p).ok()?;
            let doc: serde_yaml::Value = serde_yaml::from_str(&text).ok()?;
            published_ui_port(&doc)
        })
        .map(|port| format!("http://localhost:{}", port))
}

fn published_ui_port(doc: &serde_yaml::Value) -> Option<String> {
    let services = doc.get("services")?.as_mapping()?;
    let ui = services.get("ui").or_else(|| {
        services.iter().find_map(|(name, svc)| {
            name.as_str()
                .filter(|n| n.to_lowercase().ends_with("ui"))
                .map(|_| svc)
        })
    })?;

    let first = ui.get("ports")?.as_sequence()?.first()?;
    let port = match first {
        serde_yaml::Value::String(spec) => {
            // "HOST:CONTAINER" or "IP:HOST:CONTAINER"
            let parts: Vec<&str> = spec.split(':').collect();
            match parts.len() {
                2 => Some(parts[0].to_string()),
                3 => Some(parts[1].to_string()),
                _ => None,
            }
        }
        serde_yaml::Value::Mapping(_) => {
            let published = first.get("published").or_else(|| first.get("host_port"))?;
            match published {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        }
        _ => None,
    };
    port.filter(|p| !p.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::card_reconciler::CardReconciler;
    use crate::domain::repository::CatalogStore;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::InMemoryCatalogStore;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_descriptor_defaults_and_inferred_api() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("Lift");
        write(&folder, "twin.yaml", "name: Lift Maintenance\ntenant: demo\n");
        write(
            &folder,
            "compose.yaml",
            "services:\n  db:\n    image: postgres\n  lift-ui:\n    ports:\n      - \"3001:80\"\n",
        );

        let request = load_descriptor(&folder).unwrap().unwrap();
        assert_eq!(request.twin_id, "dt:Lift_001");
        assert_eq!(request.tenant.as_deref(), Some("demo"));
        let metadata = request.metadata.unwrap();
        assert_eq!(metadata.status.as_deref(), Some("instantiated"));
        assert_eq!(metadata.name.as_deref(), Some("Lift Maintenance"));
        let interfaces = request.interfaces.unwrap();
        assert_eq!(interfaces.api.as_deref(), Some("http://localhost:3001"));
        assert!(interfaces.data_streams.is_empty());
    }

    #[test]
    fn test_declared_api_wins_over_compose() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("energy");
        write(
            &folder,
            "twin.json",
            r#"{"@id": "dt:EnergyHVAC_001", "interfaces": {"api": "http://energy:3002"}}"#,
        );
        write(
            &folder,
            "docker-compose.yaml",
            "services:\n  ui:\n    ports:\n      - published: 9999\n        target: 80\n",
        );

        let request = load_descriptor(&folder).unwrap().unwrap();
        assert_eq!(request.twin_id, "dt:EnergyHVAC_001");
        assert_eq!(request.tenant, None);
        assert_eq!(request.interfaces.unwrap().api.as_deref(), Some("http://energy:3002"));
    }

    #[test]
    fn test_published_port_forms() {
        let long: serde_yaml::Value =
            serde_yaml::from_str("services:\n  ui:\n    ports:\n      - published: 8080\n").unwrap();
        assert_eq!(published_ui_port(&long).as_deref(), Some("8080"));

        let with_ip: serde_yaml::Value =
            serde_yaml::from_str("services:\n  ui:\n    ports:\n      - \"127.0.0.1:3005:80\"\n").unwrap();
        assert_eq!(published_ui_port(&with_ip).as_deref(), Some("3005"));

        let no_ui: serde_yaml::Value =
            serde_yaml::from_str("services:\n  api:\n    ports:\n      - \"8000:8000\"\n").unwrap();
        assert_eq!(published_ui_port(&no_ui), None);
    }

    #[tokio::test]
    async fn test_scan_upserts_and_reports_failures() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("RoomSensor"),
            "twin.yml",
            "\"@id\": dt:RoomSensor_101\nmetadata:\n  domain: Temperature\n",
        );
        write(&tmp.path().join("broken"), "twin.json", "{not json");
        fs::create_dir_all(tmp.path().join("docs")).unwrap();

        let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
        let registry = Arc::new(Registry::new(
            store.clone(),
            CardReconciler::default(),
            EventBus::with_default_capacity(),
            "demo",
        ));
        let report = TwinScanner::new(registry).scan(tmp.path()).await.unwrap();

        assert_eq!(report.upserted, vec![TwinId::from("dt:RoomSensor_101")]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].folder.ends_with("broken"));

        let twin = store
            .find_twin(&TwinId::from("dt:RoomSensor_101"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(twin.tenant, "demo");
        assert!(twin.has_domain("temperature"));
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
        let registry = Arc::new(Registry::new(
            store,
            CardReconciler::default(),
            EventBus::with_default_capacity(),
            "demo",
        ));
        let err = TwinScanner::new(registry)
            .scan(Path::new("/nonexistent/twins"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Io { .. }));
    }
}
