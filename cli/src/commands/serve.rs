// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry server
//!
//! Wires the catalog store, registry, visibility resolver, last-data
//! refresher, event tail and binding planner behind the axum router, then
//! serves until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dtp_core::application::admin::AdminService;
use dtp_core::application::binding_planner::BindingPlanner;
use dtp_core::application::event_tail::EventTail;
use dtp_core::application::last_data::LastDataCache;
use dtp_core::application::rbac_resolver::RbacResolver;
use dtp_core::domain::registry_config::RegistryConfigManifest;
use dtp_core::infrastructure::event_bus::EventBus;
use dtp_core::infrastructure::metrics;
use dtp_core::infrastructure::timeseries::TimeSeriesBackends;
use dtp_core::presentation::api::{app, AppState};

use super::{build_registry, load_config};

#[derive(Args)]
pub struct ServeCommand {
    /// Bind address (overrides spec.server.bind_address)
    #[arg(long, env = "DTP_HOST")]
    host: Option<String>,

    /// HTTP port (overrides spec.server.port)
    #[arg(long, env = "DTP_PORT")]
    port: Option<u16>,
}

pub async fn execute(cmd: ServeCommand, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = cmd.host {
        config.spec.server.bind_address = host;
    }
    if let Some(port) = cmd.port {
        config.spec.server.port = port;
    }
    info!(name = %config.metadata.name, "Configuration loaded");

    install_metrics_exporter(&config)?;
    metrics::register_metrics();

    let event_bus = EventBus::with_default_capacity();
    let (store, registry) = build_registry(&config, event_bus.clone()).await?;
    let spec = &config.spec;

    let backends = TimeSeriesBackends::from_config(&spec.backends, spec.last_data.lookup_timeout())
        .context("Failed to configure time-series backends")?;
    let last_data = Arc::new(LastDataCache::new(
        store.clone(),
        Arc::new(backends),
        spec.last_data.clone(),
    ));
    let refresher = last_data.start();

    let shutdown = CancellationToken::new();
    let planner = Arc::new(BindingPlanner::new(event_bus)).start(shutdown.clone());

    let state = AppState {
        registry,
        rbac: RbacResolver::new(store.clone()),
        last_data: last_data.clone(),
        event_tail: EventTail::new(
            store.clone(),
            spec.event_tail.clone(),
            spec.registry.default_tenant.clone(),
        )
        .with_shutdown(shutdown.clone()),
        admin: AdminService::new(store),
    };

    let addr = format!("{}:{}", spec.server.bind_address, spec.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Registry listening on {}", addr);

    // Open event streams end on the signal.
    let stop = shutdown.clone();
    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stop.cancel();
        })
        .await
        .context("HTTP server failed");

    info!("Registry shutting down");
    last_data.stop();
    shutdown.cancel();
    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            warn!(error = %e, "Last-data refresher ended abnormally");
        }
    }
    if let Err(e) = planner.await {
        warn!(error = %e, "Binding planner ended abnormally");
    }

    served
}

fn install_metrics_exporter(config: &RegistryConfigManifest) -> Result<()> {
    let Some(metrics_config) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    else {
        return Ok(());
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
