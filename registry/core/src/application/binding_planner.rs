// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Binding Planner
//!
//! Subscribes to committed catalog events and computes the message routes and
//! API proxies each updated twin implies. Bindings are planned and logged
//! only; nothing is wired up.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{CatalogEvent, CatalogEventType};
use crate::domain::twin::{Twin, TwinId};
use crate::infrastructure::event_bus::{EventBus, EventBusError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingPlan {
    pub twin_id: TwinId,
    pub actions: Vec<String>,
}

pub struct BindingPlanner {
    event_bus: EventBus,
}

impl BindingPlanner {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Plan for one event. Only `twin-updated` events carry bindings.
    pub fn plan(event: &CatalogEvent) -> Option<BindingPlan> {
        if event.event_type != CatalogEventType::TwinUpdated {
            return None;
        }
        match serde_json::from_value::<Twin>(event.payload.clone()) {
            Ok(twin) => Some(BindingPlan {
                actions: twin.bindings(),
                twin_id: twin.twin_id,
            }),
            Err(e) => {
                warn!(event_id = event.event_id, error = %e, "Undecodable twin payload; no bindings planned");
                None
            }
        }
    }

    /// Spawn the planner. Runs until `shutdown` fires or the bus closes.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        info!("Starting binding planner");

        tokio::spawn(async move {
            let mut receiver = self.event_bus.subscribe();
            let mut planned = 0u64;

            loop {
                let received = tokio::select! {
                    r = receiver.recv() => r,
                    _ = shutdown.cancelled() => break,
                };

                match received {
                    Ok(event) => {
                        let Some(plan) = Self::plan(&event) else {
                            continue;
                        };
                        planned += 1;
                        if plan.actions.is_empty() {
                            debug!(twin_id = %plan.twin_id, "Twin declares no bindings");
                        }
                        for action in &plan.actions {
                            info!(twin_id = %plan.twin_id, action = %action, "Planned binding");
                        }
                    }
                    Err(EventBusError::Lagged(n)) => {
                        warn!(skipped = n, "Binding planner lagged; some twin updates were not planned");
                    }
                    Err(EventBusError::Closed) => break,
                    Err(EventBusError::Empty) => continue,
                }
            }

            info!(planned, "Binding planner stopped");
        })
    }
}
