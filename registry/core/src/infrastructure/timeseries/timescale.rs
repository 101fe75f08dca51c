// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Observation store lookups (PostgreSQL/TimescaleDB `observation` joined
//! with `signal` by id, looked up by signal name).

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::domain::freshness::BackendError;

#[derive(Clone)]
pub struct TimescaleBackend {
    pool: PgPool,
}

impl TimescaleBackend {
    /// Connections are opened on first lookup, so an unreachable store does
    /// not block startup.
    pub fn connect_lazy(url: &str, acquire_timeout: Duration) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn latest_observation(&self, signal: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT max(o.ts)
            FROM observation o
            JOIN signal s ON s.signal_id = o.signal_id
            WHERE s.name = $1
            "#,
        )
        .bind(signal)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }
}
