// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Tail
//!
//! Cursor-based reader over the append-only catalog event log. A tail polls
//! the store on a fixed period for events of one tenant strictly newer than
//! its cursor, yields them oldest first, and advances the cursor to the last
//! yielded timestamp. Poll failures are logged and retried on the next tick;
//! the stream only ends when the tail's shutdown token fires. Dropping it
//! stops polling.

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::error::CatalogError;
use crate::domain::events::CatalogEvent;
use crate::domain::registry_config::EventTailConfig;
use crate::domain::repository::CatalogStore;
use crate::infrastructure::metrics;

#[derive(Clone)]
pub struct EventTail {
    store: Arc<dyn CatalogStore>,
    config: EventTailConfig,
    default_tenant: String,
    shutdown: CancellationToken,
}

struct TailState {
    store: Arc<dyn CatalogStore>,
    tenant: String,
    cursor: DateTime<Utc>,
    limit: usize,
    ticker: Interval,
    buffer: VecDeque<CatalogEvent>,
}

impl EventTail {
    pub fn new(store: Arc<dyn CatalogStore>, config: EventTailConfig, default_tenant: impl Into<String>) -> Self {
        Self {
            store,
            config,
            default_tenant: default_tenant.into(),
            shutdown: CancellationToken::new(),
        }
    }

    /// End every open stream when `token` fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Parse a client cursor: RFC 3339 or Unix epoch seconds. Anything else
    /// falls back to `now - lookback`.
    pub fn parse_cursor(&self, since: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
        since
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(parse_timestamp)
            .unwrap_or_else(|| self.lookback_from(now))
    }

    /// `now - lookback`, clamped to the earliest representable instant.
    fn lookback_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.config.lookback_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// One poll: events for `tenant` strictly newer than `cursor`.
    pub async fn poll(&self, tenant: &str, cursor: DateTime<Utc>) -> Result<Vec<CatalogEvent>, CatalogError> {
        Ok(self
            .store
            .events_since(tenant, cursor, self.config.batch_limit)
            .await?)
    }

    /// Endless stream of events for `tenant` (default tenant when `None`)
    /// starting after `since`.
    pub fn stream(&self, tenant: Option<String>, since: Option<&str>) -> BoxStream<'static, CatalogEvent> {
        let tenant = tenant
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.default_tenant.clone());
        let cursor = self.parse_cursor(since, Utc::now());
        debug!(tenant = %tenant, cursor = %cursor, "Opening event tail");

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = TailState {
            store: self.store.clone(),
            tenant,
            cursor,
            limit: self.config.batch_limit,
            ticker,
            buffer: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.buffer.pop_front() {
                    return Some((event, state));
                }

                state.ticker.tick().await;
                match state
                    .store
                    .events_since(&state.tenant, state.cursor, state.limit)
                    .await
                {
                    Ok(events) => {
                        metrics::record_tail_poll(if events.is_empty() { "empty" } else { "events" });
                        if let Some(last) = events.last() {
                            state.cursor = last.created_at;
                        }
                        state.buffer.extend(events);
                    }
                    Err(e) => {
                        metrics::record_tail_poll("error");
                        warn!(tenant = %state.tenant, error = %e, "Event tail poll failed; retrying next tick");
                    }
                }
            }
        })
        .take_until(self.shutdown.clone().cancelled_owned())
        .boxed()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    let secs: f64 = raw.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}
