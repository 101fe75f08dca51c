// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry metrics.
//!
//! Counters and histograms for catalog writes, card reconciliation, the
//! last-data refresher and the event tail. Recording is a no-op until a
//! recorder is installed (`dtp serve` installs the Prometheus exporter).

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Registry
// ============================================================================

/// Catalog writes by operation.
pub const REGISTRY_WRITES: &str = "dtp_registry_writes_total";

// ============================================================================
// Card Reconciler
// ============================================================================

/// Reconciliations by outcome.
pub const CARD_RECONCILE: &str = "dtp_card_reconcile_total";

/// Duplicate cards merged into a canonical card.
pub const CARD_DUPLICATES_MERGED: &str = "dtp_card_duplicates_merged_total";

// ============================================================================
// Last-Data Cache
// ============================================================================

/// Refresh pass duration.
pub const LAST_DATA_REFRESH: &str = "dtp_last_data_refresh_seconds";

/// Failed freshness lookups by source.
pub const LAST_DATA_LOOKUP_FAILURES: &str = "dtp_last_data_lookup_failures_total";

// ============================================================================
// Event Tail
// ============================================================================

/// Event tail polls by outcome.
pub const EVENT_TAIL_POLLS: &str = "dtp_event_tail_polls_total";

/// Registers all registry metric descriptions.
pub fn register_metrics() {
    describe_counter!(REGISTRY_WRITES, "Total catalog writes");
    describe_counter!(CARD_RECONCILE, "Total card reconciliations");
    describe_counter!(CARD_DUPLICATES_MERGED, "Total duplicate portal cards merged");
    describe_histogram!(LAST_DATA_REFRESH, "Duration of last-data refresh passes in seconds");
    describe_counter!(LAST_DATA_LOOKUP_FAILURES, "Total failed freshness lookups");
    describe_counter!(EVENT_TAIL_POLLS, "Total event tail polls");
}

pub fn record_registry_write(op: &'static str) {
    counter!(REGISTRY_WRITES, "op" => op).increment(1);
}

pub fn record_reconcile(outcome: &'static str, duplicates_merged: usize) {
    counter!(CARD_RECONCILE, "outcome" => outcome).increment(1);
    if duplicates_merged > 0 {
        counter!(CARD_DUPLICATES_MERGED).increment(duplicates_merged as u64);
    }
}

pub fn record_refresh(duration_secs: f64) {
    histogram!(LAST_DATA_REFRESH).record(duration_secs);
}

pub fn record_lookup_failure(source: &'static str) {
    counter!(LAST_DATA_LOOKUP_FAILURES, "source" => source).increment(1);
}

pub fn record_tail_poll(outcome: &'static str) {
    counter!(EVENT_TAIL_POLLS, "outcome" => outcome).increment(1);
}
