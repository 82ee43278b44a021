//! Metric names and descriptions for the cache and lifecycle paths.
//!
//! Metrics go through the `metrics` facade. No exporter is installed here:
//! the embedding service chooses a recorder and then calls
//! [`describe_metrics`] once.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use std::time::{Duration, Instant};

/// Register all metric descriptions.
pub fn describe_metrics() {
    // Cache store
    describe_counter!("cache_hits_total", "Cache reads that found a live entry");
    describe_counter!("cache_misses_total", "Cache reads that found nothing, by reason");
    describe_counter!("cache_sets_total", "Cache writes");
    describe_counter!("cache_deletes_total", "Cache entries deleted");
    describe_counter!("cache_evictions_total", "In-memory entries evicted at capacity");
    describe_counter!("cache_clears_total", "Full cache clears");
    describe_gauge!("cache_entries", "Entries currently stored");
    describe_gauge!("cache_hit_rate", "Hit rate since start (0-1)");
    describe_histogram!("cache_entry_size_bytes", "Size of stored cache values in bytes");
    describe_counter!("cache_populate_failures_total", "Read-through populates that failed");

    // Invalidation
    describe_counter!("cache_invalidations_total", "Invalidation passes, by event");
    describe_counter!(
        "cache_invalidation_failures_total",
        "Keys or prefixes an invalidation pass failed to clear"
    );

    // Lifecycle
    describe_counter!(
        "case_lifecycle_operations_total",
        "Stage and status updates, by operation and outcome"
    );
    describe_histogram!(
        "case_lifecycle_duration_seconds",
        "Stage and status update latency in seconds"
    );

    // Database
    describe_histogram!("db_query_duration_seconds", "Case repository query latency in seconds");

    // Errors
    describe_counter!("aegis_errors_total", "Errors constructed, by code and category");
}

/// Times one lifecycle operation and records its outcome.
pub struct LifecycleTimer {
    start: Instant,
    operation: &'static str,
}

impl LifecycleTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record the outcome (`"ok"` or an error code name) and the elapsed time.
    pub fn finish(self, outcome: &str) -> Duration {
        let duration = self.start.elapsed();

        counter!(
            "case_lifecycle_operations_total",
            "operation" => self.operation,
            "outcome" => outcome.to_string(),
        )
        .increment(1);
        histogram!(
            "case_lifecycle_duration_seconds",
            "operation" => self.operation,
        )
        .record(duration.as_secs_f64());

        duration
    }
}
