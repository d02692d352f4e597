//! Metric descriptions.
//!
//! The library records through the `metrics` facade only. Binaries install an
//! exporter of their choice and call [`describe_metrics`] once.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Every metric the engine emits.
pub const METRIC_NAMES: &[&str] = &[
    "waypoint_access_decisions_total",
    "waypoint_audit_dropped_total",
    "waypoint_audit_records_total",
    "waypoint_audit_sink_errors_total",
    "waypoint_cache_compute_failures_total",
    "waypoint_cache_computes_total",
    "waypoint_cache_entries",
    "waypoint_cache_entry_size_bytes",
    "waypoint_cache_evictions_total",
    "waypoint_cache_invalidations_total",
    "waypoint_cache_requests_total",
    "waypoint_errors_total",
    "waypoint_navigation_builds_total",
    "waypoint_route_checks_total",
];

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    // Access
    describe_counter!(
        "waypoint_access_decisions_total",
        "Permission decisions by outcome and denial reason"
    );
    describe_counter!("waypoint_route_checks_total", "Route guard checks by outcome");
    describe_counter!("waypoint_navigation_builds_total", "Uncached navigation builds by locale");

    // Cache
    describe_counter!(
        "waypoint_cache_requests_total",
        "Cache lookups by outcome (hit, stale, miss) and TTL class"
    );
    describe_counter!("waypoint_cache_computes_total", "Compute functions run by the cache");
    describe_counter!(
        "waypoint_cache_compute_failures_total",
        "Compute functions that returned an error"
    );
    describe_counter!("waypoint_cache_invalidations_total", "Entries removed by invalidation");
    describe_counter!("waypoint_cache_evictions_total", "Entries evicted for capacity");
    describe_gauge!("waypoint_cache_entries", "Entries currently stored");
    describe_histogram!(
        "waypoint_cache_entry_size_bytes",
        Unit::Bytes,
        "Serialized size of stored cache values"
    );

    // Audit
    describe_counter!("waypoint_audit_records_total", "Audit records submitted to the logger");
    describe_counter!(
        "waypoint_audit_dropped_total",
        "Audit records dropped on buffer overflow or after shutdown"
    );
    describe_counter!("waypoint_audit_sink_errors_total", "Audit sink write failures");

    describe_counter!("waypoint_errors_total", "Errors by code");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed: descriptions are no-ops.
        describe_metrics();
        assert!(METRIC_NAMES.iter().all(|n| n.starts_with("waypoint_")));
    }
}
