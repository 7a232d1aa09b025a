//! Run metrics.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const RUNS_TOTAL: &str = "vgsnap_runs_total";
pub const STAGE_FAILURES_TOTAL: &str = "vgsnap_stage_failures_total";
pub const FREEZE_WINDOW_SECONDS: &str = "vgsnap_freeze_window_seconds";
pub const CLONES_EVICTED_TOTAL: &str = "vgsnap_clones_evicted_total";
pub const THAW_ESCALATIONS_TOTAL: &str = "vgsnap_thaw_escalations_total";
pub const REMOTE_RETRIES_TOTAL: &str = "vgsnap_remote_retries_total";

/// Register all metrics with descriptions.
pub fn register_metrics() {
    describe_counter!(RUNS_TOTAL, "Completed orchestrator runs (by environment, result)");
    describe_counter!(
        STAGE_FAILURES_TOTAL,
        "Runs that terminated in a failed stage (by environment, stage)"
    );
    describe_histogram!(
        FREEZE_WINDOW_SECONDS,
        "Time the database spent frozen, from freeze request to thaw completion"
    );
    describe_counter!(CLONES_EVICTED_TOTAL, "Clone volume groups deleted by retention");
    describe_counter!(
        THAW_ESCALATIONS_TOTAL,
        "Runs that exhausted thaw retries and left the database possibly frozen"
    );
    describe_counter!(REMOTE_RETRIES_TOTAL, "Retries of transient remote failures (by operation)");
}

pub fn record_run(environment: &str, result: &str) {
    counter!(RUNS_TOTAL, "environment" => environment.to_string(), "result" => result.to_string())
        .increment(1);
}

pub fn record_stage_failure(environment: &str, stage: &str) {
    counter!(
        STAGE_FAILURES_TOTAL,
        "environment" => environment.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_freeze_window(environment: &str, seconds: f64) {
    histogram!(FREEZE_WINDOW_SECONDS, "environment" => environment.to_string()).record(seconds);
}

pub fn record_evictions(environment: &str, count: usize) {
    counter!(CLONES_EVICTED_TOTAL, "environment" => environment.to_string())
        .increment(count as u64);
}

pub fn record_thaw_escalation(environment: &str) {
    counter!(THAW_ESCALATIONS_TOTAL, "environment" => environment.to_string()).increment(1);
}

pub fn record_remote_retry(operation: &str) {
    counter!(REMOTE_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
