//! Integration tests for run metrics.
//!
//! Metrics are recorded into a local Prometheus recorder and checked in the
//! rendered exposition format, the same text the node-exporter textfile
//! collector reads.

use metrics_exporter_prometheus::PrometheusBuilder;
use vgsnap_core::observability::metrics::*;

#[test]
fn test_run_metrics_render() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        register_metrics();
        record_run("prd", "done");
        record_run("tst", "failed");
        record_stage_failure("tst", "thawing");
        record_thaw_escalation("tst");
        record_evictions("prd", 2);
        record_remote_retry("attach_to_host");
        record_remote_retry("attach_to_host");
        record_freeze_window("prd", 0.8);
    });

    let rendered = handle.render();
    assert!(rendered.contains(r#"vgsnap_runs_total{environment="prd",result="done"} 1"#));
    assert!(rendered.contains(r#"vgsnap_runs_total{environment="tst",result="failed"} 1"#));
    assert!(rendered.contains(r#"vgsnap_stage_failures_total{environment="tst",stage="thawing"} 1"#));
    assert!(rendered.contains(r#"vgsnap_thaw_escalations_total{environment="tst"} 1"#));
    assert!(rendered.contains(r#"vgsnap_clones_evicted_total{environment="prd"} 2"#));
    assert!(rendered.contains(r#"vgsnap_remote_retries_total{operation="attach_to_host"} 2"#));
    assert!(rendered.contains(r#"vgsnap_freeze_window_seconds_count{environment="prd"} 1"#));
    assert!(rendered.contains("# HELP vgsnap_freeze_window_seconds"));
}

#[test]
fn test_zero_evictions_still_exported() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || record_evictions("dr", 0));

    assert!(handle.render().contains(r#"vgsnap_clones_evicted_total{environment="dr"} 0"#));
}
