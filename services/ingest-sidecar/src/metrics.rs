//! Prometheus metrics exposition.
//!
//! Registers fetch-cycle duration and RPC request duration histograms, both
//! with explicit bucket boundaries so they render as Prometheus histograms
//! rather than the default summary.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const RPC_DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
const FETCH_DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Installs the process-global Prometheus recorder and returns a handle for
/// rendering `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("ingest_rpc_request_duration_seconds".to_string()),
            RPC_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .set_buckets_for_metric(
            Matcher::Full("ingest_fetch_duration_seconds".to_string()),
            FETCH_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Records one completed RPC handler invocation.
pub fn record_rpc_request(method: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("ingest_rpc_requests_total", "method" => method.to_string(), "status" => status_str.clone())
        .increment(1);
    metrics::histogram!("ingest_rpc_request_duration_seconds", "method" => method.to_string())
        .record(duration_secs);
    let _ = status_str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("ingest_rpc_request_duration_seconds".to_string()),
                RPC_DURATION_BUCKETS,
            )
            .expect("failed to set histogram buckets")
            .set_buckets_for_metric(
                Matcher::Full("ingest_fetch_duration_seconds".to_string()),
                FETCH_DURATION_BUCKETS,
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_rpc_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_rpc_request("list_articles_with_tags", 200, 0.012);

        let output = handle.render();
        assert!(output.contains("ingest_rpc_requests_total"));
        assert!(output.contains("method=\"list_articles_with_tags\""));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("ingest_rpc_request_duration_seconds_bucket"));
    }

    #[test]
    fn fetch_duration_histogram_uses_configured_buckets() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("ingest_fetch_duration_seconds", "stream_id" => "feed/x".to_string())
            .record(1.2);

        let output = handle.render();
        assert!(output.contains("ingest_fetch_duration_seconds_bucket"));
    }

    #[test]
    fn record_rpc_request_does_not_panic_without_installed_recorder() {
        record_rpc_request("health", 200, 0.001);
    }
}
