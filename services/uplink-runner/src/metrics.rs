//! Prometheus metrics exposition
//!
//! The pool and workers emit:
//!
//! - `uplink_heartbeats_total` (counter): label `result`
//! - `uplink_heartbeat_duration_seconds` (histogram)
//! - `uplink_worker_exits_total` (counter): label `outcome`
//! - `uplink_pool_active` / `uplink_pool_running` / `uplink_pool_backlog` /
//!   `uplink_pool_retired` (gauges)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `uplink_heartbeat_duration_seconds` with explicit buckets so it
/// renders as a histogram (with `_bucket` lines for `histogram_quantile()`
/// queries) rather than the default summary. The upper bucket matches the
/// request timeout ceiling.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "uplink_heartbeat_duration_seconds".to_string(),
            ),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
