use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for exchange latency (seconds).
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    /// Must be called **once** at startup before any `counter!`/`gauge!`/
    /// `histogram!` calls, from either binary.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // link / multiplexer (ship)
        describe_counter!("shiplink_frames_sent_total", Unit::Count, "Total frames written to the offshore link");
        describe_counter!("shiplink_frames_received_total", Unit::Count, "Total frames read from the offshore link");
        describe_gauge!("shiplink_queue_depth", Unit::Count, "Current depth of the submission queue");
        describe_counter!("shiplink_submissions_total", Unit::Count, "Total submissions accepted by the multiplexer");
        describe_counter!("shiplink_submissions_rejected_total", Unit::Count, "Total submissions rejected (queue full)");
        describe_histogram!("shiplink_exchange_duration_seconds", Unit::Seconds, "Time from submit() to completion signal");
        describe_counter!("shiplink_reconnect_attempts_total", Unit::Count, "Total reconnection attempts made to offshore");
        describe_counter!("shiplink_reconnect_exhausted_total", Unit::Count, "Total times reconnection exhausted max attempts");
        describe_gauge!("shiplink_link_connected", Unit::Count, "1 if the link is currently connected, else 0");

        // tunneling
        describe_gauge!("shiplink_tunnels_active", Unit::Count, "Number of CONNECT tunnels currently relaying");
        describe_counter!("shiplink_tunnels_opened_total", Unit::Count, "Total CONNECT tunnels opened");
        describe_counter!("shiplink_tunnel_bytes_total", Unit::Bytes, "Total bytes relayed through tunnels (both directions)");

        // ingress / egress
        describe_counter!("shiplink_ingress_connections_total", Unit::Count, "Total browser connections accepted");
        describe_counter!("shiplink_egress_requests_total", Unit::Count, "Total REQUEST payloads processed offshore");
        describe_counter!("shiplink_origin_errors_total", Unit::Count, "Total synthetic error responses produced for origin failures");

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
