use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: normal-path admission decisions. Labels: outcome
/// (confirmed | pending | rejected | maintenance_blocked).
pub const ADMISSIONS_TOTAL: &str = "motorpool_admissions_total";

/// Counter: per-conflict emergency resolutions. Labels: outcome
/// (rescheduled | auto_cancelled | pending_resolution).
pub const EMERGENCY_RESOLUTIONS_TOTAL: &str = "motorpool_emergency_resolutions_total";

/// Counter: emergency requests rejected by the monthly quota.
pub const QUOTA_REJECTIONS_TOTAL: &str = "motorpool_quota_rejections_total";

/// Histogram: reschedule probe attempts per resolved conflict.
pub const RESCHEDULE_PROBE_ATTEMPTS: &str = "motorpool_reschedule_probe_attempts";

// ── Recurrence expansion ────────────────────────────────────────

/// Counter: expansion passes over a single series.
pub const EXPANSION_RUNS_TOTAL: &str = "motorpool_expansion_runs_total";

/// Histogram: bookings staged per expansion run.
pub const EXPANSION_GENERATED: &str = "motorpool_expansion_generated";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
