//! Launcher metrics with Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for launcher activity.
#[derive(Debug, Default)]
pub struct Metrics {
    pub launched_total: AtomicU64,
    pub stopped_total: AtomicU64,
    pub restarts_total: AtomicU64,
    pub spawn_failures_total: AtomicU64,
    pub health_check_failures_total: AtomicU64,
    pub sessions_collected_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_launch(&self) {
        self.launched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stopped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_check_failure(&self) {
        self.health_check_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_collected(&self) {
        self.sessions_collected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Render in Prometheus text exposition format. `running` and
    /// `uptime_seconds` are point-in-time values supplied by the launcher.
    pub fn render_prometheus(&self, running: usize, uptime_seconds: u64) -> String {
        let mut out = String::new();

        let counter = |out: &mut String, name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        };

        counter(
            &mut out,
            "padl_patterns_launched_total",
            "Pattern processes launched.",
            self.launched_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "padl_patterns_stopped_total",
            "Pattern processes stopped by request.",
            self.stopped_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "padl_pattern_restarts_total",
            "Automatic pattern restarts.",
            self.restarts_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "padl_spawn_failures_total",
            "Launch attempts that failed before registration.",
            self.spawn_failures_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "padl_health_check_failures_total",
            "Failed control-plane health probes.",
            self.health_check_failures_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "padl_sessions_collected_total",
            "Session-isolated instances collected after idling.",
            self.sessions_collected_total.load(Ordering::Relaxed),
        );

        out.push_str("# HELP padl_patterns_running Currently tracked pattern processes.\n");
        out.push_str("# TYPE padl_patterns_running gauge\n");
        out.push_str(&format!("padl_patterns_running {}\n", running));

        out.push_str("# HELP padl_uptime_seconds Launcher uptime.\n");
        out.push_str("# TYPE padl_uptime_seconds counter\n");
        out.push_str(&format!("padl_uptime_seconds {}\n", uptime_seconds));

        out
    }
}
