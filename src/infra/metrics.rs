//! Lock-free counters for the docking service
//!
//! All counters are relaxed atomics updated from the hot paths and read
//! by the periodic reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Default)]
pub struct Metrics {
    reports_parsed: AtomicU64,
    reports_ignored: AtomicU64,
    replies_sent: AtomicU64,
    log_rows: AtomicU64,
    log_errors: AtomicU64,
    commands_emitted: AtomicU64,
    commands_dropped: AtomicU64,
    bus_reconnects: AtomicU64,
    sessions_accepted: AtomicU64,
    sessions_refused: AtomicU64,
}

/// Point-in-time counter snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSummary {
    pub reports_parsed: u64,
    pub reports_ignored: u64,
    pub replies_sent: u64,
    pub log_rows: u64,
    pub log_errors: u64,
    pub commands_emitted: u64,
    pub commands_dropped: u64,
    pub bus_reconnects: u64,
    pub sessions_accepted: u64,
    pub sessions_refused: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            reports_parsed = self.reports_parsed,
            reports_ignored = self.reports_ignored,
            replies_sent = self.replies_sent,
            log_rows = self.log_rows,
            log_errors = self.log_errors,
            commands_emitted = self.commands_emitted,
            commands_dropped = self.commands_dropped,
            bus_reconnects = self.bus_reconnects,
            sessions_accepted = self.sessions_accepted,
            sessions_refused = self.sessions_refused,
            "metrics_summary"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_report_parsed(&self) {
        self.reports_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_ignored(&self) {
        self.reports_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_row(&self) {
        self.log_rows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_error(&self) {
        self.log_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_emitted(&self) {
        self.commands_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_reconnect(&self) {
        self.bus_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_accepted(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_refused(&self) {
        self.sessions_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            reports_parsed: self.reports_parsed.load(Ordering::Relaxed),
            reports_ignored: self.reports_ignored.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            log_rows: self.log_rows.load(Ordering::Relaxed),
            log_errors: self.log_errors.load(Ordering::Relaxed),
            commands_emitted: self.commands_emitted.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            bus_reconnects: self.bus_reconnects.load(Ordering::Relaxed),
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_refused: self.sessions_refused.load(Ordering::Relaxed),
        }
    }
}

/// Log a counter summary on the given interval until shutdown.
pub async fn run_reporter(
    metrics: Arc<Metrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => metrics.report().log(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_report_parsed();
        metrics.record_report_parsed();
        metrics.record_report_ignored();
        metrics.record_command_emitted();
        metrics.record_command_dropped();
        metrics.record_session_refused();

        let summary = metrics.report();
        assert_eq!(summary.reports_parsed, 2);
        assert_eq!(summary.reports_ignored, 1);
        assert_eq!(summary.commands_emitted, 1);
        assert_eq!(summary.commands_dropped, 1);
        assert_eq!(summary.sessions_refused, 1);
        assert_eq!(summary.replies_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_shutdown() {
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter =
            tokio::spawn(run_reporter(metrics, Duration::from_secs(10), shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .expect("reporter did not stop on shutdown")
            .unwrap();
    }
}
