//! Docking actor - single writer over the shared docking state
//!
//! All mutation is serialized through one request channel: session
//! handlers submit raw lines and wait on a completion oneshot carrying the
//! optional protocol reply. Readers (command generator, observers) get
//! immutable snapshots over a watch channel, refreshed after every event.

use crate::domain::docking::{DockSnapshot, DockingParams, DockingState, Effect};
use crate::domain::report::{classify, Line};
use crate::infra::Metrics;
use crate::io::TripLog;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

/// One protocol line submitted by a session handler. `done` resolves when
/// the line is fully processed, carrying the reply to write back, if any.
#[derive(Debug)]
pub struct DockRequest {
    pub line: String,
    pub done: oneshot::Sender<Option<String>>,
}

pub struct DockingActor {
    state: DockingState,
    trip_log: TripLog,
    speed_rx: watch::Receiver<f64>,
    snapshot_tx: watch::Sender<DockSnapshot>,
    metrics: Arc<Metrics>,
}

impl DockingActor {
    pub fn new(
        params: DockingParams,
        trip_log: TripLog,
        speed_rx: watch::Receiver<f64>,
        metrics: Arc<Metrics>,
    ) -> (Self, watch::Receiver<DockSnapshot>) {
        let state = DockingState::new(params);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let actor = Self { state, trip_log, speed_rx, snapshot_tx, metrics };
        (actor, snapshot_rx)
    }

    pub async fn run(
        mut self,
        mut req_rx: mpsc::Receiver<DockRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("docking_actor_started");
        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                req = req_rx.recv() => {
                    match req {
                        Some(req) => self.handle(req).await,
                        None => break,
                    }
                }
            }
        }
        self.trip_log.close();
        info!("docking_actor_stopped");
    }

    async fn handle(&mut self, req: DockRequest) {
        let line = classify(&req.line);

        match &line {
            Line::Ignored => self.metrics.record_report_ignored(),
            Line::Report(_) => self.metrics.record_report_parsed(),
            _ => {}
        }

        let measured_speed = *self.speed_rx.borrow();
        let effects = self.state.apply(&line, measured_speed);

        let mut reply = None;
        for effect in effects {
            match effect {
                Effect::Reply(text) => reply = Some(text),
                Effect::OpenLog { tag } => {
                    if let Err(e) = self.trip_log.open(tag) {
                        self.metrics.record_log_error();
                        warn!(tag = tag, error = %e, "trip_log_open_failed");
                    }
                }
                Effect::AppendLog { time, data } => match self.trip_log.append(&time, &data) {
                    Ok(true) => self.metrics.record_log_row(),
                    Ok(false) => {}
                    Err(e) => {
                        self.metrics.record_log_error();
                        warn!(error = %e, "trip_log_append_failed");
                    }
                },
                Effect::RotateLog => {
                    if let Err(e) = self.trip_log.rotate() {
                        self.metrics.record_log_error();
                        warn!(error = %e, "trip_log_rotate_failed");
                    }
                }
                Effect::Pause(duration) => tokio::time::sleep(duration).await,
            }
        }

        self.snapshot_tx.send_replace(self.state.snapshot());

        if reply.is_some() {
            self.metrics.record_reply_sent();
        }
        // A dropped receiver just means the session went away mid-line.
        let _ = req.done.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::docking::DockPhase;
    use std::time::Duration;
    use tempfile::tempdir;

    struct TestActor {
        req_tx: mpsc::Sender<DockRequest>,
        snapshot_rx: watch::Receiver<DockSnapshot>,
        speed_tx: watch::Sender<f64>,
        metrics: Arc<Metrics>,
        #[allow(dead_code)]
        shutdown_tx: watch::Sender<bool>,
    }

    fn spawn_actor(trip_dir: &std::path::Path) -> TestActor {
        // Short debounce keeps the 100-report run fast.
        let params = DockingParams { debounce: Duration::from_millis(0), ..Default::default() };
        let (speed_tx, speed_rx) = watch::channel(0.0f64);
        let metrics = Arc::new(Metrics::new());
        let (actor, snapshot_rx) =
            DockingActor::new(params, TripLog::new(trip_dir), speed_rx, metrics.clone());
        let (req_tx, req_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(actor.run(req_rx, shutdown_rx));
        TestActor { req_tx, snapshot_rx, speed_tx, metrics, shutdown_tx }
    }

    async fn submit(actor: &TestActor, line: &str) -> Option<String> {
        let (done_tx, done_rx) = oneshot::channel();
        actor
            .req_tx
            .send(DockRequest { line: line.to_string(), done: done_tx })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("actor did not ack in time")
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_approach_and_departure() {
        let dir = tempdir().unwrap();
        let actor = spawn_actor(dir.path());
        actor.speed_tx.send_replace(0.0);

        assert_eq!(submit(&actor, "FILE").await, None);
        assert_eq!(submit(&actor, "2024-01-01T00:00:00;sensorA;42").await, None);

        for i in 0..99 {
            assert_eq!(submit(&actor, "Z +0 12 3").await, None, "early reply at report {}", i);
        }
        let reply = submit(&actor, "Z +0 12 3").await;
        assert_eq!(reply.as_deref(), Some("Connect 3"));

        let snap = *actor.snapshot_rx.borrow();
        assert!(snap.connected);
        assert_eq!(snap.current_tag, Some(3));
        assert_eq!(snap.phase, DockPhase::Docked);
        assert_eq!(snap.commanded_speed(), 0.0);

        let reply = submit(&actor, "DONE").await;
        assert_eq!(reply.as_deref(), Some("Disconnect 3"));

        let snap = *actor.snapshot_rx.borrow();
        assert!(!snap.connected);
        assert_eq!(snap.current_tag, None);
        assert!(snap.moving);

        let summary = actor.metrics.report();
        assert_eq!(summary.reports_parsed, 100);
        assert_eq!(summary.replies_sent, 2);
        assert_eq!(summary.log_rows, 1);
    }

    #[tokio::test]
    async fn test_connect_held_back_while_moving() {
        let dir = tempdir().unwrap();
        let actor = spawn_actor(dir.path());
        actor.speed_tx.send_replace(0.2);

        for _ in 0..120 {
            assert_eq!(submit(&actor, "Z +0 12 3").await, None);
        }
        assert!(!actor.snapshot_rx.borrow().connected);

        // Stop the vehicle; the next boundary report completes the handshake.
        actor.speed_tx.send_replace(0.0);
        let reply = submit(&actor, "Z +0 12 3").await;
        assert_eq!(reply.as_deref(), Some("Connect 3"));
    }

    #[tokio::test]
    async fn test_malformed_line_no_mutation_no_reply() {
        let dir = tempdir().unwrap();
        let actor = spawn_actor(dir.path());

        let before = *actor.snapshot_rx.borrow();
        assert_eq!(submit(&actor, "Z +0 12").await, None);
        assert_eq!(*actor.snapshot_rx.borrow(), before);
        assert_eq!(actor.metrics.report().reports_ignored, 1);
    }

    #[tokio::test]
    async fn test_log_rows_written_to_sink() {
        let dir = tempdir().unwrap();
        let actor = spawn_actor(dir.path());

        submit(&actor, "Z +4 12 9").await;
        submit(&actor, "FILE").await;
        submit(&actor, "2024-01-01T00:00:00;sensorA;42").await;

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_str().unwrap().to_string();
        assert!(name.ends_with("_node9.csv"), "unexpected file name {}", name);

        let content = std::fs::read_to_string(entries[0].path()).unwrap();
        assert!(content.contains("2024-01-01T00:00:00,sensorA;42"));
    }
}
