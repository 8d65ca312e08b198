//! Drive bus client
//!
//! Boundary to the drive-by-wire service: one TCP connection carrying
//! newline-delimited JSON frames. Motion commands flow out from the
//! generator's queue; feedback frames carry the measured ground speed
//! back, published on a watch channel for the docking actor.
//!
//! Connection loss discards the stream and reconnects under the supervised
//! backoff policy. While disconnected, queued commands are drained and
//! dropped so the generator never blocks on a dead bus.

use crate::infra::{wait_ready, Backoff, Metrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Control mode requested with every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    AutoActive,
}

/// One motion command on the wire, emitted once per generator tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionCommand {
    pub control_state: ControlState,
    pub speed: f64,
    pub angular_rate: f64,
}

impl MotionCommand {
    pub fn new(speed: f64) -> Self {
        Self { control_state: ControlState::AutoActive, speed, angular_rate: 0.0 }
    }
}

/// Feedback frame from the drive service.
#[derive(Debug, Deserialize)]
pub struct BusFeedback {
    pub speed: f64,
}

#[derive(Debug, Clone)]
pub struct DriveBusConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for DriveBusConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9001".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
        }
    }
}

pub struct DriveBusClient {
    config: DriveBusConfig,
    cmd_rx: mpsc::Receiver<MotionCommand>,
    speed_tx: watch::Sender<f64>,
    backoff: Backoff,
    metrics: Arc<Metrics>,
}

/// Why a bus session ended.
enum SessionEnd {
    Disconnected,
    Shutdown,
}

impl DriveBusClient {
    pub fn new(
        config: DriveBusConfig,
        cmd_rx: mpsc::Receiver<MotionCommand>,
        speed_tx: watch::Sender<f64>,
        backoff: Backoff,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { config, cmd_rx, speed_tx, backoff, metrics }
    }

    pub async fn run(
        mut self,
        mut ready: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        wait_ready(&mut ready).await;
        info!(addr = %self.config.addr, "drive_bus_started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    if self.backoff.is_open() {
                        warn!(
                            error = %e,
                            failures = self.backoff.failures(),
                            cooldown_ms = delay.as_millis() as u64,
                            "drive_bus_circuit_open"
                        );
                    } else {
                        warn!(error = %e, retry_ms = delay.as_millis() as u64, "drive_bus_connect_failed");
                    }
                    if !self.drain_for(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.backoff.reset();
            info!(addr = %self.config.addr, "drive_bus_connected");

            match self.session(stream, &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Disconnected => {
                    self.metrics.record_bus_reconnect();
                }
            }
        }

        info!("drive_bus_stopped");
    }

    async fn connect(&self) -> Result<TcpStream, std::io::Error> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.addr),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Pump commands out and feedback in until the peer drops or shutdown.
    async fn session(
        &mut self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let cmd_rx = &mut self.cmd_rx;
        let speed_tx = &self.speed_tx;
        let read_timeout = self.config.read_timeout;

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return SessionEnd::Shutdown;
                    }
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Generator gone, nothing left to feed the bus.
                        return SessionEnd::Shutdown;
                    };
                    let mut wire = match serde_json::to_string(&cmd) {
                        Ok(wire) => wire,
                        Err(e) => {
                            warn!(error = %e, "drive_bus_encode_failed");
                            continue;
                        }
                    };
                    wire.push('\n');
                    if let Err(e) = write_half.write_all(wire.as_bytes()).await {
                        warn!(error = %e, "drive_bus_write_failed");
                        return SessionEnd::Disconnected;
                    }
                }
                res = tokio::time::timeout(read_timeout, lines.next_line()) => {
                    match res {
                        Ok(Ok(Some(line))) => handle_feedback(speed_tx, &line),
                        Ok(Ok(None)) => {
                            warn!("drive_bus_connection_closed");
                            return SessionEnd::Disconnected;
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "drive_bus_read_error");
                            return SessionEnd::Disconnected;
                        }
                        // No feedback inside the window; commands keep flowing.
                        Err(_) => debug!("drive_bus_read_timeout"),
                    }
                }
            }
        }
    }

    /// Sleep out a reconnect delay while draining queued commands, so the
    /// generator's try_send never backs up against a dead bus.
    /// Returns false when shutdown was requested.
    async fn drain_for(&mut self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        let cmd_rx = &mut self.cmd_rx;
        let metrics = &self.metrics;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(_) => metrics.record_command_dropped(),
                        None => return false,
                    }
                }
            }
        }
    }
}

fn handle_feedback(speed_tx: &watch::Sender<f64>, line: &str) {
    match serde_json::from_str::<BusFeedback>(line) {
        Ok(feedback) => {
            speed_tx.send_replace(feedback.speed);
            debug!(speed = feedback.speed, "drive_bus_feedback");
        }
        Err(e) => debug!(error = %e, line = %line, "drive_bus_unknown_frame"),
    }
}
