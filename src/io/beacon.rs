//! Beacon TCP server
//!
//! Accepts the proximity companion's line-oriented session on the
//! configured address. The protocol assumes one beacon at a time: the
//! accept loop holds a session slot and refuses later connections while a
//! session is active, instead of letting two sessions race the docking
//! state.

use crate::infra::Metrics;
use crate::services::docking::DockRequest;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

/// Single-session guard shared between the accept loop and handlers.
#[derive(Clone, Default)]
struct SessionSlot(Arc<AtomicBool>);

impl SessionSlot {
    /// Claim the slot. False when a session already holds it.
    fn try_acquire(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Accept beacon sessions until shutdown. The listener is bound by the
/// caller so the start gate can open once the port is actually held.
pub async fn run_beacon_server(
    listener: TcpListener,
    req_tx: mpsc::Sender<DockRequest>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let slot = SessionSlot::default();

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("beacon_server_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        if !slot.try_acquire() {
                            metrics.record_session_refused();
                            warn!(peer = %addr, "beacon_session_refused: session already active");
                            continue;
                        }
                        metrics.record_session_accepted();

                        let tx = req_tx.clone();
                        let session_slot = slot.clone();
                        let session_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_session(socket, addr, tx, session_shutdown).await;
                            session_slot.release();
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "beacon_accept_failed");
                    }
                }
            }
        }
    }
}

/// One accepted beacon session. Every line is submitted to the docking
/// actor and the handler waits for completion, writing any reply and
/// flushing before the next read, so reports are processed strictly in
/// arrival order.
async fn handle_session(
    socket: TcpStream,
    addr: SocketAddr,
    req_tx: mpsc::Sender<DockRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(peer = %addr, "beacon_session_started");

    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break, // peer closed
            Err(e) => {
                warn!(peer = %addr, error = %e, "beacon_read_error");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            info!(peer = %addr, "beacon_session_quit");
            break;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let request = DockRequest { line: line.to_string(), done: done_tx };
        if req_tx.send(request).await.is_err() {
            warn!(peer = %addr, "beacon_actor_gone");
            break;
        }

        match done_rx.await {
            Ok(Some(reply)) => {
                let framed = format!("{}\n", reply);
                if let Err(e) = write_half.write_all(framed.as_bytes()).await {
                    warn!(peer = %addr, error = %e, "beacon_write_failed");
                    break;
                }
                if let Err(e) = write_half.flush().await {
                    warn!(peer = %addr, error = %e, "beacon_flush_failed");
                    break;
                }
            }
            Ok(None) => {}
            Err(_) => break, // actor dropped the request
        }
    }

    info!(peer = %addr, "beacon_session_closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_slot_single_holder() {
        let slot = SessionSlot::default();
        assert!(slot.try_acquire());
        assert!(!slot.try_acquire());
        slot.release();
        assert!(slot.try_acquire());
    }

    /// Fake docking actor: acks every line, replying to Z lines only.
    fn spawn_fake_actor(mut req_rx: mpsc::Receiver<DockRequest>) {
        tokio::spawn(async move {
            while let Some(req) = req_rx.recv().await {
                let reply =
                    if req.line.starts_with('Z') { Some("Connect 3".to_string()) } else { None };
                let _ = req.done.send(reply);
            }
        });
    }

    #[tokio::test]
    async fn test_session_replies_and_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (req_tx, req_rx) = mpsc::channel(8);
        spawn_fake_actor(req_rx);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            handle_session(socket, peer, req_tx, shutdown_rx).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = client.into_split();
        let mut replies = BufReader::new(read_half).lines();

        write_half.write_all(b"Z +0 12 3\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), replies.next_line())
            .await
            .expect("no reply within 2s")
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Connect 3"));

        // Log lines get no reply; session continues.
        write_half.write_all(b"2024-01-01T00:00:00;a;b\n").await.unwrap();

        write_half.write_all(b"quit\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("session did not close on quit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_session_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (req_tx, req_rx) = mpsc::channel(8);
        spawn_fake_actor(req_rx);

        let metrics = Arc::new(Metrics::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_beacon_server(listener, req_tx, metrics.clone(), shutdown_rx));

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        // The accept loop handles both connections shortly after.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let summary = metrics.report();
                if summary.sessions_accepted == 1 && summary.sessions_refused == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected one accepted and one refused session");
    }
}
