//! Infrastructure: configuration, metrics, retry policy

pub mod backoff;
pub mod config;
pub mod metrics;

pub use backoff::Backoff;
pub use config::Config;
pub use metrics::Metrics;

use tokio::sync::watch;

/// Block until the start gate opens. Tasks that must not run before the
/// server is bound await this once before entering their main loop.
pub async fn wait_ready(ready: &mut watch::Receiver<bool>) {
    while !*ready.borrow() {
        if ready.changed().await.is_err() {
            break;
        }
    }
}
