//! Background eviction of disconnected sessions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use super::registry::SessionRegistry;

/// Periodically closes and evicts sessions that went disconnected.
///
/// Retiring sockets from one place keeps the rest of the server free of
/// close/remove races; handlers only ever flip the state flag.
pub struct LivenessSweeper {
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    sweep_interval: Duration,
}

impl LivenessSweeper {
    /// Create a sweeper over the shared registry
    pub fn new(registry: Arc<SessionRegistry>, running: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            running,
            sweep_interval: Duration::from_millis(muster_shared::timing::SWEEP_INTERVAL_MS),
        }
    }

    /// Run the sweep loop until shutdown
    pub async fn run(self) {
        let mut ticker = interval(self.sweep_interval);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.registry.remove_disconnected().await;
        }
    }
}
