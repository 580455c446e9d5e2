//! Session state and socket ownership for one connected agent

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// One connected agent: identity, liveness, socket, and the two queues
/// that link the operator side to the session's worker.
///
/// The socket is exercised only by the session's handler while the session
/// is connected; the sweeper locks it to close it, which it does only after
/// the handler loop has stopped. The command queue has the handler as its
/// single consumer, the response queue has the router as its consumer.
pub struct Session {
    /// Monotonically assigned, never reused
    pub id: u64,
    /// Remote endpoint, immutable after accept
    pub addr: SocketAddr,
    pub(crate) stream: Mutex<TcpStream>,
    connected: AtomicBool,
    last_seen: Mutex<Instant>,
    command_tx: mpsc::UnboundedSender<String>,
    response_tx: mpsc::UnboundedSender<String>,
    pub(crate) response_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Session {
    /// Create a session over an accepted connection.
    ///
    /// Returns the session and the command-queue receiver, which the
    /// spawned handler takes as its exclusive end.
    pub fn new(
        id: u64,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            id,
            addr,
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
            command_tx,
            response_tx,
            response_rx: Mutex::new(response_rx),
        });

        (session, command_rx)
    }

    /// Whether the session is still logically connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// One-way transition to disconnected; a reconnecting agent gets a new
    /// session with a new id.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Record a successful I/O exchange
    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    /// Time since the last successful I/O
    pub async fn idle_for(&self) -> Duration {
        self.last_seen.lock().await.elapsed()
    }

    /// Queue a command for delivery to the agent.
    ///
    /// Returns false if the handler is gone and the queue is closed.
    pub fn submit_command(&self, cmd: &str) -> bool {
        self.command_tx.send(cmd.to_string()).is_ok()
    }

    /// Push a completed response for the operator side to collect
    pub(crate) fn push_response(&self, response: String) {
        // Receiver lives on the session itself, so this cannot fail while
        // the session is registered.
        let _ = self.response_tx.send(response);
    }

    /// Shut the connection down, ignoring already-closed errors
    pub(crate) async fn close(&self) {
        let mut stream = self.stream.lock().await;
        let _ = stream.shutdown().await;
    }

    /// Best-effort close for global shutdown: skips the socket if its
    /// handler still holds the lock (blocked in a read).
    pub(crate) async fn try_close(&self) {
        if let Ok(mut stream) = self.stream.try_lock() {
            let _ = stream.shutdown().await;
        }
    }
}
