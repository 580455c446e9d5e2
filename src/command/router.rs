//! Dispatches operator commands to sessions and collects their responses

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::session::SessionRegistry;

/// Operator-input faults, reported locally at the console
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Client {0} not found")]
    NotFound(u64),

    #[error("Client {0} is disconnected")]
    Disconnected(u64),

    #[error("No connected clients")]
    NoSessions,
}

/// Routes operator commands into session queues and collects the
/// responses that arrive within a bounded window.
///
/// Pure with respect to the registry: every operation reads it, then acts
/// through the per-session queues. Connections are never touched here.
pub struct CommandRouter {
    registry: Arc<SessionRegistry>,
    response_window: Duration,
}

impl CommandRouter {
    /// Create a router with the given response-collection window
    pub fn new(registry: Arc<SessionRegistry>, response_window: Duration) -> Self {
        Self {
            registry,
            response_window,
        }
    }

    /// Force a sweep, then list connected sessions as (id, address)
    pub async fn list(&self) -> Vec<(u64, SocketAddr)> {
        self.registry.remove_disconnected().await;
        self.registry
            .snapshot()
            .await
            .iter()
            .map(|session| (session.id, session.addr))
            .collect()
    }

    /// Check that a session exists and is connected before entering its
    /// sub-prompt
    pub async fn validate_target(&self, id: u64) -> Result<(), RouterError> {
        match self.registry.get(id).await {
            None => Err(RouterError::NotFound(id)),
            Some(session) if !session.is_connected() => Err(RouterError::Disconnected(id)),
            Some(_) => Ok(()),
        }
    }

    /// Send one command to one session and print responses as they arrive
    /// for the duration of the window. Returns how many were printed.
    pub async fn dispatch_one(&self, id: u64, text: &str) -> Result<usize, RouterError> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or(RouterError::NotFound(id))?;
        if !session.is_connected() || !session.submit_command(text) {
            return Err(RouterError::Disconnected(id));
        }

        let deadline = Instant::now() + self.response_window;
        let mut responses = session.response_rx.lock().await;

        let mut printed = 0;
        loop {
            match timeout_at(deadline, responses.recv()).await {
                Ok(Some(response)) => {
                    println!("Client {}: {}", id, response);
                    printed += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }
        Ok(printed)
    }

    /// Broadcast one command to every connected session and print
    /// (id, response) pairs as they arrive, in any order, until the window
    /// closes. Returns how many were printed.
    pub async fn dispatch_all(&self, text: &str) -> Result<usize, RouterError> {
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|session| session.is_connected())
            .collect();
        if targets.is_empty() {
            return Err(RouterError::NoSessions);
        }

        let deadline = Instant::now() + self.response_window;
        let (merged_tx, mut merged_rx) = mpsc::unbounded_channel();

        // One collector per target funnels into a single channel, so the
        // console waits on one receiver instead of polling every queue.
        for session in targets {
            if !session.submit_command(text) {
                continue;
            }
            let merged_tx = merged_tx.clone();
            tokio::spawn(async move {
                let mut responses = session.response_rx.lock().await;
                loop {
                    match timeout_at(deadline, responses.recv()).await {
                        Ok(Some(response)) => {
                            if merged_tx.send((session.id, response)).is_err() {
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            });
        }
        drop(merged_tx);

        let mut printed = 0;
        loop {
            match timeout_at(deadline, merged_rx.recv()).await {
                Ok(Some((id, response))) => {
                    println!("Client {}: {}", id, response);
                    printed += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }
        Ok(printed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::tcp_pair;
    use crate::session::SessionHandler;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const TEST_WINDOW: Duration = Duration::from_millis(300);

    /// Register a session with a live handler and an agent task that
    /// answers every command except "mute" with "pong".
    async fn spawn_agent(registry: &Arc<SessionRegistry>) -> u64 {
        let (server, agent) = tcp_pair().await;
        let addr = server.peer_addr().expect("peer addr");
        let (session, command_rx) = registry.register(server, addr).await;
        let id = session.id;

        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(
            SessionHandler::new(session, command_rx, running, PathBuf::from(".")).run(),
        );
        tokio::spawn(agent_loop(agent));

        id
    }

    async fn agent_loop(mut agent: TcpStream) {
        let mut buf = [0u8; 256];
        // Greeting first, then the command/reply exchange.
        if agent.read(&mut buf).await.is_err() {
            return;
        }
        loop {
            let n = match agent.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            if &buf[..n] == b"mute" {
                continue;
            }
            if agent.write_all(b"pong").await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_id_is_local_error() {
        let registry = Arc::new(SessionRegistry::new());
        let router = CommandRouter::new(registry, TEST_WINDOW);

        let err = router.dispatch_one(99, "ls").await.expect_err("no session");
        assert!(matches!(err, RouterError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_dispatch_to_disconnected_id_is_local_error() {
        let registry = Arc::new(SessionRegistry::new());
        let id = spawn_agent(&registry).await;
        let session = registry.get(id).await.expect("session");
        session.mark_disconnected();

        let router = CommandRouter::new(registry, TEST_WINDOW);
        let err = router.dispatch_one(id, "ls").await.expect_err("retired");
        assert!(matches!(err, RouterError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_dispatch_one_collects_reply() {
        let registry = Arc::new(SessionRegistry::new());
        let id = spawn_agent(&registry).await;

        let router = CommandRouter::new(registry, TEST_WINDOW);
        let printed = router.dispatch_one(id, "ping").await.expect("dispatch");
        assert_eq!(printed, 1);
    }

    #[tokio::test]
    async fn test_dispatch_one_reports_silence() {
        let registry = Arc::new(SessionRegistry::new());
        let id = spawn_agent(&registry).await;

        let router = CommandRouter::new(registry, TEST_WINDOW);
        let printed = router.dispatch_one(id, "mute").await.expect("dispatch");
        assert_eq!(printed, 0);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_sessions_is_local_error() {
        let registry = Arc::new(SessionRegistry::new());
        let router = CommandRouter::new(registry, TEST_WINDOW);

        let err = router.dispatch_all("ls").await.expect_err("empty");
        assert!(matches!(err, RouterError::NoSessions));
    }

    #[tokio::test]
    async fn test_broadcast_collects_from_every_session() {
        let registry = Arc::new(SessionRegistry::new());
        for _ in 0..3 {
            spawn_agent(&registry).await;
        }

        let router = CommandRouter::new(registry, TEST_WINDOW);
        let printed = router.dispatch_all("ping").await.expect("dispatch");
        assert_eq!(printed, 3);
    }

    #[tokio::test]
    async fn test_list_hides_swept_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let first = spawn_agent(&registry).await;
        let second = spawn_agent(&registry).await;

        registry
            .get(first)
            .await
            .expect("session")
            .mark_disconnected();

        let router = CommandRouter::new(registry.clone(), TEST_WINDOW);
        let listed = router.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, second);
        assert!(registry.get(first).await.is_none());
    }
}
