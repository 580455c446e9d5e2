//! Registry of all live sessions, shared across the accept path, the
//! sweeper, and the command router

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use super::connection::Session;

/// Thread-safe session table with monotonic id allocation.
///
/// Inserted into by the accept path, pruned by the sweep, read by the
/// router. Ids are never reused; a reconnecting agent gets a fresh one.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register an accepted connection under the next id.
    ///
    /// Returns the session and the command-queue receiver for its handler.
    pub async fn register(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, command_rx) = Session::new(id, stream, addr);

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session.clone());

        (session, command_rx)
    }

    /// Look up a session by id
    pub async fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Point-in-time view of all sessions, ordered by id
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<_> = sessions.values().cloned().collect();
        all.sort_by_key(|session| session.id);
        all
    }

    /// Number of registered sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// One sweep: close and evict every disconnected session.
    ///
    /// This is the only place sockets of retired sessions are closed and
    /// the only place entries leave the table, so teardown cannot race.
    /// Returns the evicted ids.
    pub async fn remove_disconnected(&self) -> Vec<u64> {
        let dead: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|session| !session.is_connected())
                .cloned()
                .collect()
        };

        if dead.is_empty() {
            return Vec::new();
        }

        let mut ids = Vec::with_capacity(dead.len());
        for session in &dead {
            // A disconnected session's handler no longer touches the
            // socket, so the lock is free here.
            session.close().await;
            ids.push(session.id);
        }

        let mut sessions = self.sessions.write().await;
        for id in &ids {
            sessions.remove(id);
            info!("client {} disconnected", id);
        }
        ids.sort_unstable();
        ids
    }

    /// Best-effort teardown of every session at shutdown
    pub async fn shutdown_all(&self) {
        let all: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in all {
            session.mark_disconnected();
            session.try_close().await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::tcp_pair;

    async fn register_one(
        registry: &SessionRegistry,
    ) -> (Arc<Session>, tokio::net::TcpStream) {
        let (server, agent) = tcp_pair().await;
        let addr = server.peer_addr().expect("peer addr");
        let (session, _command_rx) = registry.register(server, addr).await;
        (session, agent)
    }

    #[tokio::test]
    async fn test_ids_strictly_increasing_and_never_reused() {
        let registry = SessionRegistry::new();

        let (first, _a1) = register_one(&registry).await;
        let (second, _a2) = register_one(&registry).await;
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        first.mark_disconnected();
        assert_eq!(registry.remove_disconnected().await, vec![1]);

        let (third, _a3) = register_one(&registry).await;
        assert_eq!(third.id, 3);
    }

    #[tokio::test]
    async fn test_snapshot_ordered_by_id() {
        let registry = SessionRegistry::new();
        let mut agents = Vec::new();
        for _ in 0..4 {
            let (_, agent) = register_one(&registry).await;
            agents.push(agent);
        }

        let ids: Vec<u64> = registry
            .snapshot()
            .await
            .iter()
            .map(|session| session.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_disconnected_sessions() {
        let registry = SessionRegistry::new();
        let (first, _a1) = register_one(&registry).await;
        let (second, _a2) = register_one(&registry).await;

        first.mark_disconnected();
        let evicted = registry.remove_disconnected().await;
        assert_eq!(evicted, vec![first.id]);

        assert!(registry.get(first.id).await.is_none());
        assert!(registry.get(second.id).await.is_some());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_to_do_is_empty() {
        let registry = SessionRegistry::new();
        let (_session, _agent) = register_one(&registry).await;
        assert!(registry.remove_disconnected().await.is_empty());
    }
}
