//! RemoteSessionManager: one live session per remote node.
//!
//! Construction validates the local node, binds the local listener, and waits
//! for the bind to finish; a manager never exists without a working listener.
//! Sessions are created on demand and pooled by [`RemoteNode`].

use crate::connection_manager::ConnectionManager;
use crate::handler::SessionResolver;
use crate::node::{LocalNode, RemoteNode};
use crate::pool::SessionPool;
use crate::registry::ListenerRegistry;
use crate::session::RemoteSession;
use async_trait::async_trait;
use peerlink_types::{WireConfig, WireError, WireResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct RemoteSessionManager {
    local: LocalNode,
    local_id: String,
    connection_manager: ConnectionManager,
    sessions: SessionPool<RemoteNode, RemoteSession>,
    closed: AtomicBool,
}

impl RemoteSessionManager {
    /// Validate `local`, start listening on its port, and wait for the bind.
    ///
    /// A bind failure is returned as [`WireError::Boot`] carrying the cause.
    pub async fn start(local: LocalNode, config: WireConfig) -> WireResult<Arc<Self>> {
        check(&local)?;
        config.validate()?;

        let local_id = local.local_id();
        let manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            let resolver: Weak<dyn SessionResolver> = weak.clone();
            Self {
                connection_manager: ConnectionManager::new(local.clone(), config, resolver),
                local,
                local_id,
                sessions: SessionPool::new(),
                closed: AtomicBool::new(false),
            }
        });

        let boot = manager.connection_manager.start()?;
        boot.wait().await.map_err(WireError::Boot)?;
        info!(local = %manager.local, handler = %manager.local.handler_name(), "Session manager started");
        Ok(manager)
    }

    /// Session to `remote`, connecting if there is none yet.
    ///
    /// Concurrent callers for the same node share one connection attempt.
    /// Returns `None` if the peer is unreachable or the manager is shut down.
    pub async fn new_session(&self, remote: &RemoteNode) -> Option<Arc<RemoteSession>> {
        if self.is_shutdown() {
            return None;
        }
        self.sessions
            .get_or_try_insert_with(remote, || self.open_session(remote))
            .await
    }

    /// Sessions for every reachable node in `remotes`.
    ///
    /// Unreachable nodes are skipped without reporting. Returns `None` when no
    /// session could be opened at all.
    pub async fn new_sessions(&self, remotes: &[RemoteNode]) -> Option<Vec<Arc<RemoteSession>>> {
        let mut sessions = Vec::with_capacity(remotes.len());
        for remote in remotes {
            if let Some(session) = self.new_session(remote).await {
                sessions.push(session);
            }
        }
        if sessions.is_empty() {
            None
        } else {
            Some(sessions)
        }
    }

    async fn open_session(&self, remote: &RemoteNode) -> Option<Arc<RemoteSession>> {
        let connection = self
            .connection_manager
            .connect(remote, self.local.handler_name())
            .await?;
        let session = match RemoteSession::new(self.local_id.clone(), connection) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!(remote = %remote, error = %e, "Could not create session");
                return None;
            }
        };
        session.init();
        Some(session)
    }

    /// Pooled live session to `remote`, without connecting.
    pub fn session(&self, remote: &RemoteNode) -> Option<Arc<RemoteSession>> {
        self.sessions.get(remote)
    }

    /// Remove and close the session to `remote`. Returns `true` if one existed.
    pub fn close_session(&self, remote: &RemoteNode) -> bool {
        match self.sessions.remove(remote) {
            Some(session) => {
                session.close();
                debug!(remote = %remote, "Session closed");
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connection_manager
    }

    pub fn local_node(&self) -> &LocalNode {
        &self.local
    }

    /// Hex id stamped on every message this node sends.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Correlation table of the local listener.
    pub fn listeners(&self) -> &ListenerRegistry {
        self.connection_manager.receiver().listeners()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every session and the local listener. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions = self.sessions.drain();
        let count = sessions.len();
        for session in sessions {
            session.close();
        }
        self.connection_manager.close();
        info!(local = %self.local, sessions = count, "Session manager shut down");
    }
}

impl Drop for RemoteSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RemoteSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSessionManager")
            .field("local", &self.local)
            .field("sessions", &self.sessions.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[async_trait]
impl SessionResolver for RemoteSessionManager {
    async fn resolve_session(&self, remote: &RemoteNode) -> Option<Arc<RemoteSession>> {
        self.new_session(remote).await
    }
}

/// Fail fast on a local node that can never serve.
fn check(local: &LocalNode) -> WireResult<()> {
    if local.port() == 0 {
        return Err(WireError::InvalidPort(local.port()));
    }
    if local.default_handler().is_none() {
        return Err(WireError::MissingDefaultHandler);
    }
    Ok(())
}
