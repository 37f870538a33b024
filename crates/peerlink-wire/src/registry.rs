//! Listener registry: correlation table for pending replies.
//!
//! The [`ListenerRegistry`] maps a correlation key to whoever waits for the
//! matching response. It is owned by the inbound side of a local port and
//! shared by every [`Connection`](crate::Connection) created against it.
//!
//! Two kinds of entries exist:
//! - one-shot [`ReplyHandle`]s, consumed and removed when the reply arrives
//! - caller-managed [`ReplyListener`]s, which stay until `remove` is called
//!
//! Nothing expires on its own; [`ListenerRegistry::evict_older_than`] is
//! available for callers that want a sweep.

use crate::node::RemoteNode;
use dashmap::DashMap;
use peerlink_types::{WireError, WireResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Caller-managed reply callback.
///
/// Invoked on the inbound connection's task; keep it short.
pub trait ReplyListener: Send + Sync + 'static {
    fn on_reply(&self, key: &str, payload: &[u8]);
}

enum Pending {
    Once(oneshot::Sender<Vec<u8>>),
    Listener(Arc<dyn ReplyListener>),
}

struct PendingReply {
    pending: Pending,
    remote: Option<RemoteNode>,
    registered_at: Instant,
}

/// Awaitable reply for a request sent with the callback-style API.
#[derive(Debug)]
pub struct ReplyHandle {
    key: String,
    rx: oneshot::Receiver<Vec<u8>>,
}

impl ReplyHandle {
    /// Correlation key of the request.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the reply payload.
    ///
    /// Fails with `ReplyDropped` if the entry was removed or the registry
    /// closed before a reply arrived.
    pub async fn wait(self) -> WireResult<Vec<u8>> {
        let Self { key, rx } = self;
        rx.await.map_err(|_| WireError::ReplyDropped(key))
    }
}

/// Thread-safe correlation table, cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    entries: Arc<DashMap<String, PendingReply>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot entry and return the handle that receives the reply.
    pub fn register_once(&self, key: impl Into<String>, remote: Option<RemoteNode>) -> ReplyHandle {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.insert(key.clone(), Pending::Once(tx), remote);
        ReplyHandle { key, rx }
    }

    /// Register a caller-managed listener under `key`.
    pub fn register_listener(
        &self,
        key: impl Into<String>,
        listener: Arc<dyn ReplyListener>,
        remote: Option<RemoteNode>,
    ) {
        self.insert(key.into(), Pending::Listener(listener), remote);
    }

    fn insert(&self, key: String, pending: Pending, remote: Option<RemoteNode>) {
        let entry = PendingReply {
            pending,
            remote,
            registered_at: Instant::now(),
        };
        if self.entries.insert(key.clone(), entry).is_some() {
            debug!(key = %key, "Correlation key re-registered, previous listener replaced");
        }
    }

    /// Deliver a reply to the entry registered under `key`.
    ///
    /// Returns `false` when no entry exists.
    pub fn resolve(&self, key: &str, payload: Vec<u8>) -> bool {
        if let Some((_, entry)) = self
            .entries
            .remove_if(key, |_, entry| matches!(entry.pending, Pending::Once(_)))
        {
            if let Pending::Once(tx) = entry.pending {
                if tx.send(payload).is_err() {
                    debug!(key = %key, "Reply arrived after its waiter went away");
                }
            }
            return true;
        }

        // Clone the listener out so no map lock is held during the callback.
        let listener = self.entries.get(key).and_then(|entry| match &entry.pending {
            Pending::Listener(listener) => Some(Arc::clone(listener)),
            Pending::Once(_) => None,
        });
        match listener {
            Some(listener) => {
                listener.on_reply(key, &payload);
                true
            }
            None => false,
        }
    }

    /// Remove an entry. Returns `true` if one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// True while an entry of either kind is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Peer the request under `key` was sent to, if known.
    pub fn remote_of(&self, key: &str) -> Option<RemoteNode> {
        self.entries.get(key).and_then(|entry| entry.remote.clone())
    }

    /// Number of registered entries, one-shot and listener alike.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries registered more than `max_age` ago. Returns how many.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.registered_at.elapsed() <= max_age);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, max_age_ms = max_age.as_millis() as u64, "Evicted stale reply listeners");
        }
        evicted
    }

    /// Drop every entry; pending handles fail with `ReplyDropped`.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("pending", &self.entries.len())
            .finish()
    }
}
