//! RemoteSession: a reusable logical session with one peer.

use crate::connection::Connection;
use crate::node::RemoteNode;
use crate::pool::Poolable;
use crate::registry::{ReplyHandle, ReplyListener};
use peerlink_types::{WireError, WireResult};
use std::sync::Arc;
use tracing::debug;

/// One peer, one [`Connection`].
///
/// Every message sent through a session carries this node's local id as its
/// session id, which is how the far side finds its way back to us.
pub struct RemoteSession {
    local_id: String,
    remote_session_id: String,
    remote: RemoteNode,
    connection: Arc<Connection>,
}

impl RemoteSession {
    /// Wrap a connected [`Connection`].
    pub fn new(local_id: impl Into<String>, connection: Arc<Connection>) -> WireResult<Self> {
        let remote = connection
            .remote_node()
            .cloned()
            .ok_or(WireError::NotConnected)?;
        Ok(Self {
            local_id: local_id.into(),
            remote_session_id: remote.session_id(),
            remote,
            connection,
        })
    }

    /// Register with the local receiver so requests arriving from this peer
    /// are answered over this session.
    pub fn init(self: &Arc<Self>) {
        self.connection.init_session(Arc::clone(self));
        debug!(remote = %self.remote, "Session initialised");
    }

    pub fn session_id(&self) -> &str {
        &self.local_id
    }

    pub fn remote_session_id(&self) -> &str {
        &self.remote_session_id
    }

    pub fn remote_node(&self) -> &RemoteNode {
        &self.remote
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn request(&self, payload: impl Into<Vec<u8>>) -> WireResult<ReplyHandle> {
        self.connection.request(&self.local_id, payload)
    }

    /// Returns the correlation key; remove it with
    /// [`remove_listener`](Self::remove_listener) when done.
    pub fn request_with_listener(
        &self,
        payload: impl Into<Vec<u8>>,
        listener: Arc<dyn ReplyListener>,
    ) -> WireResult<String> {
        self.connection
            .request_with_listener(&self.local_id, payload, listener)
    }

    pub fn reply(&self, key: &str, payload: impl Into<Vec<u8>>) -> WireResult<()> {
        self.connection.reply(&self.local_id, key, payload)
    }

    pub fn remove_listener(&self, key: &str) -> bool {
        self.connection.remove_listener(key)
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Close the outbound link. The shared receiver stays up.
    pub fn close(&self) {
        self.connection.close_sender();
        self.connection
            .receiver()
            .forget_remote_session(&self.remote_session_id, self);
    }
}

impl Poolable for RemoteSession {
    fn is_closed(&self) -> bool {
        RemoteSession::is_closed(self)
    }

    fn close(&self) {
        RemoteSession::close(self)
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("local_id", &self.local_id)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
