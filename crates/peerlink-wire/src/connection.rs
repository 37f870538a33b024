//! Connection: one outbound [`Sender`] paired with the shared [`Receiver`].
//!
//! Requests register their correlation entry in the receiver's
//! [`ListenerRegistry`](crate::ListenerRegistry) before the frame is handed to
//! the sender, so a reply can never overtake its listener.

use crate::boot::BootSync;
use crate::node::RemoteNode;
use crate::receiver::Receiver;
use crate::registry::{ReplyHandle, ReplyListener};
use crate::sender::Sender;
use crate::session::RemoteSession;
use base64::Engine;
use peerlink_types::{MessageType, SessionMessage, TransferMessage, WireError, WireResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Bytes of randomness mixed into every generated key.
const NONCE_LEN: usize = 8;

/// Generate a correlation key: `base64(SHA256(nonce || payload))`.
///
/// The nonce is drawn fresh from the OS for every call, so identical payloads
/// still produce distinct keys.
pub fn generate_key(payload: &[u8]) -> String {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(payload);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Transport binding for one peer.
pub struct Connection {
    receiver: Arc<Receiver>,
    remote: OnceLock<RemoteNode>,
    sender: OnceLock<Sender>,
}

impl Connection {
    pub fn new(receiver: Arc<Receiver>) -> Self {
        Self {
            receiver,
            remote: OnceLock::new(),
            sender: OnceLock::new(),
        }
    }

    /// Send the session handshake and open the outbound link.
    ///
    /// Returns at once; the link comes up in the background and the returned
    /// signal reports the outcome.
    pub fn connect(&self, remote: RemoteNode, handler_descriptor: &str) -> WireResult<BootSync> {
        let local = self.receiver.local_node();
        let session = SessionMessage::new(local.host(), local.port(), handler_descriptor);
        let sender = Sender::new(remote.clone(), session, self.receiver.config().clone());

        if self.remote.set(remote.clone()).is_err() {
            return Err(WireError::AlreadyConnected(remote.to_string()));
        }
        let sender = self.sender.get_or_init(|| sender);
        debug!(remote = %remote, handler = %handler_descriptor, "Connecting");
        sender.connect()
    }

    /// Let inbound requests from this peer reuse `session` for their replies.
    pub(crate) fn init_session(&self, session: Arc<RemoteSession>) {
        self.receiver
            .init_remote_session(session.remote_session_id().to_string(), session);
    }

    /// Send a request and get a handle that resolves with the reply.
    pub fn request(&self, session_id: &str, payload: impl Into<Vec<u8>>) -> WireResult<ReplyHandle> {
        let payload = payload.into();
        let key = generate_key(&payload);
        self.request_with_key(session_id, key, payload)
    }

    /// Like [`request`](Self::request) with a caller-chosen correlation key.
    ///
    /// An empty key counts as not supplied and one is generated.
    pub fn request_with_key(
        &self,
        session_id: &str,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> WireResult<ReplyHandle> {
        let sender = self.sender()?;
        let payload = payload.into();
        let mut key = key.into();
        if key.is_empty() {
            key = generate_key(&payload);
        }
        let message = TransferMessage::new(session_id, MessageType::Request, key, payload)?;
        let listeners = self.receiver.listeners();
        let handle = listeners.register_once(message.key.clone(), self.remote.get().cloned());
        if let Err(e) = sender.send(message) {
            listeners.remove(handle.key());
            return Err(e);
        }
        Ok(handle)
    }

    /// Send a request whose replies go to `listener`. Returns the generated
    /// key; the entry stays registered until [`remove_listener`](Self::remove_listener).
    pub fn request_with_listener(
        &self,
        session_id: &str,
        payload: impl Into<Vec<u8>>,
        listener: Arc<dyn ReplyListener>,
    ) -> WireResult<String> {
        let sender = self.sender()?;
        let payload = payload.into();
        let key = generate_key(&payload);
        let message = TransferMessage::new(session_id, MessageType::Request, key.clone(), payload)?;
        let listeners = self.receiver.listeners();
        listeners.register_listener(key.clone(), listener, self.remote.get().cloned());
        if let Err(e) = sender.send(message) {
            listeners.remove(&key);
            return Err(e);
        }
        Ok(key)
    }

    /// Answer the request identified by `key`. The key is never generated
    /// here, so an empty one is rejected.
    pub fn reply(&self, session_id: &str, key: &str, payload: impl Into<Vec<u8>>) -> WireResult<()> {
        let message = TransferMessage::new(session_id, MessageType::Response, key, payload.into())?;
        self.sender()?.send(message)
    }

    pub fn remove_listener(&self, key: &str) -> bool {
        self.receiver.listeners().remove(key)
    }

    pub fn remote_node(&self) -> Option<&RemoteNode> {
        self.remote.get()
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }

    /// True once the outbound link is gone, or if it was never opened.
    pub fn is_closed(&self) -> bool {
        self.sender.get().map_or(true, Sender::is_closed)
    }

    pub fn close_sender(&self) {
        if let Some(sender) = self.sender.get() {
            sender.close();
        }
    }

    /// Close the shared receiver. Every connection on this port loses its
    /// inbound side.
    pub fn close_receiver(&self) {
        self.receiver.close();
    }

    pub fn close_all(&self) {
        self.close_sender();
        self.close_receiver();
    }

    fn sender(&self) -> WireResult<&Sender> {
        self.sender.get().ok_or(WireError::NotConnected)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}
