//! Inbound handling: what happens to frames that arrive on the local port.
//!
//! Every connection accepted by the [`Receiver`](crate::Receiver) is served by
//! the one shared [`InboundHandler`]. The first frame on a connection must be
//! the session handshake; it tells us where the peer listens and which of our
//! [`MessageHandler`]s it wants. After that:
//!
//! - requests are dispatched to that handler, and replies go back over our own
//!   session to the peer's listener
//! - responses are matched against the [`ListenerRegistry`]
//! - heartbeats only keep the idle timer from firing

use crate::codec::read_frame;
use crate::node::{LocalNode, RemoteNode};
use crate::registry::ListenerRegistry;
use crate::session::RemoteSession;
use async_trait::async_trait;
use dashmap::DashMap;
use peerlink_types::{Frame, MessageType, SessionMessage, TransferMessage, WireConfig, WireError};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether the framework or the handler sends the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// A payload returned from `receive` is sent back automatically.
    #[default]
    Auto,
    /// The handler replies itself through the session it was given.
    Manual,
}

/// Capability invoked with each decoded inbound request.
///
/// `key` is the request's correlation key; a reply must reuse it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn receive(
        &self,
        key: &str,
        payload: &[u8],
        session: Arc<RemoteSession>,
    ) -> Option<Vec<u8>>;

    fn reply_mode(&self) -> ReplyMode {
        ReplyMode::Auto
    }
}

/// Finds or opens the session used to answer a peer.
#[async_trait]
pub(crate) trait SessionResolver: Send + Sync + 'static {
    async fn resolve_session(&self, remote: &RemoteNode) -> Option<Arc<RemoteSession>>;
}

/// What a peer announced in its session handshake.
#[derive(Debug, Clone)]
struct PeerLink {
    node: RemoteNode,
    handler_descriptor: String,
}

/// Shared state behind the local listener.
///
/// Handshake details live with the connection that received them, so nothing
/// here outlives a closed inbound connection except our own sessions.
pub(crate) struct InboundHandler {
    local: LocalNode,
    config: WireConfig,
    listeners: ListenerRegistry,
    /// Remote session id -> our session to that peer.
    sessions: DashMap<String, Arc<RemoteSession>>,
    resolver: Weak<dyn SessionResolver>,
}

impl InboundHandler {
    pub(crate) fn new(
        local: LocalNode,
        config: WireConfig,
        resolver: Weak<dyn SessionResolver>,
    ) -> Self {
        Self {
            local,
            config,
            listeners: ListenerRegistry::new(),
            sessions: DashMap::new(),
            resolver,
        }
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn put_session(&self, remote_session_id: String, session: Arc<RemoteSession>) {
        self.sessions.insert(remote_session_id, session);
    }

    /// Remove `session` if it is still the one registered under the id.
    pub(crate) fn remove_session(&self, remote_session_id: &str, session: &RemoteSession) {
        self.sessions
            .remove_if(remote_session_id, |_, known| std::ptr::eq(known.as_ref(), session));
    }

    /// Forget all sessions and fail every pending reply.
    pub(crate) fn close(&self) {
        self.listeners.clear();
        self.sessions.clear();
    }

    /// Serve one accepted connection until it closes, idles out, or the
    /// receiver shuts down.
    pub(crate) async fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WireError> {
        // Keep the write half alive so the peer does not see a half-close.
        let (mut reader, _writer) = stream.into_split();
        let idle = self.config.idle_timeout();
        let max_frame_size = self.config.max_frame_size;
        let mut link: Option<PeerLink> = None;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let frame = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                read = tokio::time::timeout(idle, read_frame(&mut reader, max_frame_size)) => match read {
                    Err(_) => {
                        info!(peer = %addr, idle_secs = idle.as_secs(), "Inbound connection idle, closing");
                        return Ok(());
                    }
                    Ok(Err(WireError::ConnectionClosed)) => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                    Ok(Ok(frame)) => frame,
                },
            };

            match frame {
                Frame::Session(message) => {
                    link = Some(on_session(message, addr));
                }
                Frame::Heartbeat => {
                    debug!(peer = %addr, "Heartbeat received");
                }
                Frame::Transfer(message) => {
                    let Some(link) = link.as_ref() else {
                        warn!(
                            peer = %addr,
                            "Rejected transfer message before session handshake"
                        );
                        return Err(WireError::Protocol(
                            "session handshake required before transfer messages".to_string(),
                        ));
                    };
                    self.on_transfer(link, message);
                }
            }
        }
    }

    fn on_transfer(self: &Arc<Self>, link: &PeerLink, message: TransferMessage) {
        match message.message_type {
            MessageType::Request => {
                let this = Arc::clone(self);
                let link = link.clone();
                tokio::spawn(async move { this.dispatch(link, message).await });
            }
            MessageType::Response => {
                let TransferMessage {
                    session_id, key, payload, ..
                } = message;
                if !self.listeners.resolve(&key, payload) {
                    warn!(key = %key, session = %session_id, "No listener registered for reply");
                }
            }
        }
    }

    async fn dispatch(self: Arc<Self>, link: PeerLink, message: TransferMessage) {
        if message.session_id != link.node.session_id() {
            debug!(
                session = %message.session_id,
                remote = %link.node,
                "Request session id differs from handshake, answering the handshake peer"
            );
        }

        let Some(handler) = self.local.handler_for(&link.handler_descriptor) else {
            warn!(handler = %link.handler_descriptor, "No message handler available");
            return;
        };

        let Some(session) = self.session_for(&link.node).await else {
            warn!(
                remote = %link.node,
                key = %message.key,
                "No session back to requester, dropping request"
            );
            return;
        };

        let reply = handler
            .receive(&message.key, &message.payload, Arc::clone(&session))
            .await;

        if handler.reply_mode() == ReplyMode::Auto {
            if let Some(payload) = reply {
                if let Err(e) = session.reply(&message.key, payload) {
                    warn!(remote = %link.node, key = %message.key, error = %e, "Failed to send reply");
                }
            }
        }
    }

    async fn session_for(&self, node: &RemoteNode) -> Option<Arc<RemoteSession>> {
        let known = self
            .sessions
            .get(&node.session_id())
            .map(|session| Arc::clone(session.value()));
        if let Some(session) = known {
            if !session.is_closed() {
                return Some(session);
            }
        }
        let resolver = self.resolver.upgrade()?;
        resolver.resolve_session(node).await
    }
}

fn on_session(message: SessionMessage, addr: SocketAddr) -> PeerLink {
    let node = RemoteNode::new(message.host_name, message.port);
    info!(
        peer = %addr,
        remote = %node,
        handler = %message.handler_descriptor,
        "Session handshake received"
    );
    PeerLink {
        node,
        handler_descriptor: message.handler_descriptor,
    }
}
