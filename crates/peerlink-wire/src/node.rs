//! Node identity: who we are, and who we talk to.

use crate::handler::MessageHandler;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name advertised for the default handler when none is given.
pub const DEFAULT_HANDLER_NAME: &str = "default";

/// Session id of the node listening on `host:port`.
///
/// A node's own local id is its session id; the far side derives the same
/// value from the host and port announced in the session handshake.
pub fn session_id_for(host: &str, port: u16) -> String {
    hex::encode(format!("{host}:{port}"))
}

/// A peer's network identity. Equality and hashing use host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteNode {
    host: String,
    port: u16,
}

impl RemoteNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Bind the listener to `bind_host` instead of all interfaces.
    pub fn with_bind_host(mut self, bind_host: impl Into<String>) -> Self {
        self.bind_host = Some(bind_host.into());
        self
    }

    /// Host advertised to peers.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host the listener binds.
    pub fn bind_host(&self) -> &str {
        self.bind_host.as_deref().unwrap_or(DEFAULT_BIND_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Session id the peer uses on the wire.
    pub fn session_id(&self) -> String {
        session_id_for(&self.host, self.port)
    }
}

impl fmt::Display for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Address the listener binds when none is set: every IPv4 interface.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// This process's network identity and its message handlers.
///
/// `host` is advertised to peers and may be a NAT, DNS or container address;
/// the listener binds `bind_host` on the same port. `handler_name` is the
/// descriptor sent to peers in the session handshake: it names the handler
/// the far side should run for our requests.
#[derive(Clone)]
pub struct LocalNode {
    host: String,
    port: u16,
    bind_host: Option<String>,
    handler_name: String,
    default_handler: Option<Arc<dyn MessageHandler>>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl LocalNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            bind_host: None,
            handler_name: DEFAULT_HANDLER_NAME.to_string(),
            default_handler: None,
            handlers: HashMap::new(),
        }
    }

    /// Set the default handler and the descriptor advertised to peers.
    pub fn with_default_handler(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handler_name = name.into();
        self.default_handler = Some(handler);
        self
    }

    /// Register an additional handler peers can select by name.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Bind the listener to `bind_host` instead of all interfaces.
    pub fn with_bind_host(mut self, bind_host: impl Into<String>) -> Self {
        self.bind_host = Some(bind_host.into());
        self
    }

    /// Host advertised to peers.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host the listener binds.
    pub fn bind_host(&self) -> &str {
        self.bind_host.as_deref().unwrap_or(DEFAULT_BIND_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn default_handler(&self) -> Option<&Arc<dyn MessageHandler>> {
        self.default_handler.as_ref()
    }

    /// Handler registered under `descriptor`, else the default handler.
    pub fn handler_for(&self, descriptor: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .get(descriptor)
            .or(self.default_handler.as_ref())
            .cloned()
    }

    /// Id this node stamps on every outgoing transfer message.
    pub fn local_id(&self) -> String {
        session_id_for(&self.host, self.port)
    }

    /// The address peers use to reach this node.
    pub fn as_remote(&self) -> RemoteNode {
        RemoteNode::new(self.host.clone(), self.port)
    }

    pub(crate) fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host(), self.port)
    }
}

impl fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut named: Vec<&String> = self.handlers.keys().collect();
        named.sort();
        f.debug_struct("LocalNode")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bind_host", &self.bind_host())
            .field("handler_name", &self.handler_name)
            .field("has_default_handler", &self.default_handler.is_some())
            .field("handlers", &named)
            .finish()
    }
}

impl fmt::Display for LocalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
