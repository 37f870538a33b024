//! ConnectionManager: creates [`Connection`]s on top of one shared receiver.

use crate::boot::BootSync;
use crate::connection::Connection;
use crate::handler::SessionResolver;
use crate::node::{LocalNode, RemoteNode};
use crate::receiver::Receiver;
use peerlink_types::{WireConfig, WireResult};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

pub struct ConnectionManager {
    local: LocalNode,
    receiver: Arc<Receiver>,
}

impl ConnectionManager {
    pub(crate) fn new(
        local: LocalNode,
        config: WireConfig,
        resolver: Weak<dyn SessionResolver>,
    ) -> Self {
        let receiver = Arc::new(Receiver::new(local.clone(), config, resolver));
        Self { local, receiver }
    }

    /// Start the local listener.
    pub fn start(&self) -> WireResult<BootSync> {
        self.receiver.start_listen()
    }

    /// Open a connection to `remote` and wait until it is established.
    ///
    /// Returns `None` if the peer cannot be reached.
    pub async fn connect(
        &self,
        remote: &RemoteNode,
        handler_descriptor: &str,
    ) -> Option<Arc<Connection>> {
        let connection = Arc::new(Connection::new(Arc::clone(&self.receiver)));
        let boot = match connection.connect(remote.clone(), handler_descriptor) {
            Ok(boot) => boot,
            Err(e) => {
                warn!(remote = %remote, error = %e, "Could not start connection");
                return None;
            }
        };
        match boot.wait().await {
            Ok(()) => {
                info!(local = %self.local, remote = %remote, "Connection established");
                Some(connection)
            }
            Err(cause) => {
                warn!(remote = %remote, error = %cause, "Peer unreachable");
                connection.close_sender();
                None
            }
        }
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }

    pub fn close(&self) {
        self.receiver.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("local", &self.local)
            .field("receiver", &self.receiver)
            .finish()
    }
}
