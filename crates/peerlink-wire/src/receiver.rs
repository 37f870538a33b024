//! Receiver: the local listener shared by every connection on a port.
//!
//! Lifecycle: constructed -> listen requested -> bound (accept loop runs) or
//! bind failed -> closed. The bind runs as a job on a [`SerialExecutor`] so
//! `start_listen` returns at once with a [`BootSync`] the caller can wait on.
//! Any failure while serving, including the accept loop ending, closes the
//! receiver.

use crate::boot::BootSync;
use crate::executor::SerialExecutor;
use crate::handler::{InboundHandler, SessionResolver};
use crate::node::LocalNode;
use crate::registry::ListenerRegistry;
use crate::session::RemoteSession;
use peerlink_types::{WireConfig, WireError, WireResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Name of the executor that performs binds.
const EXECUTOR_NAME: &str = "receiver-pool";

/// Local listener plus the inbound handler holding the listener registry.
pub struct Receiver {
    local: LocalNode,
    config: WireConfig,
    handler: Arc<InboundHandler>,
    executor: SerialExecutor,
    shutdown: watch::Sender<bool>,
    listening: AtomicBool,
    closed: AtomicBool,
}

impl Receiver {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        local: LocalNode,
        config: WireConfig,
        resolver: Weak<dyn SessionResolver>,
    ) -> Self {
        let handler = Arc::new(InboundHandler::new(local.clone(), config.clone(), resolver));
        let executor = SerialExecutor::new(EXECUTOR_NAME, config.bind_queue_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            local,
            config,
            handler,
            executor,
            shutdown,
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_node(&self) -> &LocalNode {
        &self.local
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    /// Correlation table shared by all connections on this port.
    pub fn listeners(&self) -> &ListenerRegistry {
        self.handler.listeners()
    }

    /// Submit the bind. The returned signal resolves once the listener is
    /// bound or the bind failed.
    pub fn start_listen(self: &Arc<Self>) -> WireResult<BootSync> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(WireError::Protocol(format!(
                "receiver for {} is already listening",
                self.local.listen_addr()
            )));
        }
        let boot = BootSync::new();
        let job = listen(
            self.local.listen_addr(),
            self.config.listen_backlog,
            Arc::clone(&self.handler),
            self.shutdown.subscribe(),
            boot.clone(),
            Arc::downgrade(self),
        );
        if let Err(e) = self.executor.execute(job) {
            self.listening.store(false, Ordering::Release);
            return Err(e);
        }
        debug!(addr = %self.local.listen_addr(), "Listen submitted");
        Ok(boot)
    }

    pub(crate) fn init_remote_session(&self, remote_session_id: String, session: Arc<RemoteSession>) {
        self.handler.put_session(remote_session_id, session);
    }

    pub(crate) fn forget_remote_session(&self, remote_session_id: &str, session: &RemoteSession) {
        self.handler.remove_session(remote_session_id, session);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting, end every inbound connection, and drop all pending
    /// replies. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        self.handler.close();
        info!(addr = %self.local.listen_addr(), "Receiver closed");
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("local", &self.local)
            .field("closed", &self.is_closed())
            .field("listeners", self.listeners())
            .finish()
    }
}

async fn bind(addr: &str, backlog: u32) -> std::io::Result<TcpListener> {
    let socket_addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address resolved for {addr}"),
        )
    })?;
    let socket = if socket_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    // Lets a restarted node rebind while old connections sit in TIME_WAIT.
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(socket_addr)?;
    socket.listen(backlog)
}

/// Bind, report, then run the accept loop until shutdown or failure.
async fn listen(
    addr: String,
    backlog: u32,
    handler: Arc<InboundHandler>,
    mut shutdown: watch::Receiver<bool>,
    boot: BootSync,
    owner: Weak<Receiver>,
) {
    let listener = match bind(&addr, backlog).await {
        Ok(listener) => listener,
        Err(source) => {
            error!(addr = %addr, error = %source, "Receiver failed to bind");
            boot.fail(WireError::Bind { addr, source });
            close_owner(&owner, &handler);
            return;
        }
    };

    info!(addr = %addr, "Receiver listening");
    boot.succeed();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    let handler = Arc::clone(&handler);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.serve(stream, peer, shutdown).await {
                            debug!(peer = %peer, error = %e, "Inbound connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(addr = %addr, error = %e, "Accept loop failed");
                    break;
                }
            },
        }
    }

    close_owner(&owner, &handler);
}

fn close_owner(owner: &Weak<Receiver>, handler: &InboundHandler) {
    match owner.upgrade() {
        Some(receiver) => receiver.close(),
        None => handler.close(),
    }
}
