//! Sender: the outbound link to one peer.
//!
//! `connect` returns immediately; a background task dials the peer, writes
//! the session handshake, and reports through a [`BootSync`]. Frames handed
//! to `send` before the link is up are queued and flushed right after the
//! handshake. While the link is up the task also writes a heartbeat frame on
//! every heartbeat interval.

use crate::boot::BootSync;
use crate::codec::write_frame;
use crate::node::RemoteNode;
use peerlink_types::{Frame, SessionMessage, TransferMessage, WireConfig, WireError, WireResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outbound half of a connection.
pub struct Sender {
    remote: RemoteNode,
    session: SessionMessage,
    config: WireConfig,
    outbound: mpsc::UnboundedSender<Frame>,
    queued: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    shutdown: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
}

impl Sender {
    pub fn new(remote: RemoteNode, session: SessionMessage, config: WireConfig) -> Self {
        let (outbound, queued) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            remote,
            session,
            config,
            outbound,
            queued: Mutex::new(Some(queued)),
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn remote(&self) -> &RemoteNode {
        &self.remote
    }

    /// Start dialing the peer. Must be called from within a tokio runtime.
    pub fn connect(&self) -> WireResult<BootSync> {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| WireError::AlreadyConnected(self.remote.to_string()))?;

        let boot = BootSync::new();
        tokio::spawn(run(
            self.remote.clone(),
            self.session.clone(),
            self.config.clone(),
            queued,
            self.shutdown.subscribe(),
            boot.clone(),
            Arc::clone(&self.closed),
        ));
        Ok(boot)
    }

    /// Queue a message for the peer. Never waits on the socket.
    pub fn send(&self, message: TransferMessage) -> WireResult<()> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        self.outbound
            .send(Frame::Transfer(message))
            .map_err(|_| WireError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear down the link. Queued frames are discarded. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        debug!(remote = %self.remote, "Sender closed");
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run(
    remote: RemoteNode,
    session: SessionMessage,
    config: WireConfig,
    queued: mpsc::UnboundedReceiver<Frame>,
    shutdown: watch::Receiver<bool>,
    boot: BootSync,
    closed: Arc<AtomicBool>,
) {
    let addr = remote.to_string();
    let dial = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr.as_str()));
    let stream = match dial.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            warn!(remote = %remote, error = %source, "Connect failed");
            closed.store(true, Ordering::Release);
            boot.fail(WireError::Connect { addr, source });
            return;
        }
        Err(_) => {
            warn!(remote = %remote, "Connect timed out");
            closed.store(true, Ordering::Release);
            boot.fail(WireError::ConnectTimeout { addr });
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(remote = %remote, error = %e, "Could not disable Nagle");
    }

    let (reader, mut writer) = stream.into_split();
    if let Err(e) = write_frame(&mut writer, &Frame::Session(session)).await {
        warn!(remote = %remote, error = %e, "Session handshake failed");
        closed.store(true, Ordering::Release);
        boot.fail(e);
        return;
    }

    info!(remote = %remote, "Outbound link established");
    boot.succeed();

    let result = pump(reader, writer, queued, shutdown, config.heartbeat_interval()).await;
    closed.store(true, Ordering::Release);
    match result {
        Ok(()) => debug!(remote = %remote, "Outbound link closed"),
        Err(e) => info!(remote = %remote, error = %e, "Outbound link lost"),
    }
}

/// Drain queued frames, send heartbeats, and watch for the peer hanging up.
async fn pump(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
    heartbeat_interval: Duration,
) -> WireResult<()> {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the handshake already counts.
    heartbeat.tick().await;
    let mut scratch = [0u8; 64];

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            frame = queued.recv() => match frame {
                Some(frame) => write_frame(&mut writer, &frame).await?,
                None => return Ok(()),
            },
            _ = heartbeat.tick() => write_frame(&mut writer, &Frame::Heartbeat).await?,
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return Err(WireError::ConnectionClosed),
                // The peer never writes on this link.
                Ok(_) => {}
                Err(e) => return Err(WireError::Io(e)),
            },
        }
    }
}
