//! Shared fixtures for the loopback integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use peerlink_wire::{
    LocalNode, MessageHandler, RemoteNode, RemoteSession, RemoteSessionManager, ReplyListener,
    ReplyMode, WireConfig,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HOST: &str = "127.0.0.1";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let spare = std::net::TcpListener::bind((HOST, 0)).unwrap();
    spare.local_addr().unwrap().port()
}

pub fn remote(port: u16) -> RemoteNode {
    RemoteNode::new(HOST, port)
}

pub async fn start_node(port: u16, name: &str, handler: Arc<dyn MessageHandler>) -> Arc<RemoteSessionManager> {
    let local = LocalNode::new(HOST, port).with_default_handler(name, handler);
    RemoteSessionManager::start(local, WireConfig::default())
        .await
        .unwrap()
}

/// Run `fut` under [`WAIT`], panicking on expiry.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

/// Poll `condition` until it holds or [`WAIT`] passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Wait until nothing accepts connections on `port` any more.
pub async fn wait_until_refused(port: u16) {
    within(async {
        while tokio::net::TcpStream::connect((HOST, port)).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Answers `ping` with `pong` and anything else with `re:<payload>`.
pub struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    async fn receive(&self, _key: &str, payload: &[u8], _session: Arc<RemoteSession>) -> Option<Vec<u8>> {
        if payload == b"ping" {
            return Some(b"pong".to_vec());
        }
        let mut reply = b"re:".to_vec();
        reply.extend_from_slice(payload);
        Some(reply)
    }
}

/// Upper-cases the payload.
pub struct Upper;

#[async_trait]
impl MessageHandler for Upper {
    async fn receive(&self, _key: &str, payload: &[u8], _session: Arc<RemoteSession>) -> Option<Vec<u8>> {
        Some(payload.to_ascii_uppercase())
    }
}

/// Replies through the session itself; anything it returns is ignored.
pub struct ManualEcho;

#[async_trait]
impl MessageHandler for ManualEcho {
    async fn receive(&self, key: &str, payload: &[u8], session: Arc<RemoteSession>) -> Option<Vec<u8>> {
        let mut reply = b"manual:".to_vec();
        reply.extend_from_slice(payload);
        session.reply(key, reply).unwrap();
        Some(b"ignored".to_vec())
    }

    fn reply_mode(&self) -> ReplyMode {
        ReplyMode::Manual
    }
}

/// Never answers; records what it saw.
#[derive(Default)]
pub struct Silent {
    pub seen: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl MessageHandler for Silent {
    async fn receive(&self, _key: &str, payload: &[u8], _session: Arc<RemoteSession>) -> Option<Vec<u8>> {
        self.seen.lock().unwrap().push(payload.to_vec());
        None
    }
}

// ---------------------------------------------------------------------------
// Reply listeners
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Recorder {
    pub replies: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Recorder {
    pub fn count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    pub fn replies(&self) -> Vec<(String, Vec<u8>)> {
        self.replies.lock().unwrap().clone()
    }
}

impl ReplyListener for Recorder {
    fn on_reply(&self, key: &str, payload: &[u8]) {
        self.replies
            .lock()
            .unwrap()
            .push((key.to_string(), payload.to_vec()));
    }
}
