//! Two nodes on one host: `alpha` asks, `beta` answers.
//!
//! ```text
//! cargo run -p peerlink-wire --example ping_pong [wire.toml]
//! RUST_LOG=peerlink_wire=debug cargo run -p peerlink-wire --example ping_pong
//! ```

use async_trait::async_trait;
use peerlink_wire::{LocalNode, MessageHandler, RemoteSession, RemoteSessionManager, WireConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HOST: &str = "127.0.0.1";
const ALPHA_PORT: u16 = 9100;
const BETA_PORT: u16 = 9101;

struct Pong;

#[async_trait]
impl MessageHandler for Pong {
    async fn receive(&self, key: &str, payload: &[u8], session: Arc<RemoteSession>) -> Option<Vec<u8>> {
        tracing::info!(
            key = %key,
            from = %session.remote_node(),
            payload = %String::from_utf8_lossy(payload),
            "Request received"
        );
        Some(b"pong".to_vec())
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => WireConfig::load(&PathBuf::from(path)),
        None => WireConfig::default(),
    };

    let beta = RemoteSessionManager::start(
        LocalNode::new(HOST, BETA_PORT).with_default_handler("pong", Arc::new(Pong)),
        config.clone(),
    )
    .await?;
    let alpha = RemoteSessionManager::start(
        LocalNode::new(HOST, ALPHA_PORT).with_default_handler("pong", Arc::new(Pong)),
        config,
    )
    .await?;

    let session = alpha
        .new_session(&beta.local_node().as_remote())
        .await
        .ok_or_else(|| anyhow::anyhow!("beta is unreachable"))?;

    for round in 1..=3 {
        let handle = session.request(format!("ping #{round}"))?;
        let reply = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await??;
        println!("round {round}: {}", String::from_utf8_lossy(&reply));
    }

    alpha.shutdown();
    beta.shutdown();
    Ok(())
}
