//! Transport tunables, loadable from TOML with defaults.

use crate::error::{WireError, WireResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum single frame size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Capacity of the listener's bind queue.
pub const DEFAULT_BIND_QUEUE_CAPACITY: usize = 1024;

/// Tunables for listeners, outbound links and idle detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Accept backlog of the local listener.
    pub listen_backlog: u32,
    /// Queue capacity of the serial executor that performs binds.
    pub bind_queue_capacity: usize,
    /// An inbound connection silent for this long is closed.
    pub idle_timeout_secs: u64,
    /// How often an outbound link sends a heartbeat frame.
    pub heartbeat_interval_secs: u64,
    /// Upper bound for establishing an outbound link.
    pub connect_timeout_secs: u64,
    /// Largest accepted frame body, in bytes.
    pub max_frame_size: u32,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            listen_backlog: 1024,
            bind_queue_capacity: DEFAULT_BIND_QUEUE_CAPACITY,
            idle_timeout_secs: 8,
            heartbeat_interval_secs: 3,
            connect_timeout_secs: 10,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl WireConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(contents: &str) -> WireResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| WireError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the transport unusable.
    pub fn validate(&self) -> WireResult<()> {
        if self.bind_queue_capacity == 0 {
            return Err(WireError::Config(
                "bind_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(WireError::Config(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(WireError::Config(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(WireError::Config(
                "max_frame_size must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout_secs <= self.heartbeat_interval_secs {
            return Err(WireError::Config(format!(
                "idle_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.idle_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        Ok(())
    }

    /// Load from a TOML file, falling back to defaults when the file is
    /// missing or invalid.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "Wire config not found, using defaults");
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded wire configuration");
                    config
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Failed to parse wire config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read wire config, using defaults"
                );
                Self::default()
            }
        }
    }
}
