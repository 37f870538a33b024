//! Shared types for the peerlink messaging layer.
//!
//! This crate defines the wire envelopes, the frame codec, the error taxonomy
//! and the transport tunables used by `peerlink-wire`. It contains no
//! networking logic.

pub mod config;
pub mod error;
pub mod message;

pub use config::WireConfig;
pub use error::{WireError, WireResult};
pub use message::{Frame, MessageType, SessionMessage, TransferMessage};
