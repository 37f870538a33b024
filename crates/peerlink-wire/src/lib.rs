//! peerlink: peer-to-peer request/response messaging over pooled TCP sessions.
//!
//! ## Architecture
//!
//! - **RemoteSessionManager**: owns the local listener and keeps at most one
//!   live [`RemoteSession`] per [`RemoteNode`]
//! - **ConnectionManager**: creates outbound [`Connection`]s that share the
//!   local [`Receiver`]
//! - **Connection**: sends requests and replies; registers reply listeners
//!   before a request leaves
//! - **ListenerRegistry**: correlation key -> pending reply, resolved by the
//!   inbound side
//! - **BootSync**: one-shot signal for asynchronous binds and connects
//!
//! Replies travel back over the responder's own outbound session to the
//! requester's listener, where the requester's registry matches them.

pub mod boot;
pub mod codec;
pub mod connection;
pub mod connection_manager;
pub mod executor;
pub mod handler;
pub mod node;
pub mod pool;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod session;
pub mod session_manager;

pub use boot::{BootState, BootSync};
pub use connection::{generate_key, Connection};
pub use connection_manager::ConnectionManager;
pub use executor::SerialExecutor;
pub use handler::{MessageHandler, ReplyMode};
pub use node::{session_id_for, LocalNode, RemoteNode};
pub use peerlink_types::{
    Frame, MessageType, SessionMessage, TransferMessage, WireConfig, WireError, WireResult,
};
pub use pool::{Poolable, SessionPool};
pub use receiver::Receiver;
pub use registry::{ListenerRegistry, ReplyHandle, ReplyListener};
pub use session::RemoteSession;
pub use session_manager::RemoteSessionManager;
