//! Client and server sessions over delimiter-framed messages.
//!
//! A session owns one socket and follows one of two disciplines:
//! Transaction (synchronous request/reply, at most one in flight) or
//! Listening (a background receive loop dispatching pushes to handlers).
//! Mode switches are negotiated on the wire so both ends agree, and
//! listening sessions are supervised by a ping-based keepalive.

pub mod client;
pub mod error;
pub mod handlers;
pub mod keepalive;
pub mod server;
mod session;

pub use client::{Client, ClientConfig};
pub use error::{NetError, Result};
pub use handlers::{Handler, HandlerTable};
pub use keepalive::{Keepalive, SessionProbe};
pub use server::{RemoteClient, Server, ServerConfig};
pub use session::{CipherConfig, KeepaliveConfig, SessionInfo};

pub use wireline_cipher::CipherAlgorithm;
pub use wireline_message::SessionMode;
