//! TCP transport layer for the wireline protocol.
//!
//! Provides the blocking stream and listener types everything else builds
//! on, plus a small UDP broadcast discovery helper. This is the lowest
//! layer of wireline: the framer, cipher, and session crates all operate
//! on the [`NetStream`] type provided here.

pub mod discovery;
pub mod error;
pub mod tcp;

pub use discovery::{discover, DiscoveryResponder};
pub use error::{Result, TransportError};
pub use tcp::{NetListener, NetStream};
