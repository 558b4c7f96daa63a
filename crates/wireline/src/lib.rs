//! Delimiter-framed message protocol over TCP.
//!
//! wireline exchanges discrete, typed messages over a persistent byte
//! stream: each frame is bounded by a per-message random delimiter, led
//! by a two-line envelope, and carries one of a closed set of payload
//! variants plus an application-extensible custom tag. Sessions follow a
//! Transaction (request/reply) or Listening (push/handler) discipline,
//! with optional keystream encryption and ping-based liveness.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP streams/listener and UDP discovery
//! - [`cipher`] — hash-keystream XOR stream cipher
//! - [`frame`] — delimiter generation and the delimited stream framer
//! - [`message`] — envelope, typed message set, registry, multipart
//! - [`net`] — client/server sessions, handlers, keepalive, broadcast

/// Re-export transport types.
pub mod transport {
    pub use wireline_transport::*;
}

/// Re-export cipher types.
pub mod cipher {
    pub use wireline_cipher::*;
}

/// Re-export framing types.
pub mod frame {
    pub use wireline_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use wireline_message::*;
}

/// Re-export session types.
pub mod net {
    pub use wireline_net::*;
}
