//! Delimiter-based stream framing.
//!
//! Carves an unbounded byte stream into discrete frames without knowing
//! message length in advance. Every frame is bounded by a per-message
//! random delimiter token appearing alone on its own line; the framer
//! delivers exactly the bytes before the terminator and hands bytes read
//! past it to the next frame (overrun), so back-to-back frames are never
//! torn or duplicated regardless of transport chunking.

pub mod delimiter;
pub mod error;
pub mod framer;

pub use delimiter::{random_delimiter, secure_delimiter, MAX_SECURE_DELIMITER, MIN_SECURE_DELIMITER};
pub use error::{FrameError, Result};
pub use framer::{DelimitedReader, MAX_LINE_LEN};
