//! Typed messages over delimited frames.
//!
//! Every frame carries a two-line envelope — `tag[id]` then `command` —
//! followed by a variant-specific payload. The built-in variants form a
//! closed set; one `Custom` variant carries application-defined tags
//! resolved through an explicitly-owned [`MessageRegistry`], so independent
//! sessions never share registration state.

pub mod codec;
pub mod error;
pub mod header;
pub mod json;
pub mod message;
pub mod multipart;
pub mod registry;

pub use codec::{encode_message, read_message, write_message};
pub use error::{MessageError, Result};
pub use header::Header;
pub use message::{generate_id, Message, ModeChange, Payload, SessionMode};
pub use multipart::Part;
pub use registry::{CustomDecoder, MessageRegistry, RESERVED_TAGS};
