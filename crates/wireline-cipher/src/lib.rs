//! Keystream XOR transform for wireline byte streams.
//!
//! The cipher derives a pseudorandom keystream from a secret key and a hash
//! function, and XORs it against the stream. Encryption and decryption are
//! the same operation: both sides start from the same key and advance their
//! keystream in lock-step with the bytes actually transferred. Each
//! direction of a connection carries its own independently-advancing state,
//! so reads and writes never desynchronize each other.

pub mod error;
pub mod keystream;
pub mod stream;

pub use error::{CipherError, Result};
pub use keystream::{CipherAlgorithm, KeystreamCipher};
pub use stream::{CipherReader, CipherWriter};
