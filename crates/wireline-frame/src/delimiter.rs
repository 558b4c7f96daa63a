//! Per-message boundary token generation.
//!
//! Tokens must never contain `\r` or `\n` (they are written as a line and
//! matched at line boundaries) and must not practically collide with each
//! other within a session. Collision with payload *content* is mitigated
//! by length and randomness only; the protocol does not verify absence.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{thread_rng, Rng, RngCore};

/// Fixed prefix of the default delimiter, useful when eyeballing captures.
pub const DELIMITER_PREFIX: &str = "--wl-";

/// Smallest accepted secure delimiter length.
pub const MIN_SECURE_DELIMITER: usize = 8;

/// Largest accepted secure delimiter length.
pub const MAX_SECURE_DELIMITER: usize = 64;

const RANDOM_SUFFIX_LEN: usize = 22;

/// Low-cost default delimiter: fixed prefix plus a random alphanumeric
/// suffix (~131 bits of entropy). Fast and readable, not attacker-resistant.
pub fn random_delimiter() -> Vec<u8> {
    let mut token = Vec::with_capacity(DELIMITER_PREFIX.len() + RANDOM_SUFFIX_LEN);
    token.extend_from_slice(DELIMITER_PREFIX.as_bytes());
    token.extend(
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN),
    );
    token
}

/// Cryptographically random delimiter of `len` bytes (clamped to
/// [`MIN_SECURE_DELIMITER`]..=[`MAX_SECURE_DELIMITER`]).
///
/// `\r` and `\n` bytes are re-drawn so the token can never be confused
/// with the line terminators used by the envelope.
pub fn secure_delimiter(len: usize) -> Vec<u8> {
    let len = len.clamp(MIN_SECURE_DELIMITER, MAX_SECURE_DELIMITER);
    let mut token = vec![0u8; len];
    OsRng.fill_bytes(&mut token);
    for byte in &mut token {
        while *byte == b'\r' || *byte == b'\n' {
            *byte = OsRng.gen();
        }
    }
    token
}
