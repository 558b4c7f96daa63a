use crate::keystream::CipherAlgorithm;

/// Errors that can occur constructing or driving the cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The selected hash algorithm is too weak for keystream derivation.
    #[error("{0:?} is too weak for keystream derivation")]
    WeakAlgorithm(CipherAlgorithm),

    /// The key length does not match the hash output size.
    #[error("key must be {expected} bytes for this algorithm, got {actual}")]
    KeyLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, CipherError>;
