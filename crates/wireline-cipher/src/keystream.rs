use sha2::{Digest, Sha256, Sha512};

use crate::error::{CipherError, Result};

/// Hash algorithm used to derive the keystream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// Rejected at construction; listed so configuration can name it and
    /// get a proper error instead of silently falling back.
    Md5,
    /// SHA-256: 32-byte key, 32-byte keystream blocks.
    Sha256,
    /// SHA-512: 64-byte key, 64-byte keystream blocks.
    Sha512,
}

impl CipherAlgorithm {
    /// Digest output size in bytes, which is also the required key length.
    pub fn output_len(self) -> usize {
        match self {
            CipherAlgorithm::Md5 => 16,
            CipherAlgorithm::Sha256 => 32,
            CipherAlgorithm::Sha512 => 64,
        }
    }

    /// Parse an algorithm name as it appears in configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(CipherAlgorithm::Md5),
            "sha256" | "sha-256" => Some(CipherAlgorithm::Sha256),
            "sha512" | "sha-512" => Some(CipherAlgorithm::Sha512),
            _ => None,
        }
    }
}

// Algorithms that passed construction-time validation. Md5 never gets here.
#[derive(Debug, Clone, Copy)]
enum DigestAlgo {
    Sha256,
    Sha512,
}

impl DigestAlgo {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgo::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgo::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Symmetric keystream generator.
///
/// Maintains a hash-output-sized `state` seeded from the key, a 64-bit
/// block counter, and a cursor into `state`. Refilling XORs the
/// little-endian counter into the state, replaces the state with its hash,
/// and increments the counter. [`KeystreamCipher::apply`] XORs one
/// keystream byte per input byte — the effective block size is 1, so
/// partial calls of any length are always valid and there is no padding.
pub struct KeystreamCipher {
    algo: DigestAlgo,
    key: Vec<u8>,
    state: Vec<u8>,
    counter: u64,
    cursor: usize,
}

impl KeystreamCipher {
    /// Create a cipher from an algorithm and a key.
    ///
    /// The key length must equal the hash output size. `Md5` is rejected.
    pub fn new(algorithm: CipherAlgorithm, key: &[u8]) -> Result<Self> {
        let algo = match algorithm {
            CipherAlgorithm::Md5 => return Err(CipherError::WeakAlgorithm(algorithm)),
            CipherAlgorithm::Sha256 => DigestAlgo::Sha256,
            CipherAlgorithm::Sha512 => DigestAlgo::Sha512,
        };
        if key.len() != algorithm.output_len() {
            return Err(CipherError::KeyLength {
                expected: algorithm.output_len(),
                actual: key.len(),
            });
        }

        let mut cipher = Self {
            algo,
            key: key.to_vec(),
            state: key.to_vec(),
            counter: 0,
            cursor: 0,
        };
        cipher.refill();
        Ok(cipher)
    }

    fn refill(&mut self) {
        let counter_bytes = self.counter.to_le_bytes();
        for (state_byte, counter_byte) in self.state.iter_mut().zip(counter_bytes) {
            *state_byte ^= counter_byte;
        }
        self.state = self.algo.digest(&self.state);
        self.counter += 1;
        self.cursor = 0;
    }

    fn next_byte(&mut self) -> u8 {
        if self.cursor == self.state.len() {
            self.refill();
        }
        let byte = self.state[self.cursor];
        self.cursor += 1;
        byte
    }

    /// XOR the buffer in place against the next keystream bytes.
    ///
    /// Applying twice from the same starting state restores the input.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte ^= self.next_byte();
        }
    }

    /// Restore the initial state: counter 0, cursor 0, state = key, then
    /// one refill. Re-applying the same input reproduces the same output.
    pub fn reset(&mut self) {
        self.state.clear();
        self.state.extend_from_slice(&self.key);
        self.counter = 0;
        self.cursor = 0;
        self.refill();
    }
}

impl std::fmt::Debug for KeystreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key and state are secret material; show positions only.
        f.debug_struct("KeystreamCipher")
            .field("algo", &self.algo)
            .field("counter", &self.counter)
            .field("cursor", &self.cursor)
            .finish()
    }
}
