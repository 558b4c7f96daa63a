use std::io::{Read, Write};

use crate::error::Result;
use crate::keystream::{CipherAlgorithm, KeystreamCipher};

/// Decrypting wrapper around one read direction.
///
/// Owns its own [`KeystreamCipher`]; the position advances exactly with
/// the bytes delivered to the caller.
pub struct CipherReader<R> {
    inner: R,
    cipher: KeystreamCipher,
}

impl<R: Read> CipherReader<R> {
    /// Wrap a readable stream with a fresh cipher state.
    pub fn new(inner: R, algorithm: CipherAlgorithm, key: &[u8]) -> Result<Self> {
        Ok(Self {
            inner,
            cipher: KeystreamCipher::new(algorithm, key)?,
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the wrapper and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..n]);
        Ok(n)
    }
}

/// Encrypting wrapper around one write direction.
///
/// Encrypts into a scratch buffer and writes it fully before returning,
/// so the keystream position always tracks bytes actually put on the wire.
pub struct CipherWriter<W> {
    inner: W,
    cipher: KeystreamCipher,
    scratch: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    /// Wrap a writable stream with a fresh cipher state.
    pub fn new(inner: W, algorithm: CipherAlgorithm, key: &[u8]) -> Result<Self> {
        Ok(Self {
            inner,
            cipher: KeystreamCipher::new(algorithm, key)?,
            scratch: Vec::new(),
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume the wrapper and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.apply(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
