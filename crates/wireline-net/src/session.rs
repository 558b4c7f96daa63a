//! Plumbing shared by client and server sessions: cipher-aware stream
//! halves, session configuration types, and the per-frame read helper.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use wireline_cipher::{CipherAlgorithm, CipherReader, CipherWriter};
use wireline_message::{read_message, Message, MessageRegistry, SessionMode};
use wireline_transport::NetStream;

use crate::error::{NetError, Result};

/// Optional transport encryption for a session. Both ends must agree.
#[derive(Clone)]
pub struct CipherConfig {
    pub algorithm: CipherAlgorithm,
    /// Shared key; length must equal the digest output size.
    pub key: Vec<u8>,
}

impl std::fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherConfig")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Ping schedule for the keepalive supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Probe timer period.
    pub interval: Duration,
    /// Silence window after which the peer is declared dead.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

impl KeepaliveConfig {
    /// A schedule that can never declare a peer dead between probes is a
    /// configuration mistake; reject it before any socket is touched.
    pub(crate) fn ensure_valid(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(NetError::Configuration(
                "keepalive interval must be greater than zero".into(),
            ));
        }
        if self.timeout <= self.interval {
            return Err(NetError::Configuration(
                "keepalive timeout must exceed the ping interval".into(),
            ));
        }
        Ok(())
    }
}

/// Read-side of a session's socket, optionally decrypting.
pub(crate) enum ReadHalf {
    Plain(NetStream),
    Encrypted(CipherReader<NetStream>),
}

impl Read for ReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadHalf::Plain(stream) => stream.read(buf),
            ReadHalf::Encrypted(reader) => reader.read(buf),
        }
    }
}

/// Write-side of a session's socket, optionally encrypting.
pub(crate) enum WriteHalf {
    Plain(NetStream),
    Encrypted(CipherWriter<NetStream>),
}

impl Write for WriteHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            WriteHalf::Plain(stream) => stream.write(buf),
            WriteHalf::Encrypted(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            WriteHalf::Plain(stream) => stream.flush(),
            WriteHalf::Encrypted(writer) => writer.flush(),
        }
    }
}

/// Split one connected stream into independent read/write halves plus a
/// raw clone retained solely for `shutdown()` (the only way to unblock a
/// read in progress on another clone).
pub(crate) fn split_stream(
    stream: NetStream,
    cipher: Option<&CipherConfig>,
) -> Result<(ReadHalf, WriteHalf, NetStream)> {
    let raw = stream.try_clone()?;
    let read_stream = stream.try_clone()?;
    match cipher {
        None => Ok((ReadHalf::Plain(read_stream), WriteHalf::Plain(stream), raw)),
        Some(config) => {
            // Each direction advances its own keystream, in lock-step with
            // the bytes that actually cross it.
            let reader = CipherReader::new(read_stream, config.algorithm, &config.key)?;
            let writer = CipherWriter::new(stream, config.algorithm, &config.key)?;
            Ok((ReadHalf::Encrypted(reader), WriteHalf::Encrypted(writer), raw))
        }
    }
}

/// Holds a session's busy flag high for the duration of one send or
/// receive, so the keepalive supervisor treats the I/O as liveness.
pub(crate) struct BusyGuard<'a> {
    flag: &'a std::sync::atomic::AtomicBool,
}

impl<'a> BusyGuard<'a> {
    pub(crate) fn hold(flag: &'a std::sync::atomic::AtomicBool) -> Self {
        flag.store(true, std::sync::atomic::Ordering::Release);
        Self { flag }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, std::sync::atomic::Ordering::Release);
    }
}

/// Context handed to handlers alongside each dispatched message.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Server-assigned connection id; `0` on the client side.
    pub client_id: u64,
    /// Remote address of the session's socket.
    pub peer_addr: SocketAddr,
    /// Session mode at the moment of dispatch.
    pub mode: SessionMode,
}

/// Read one message, threading the previous frame's overrun through.
///
/// `Ok(None)` means the peer closed cleanly between frames.
pub(crate) fn read_one(
    read_half: &mut ReadHalf,
    overrun: Vec<u8>,
    registry: &MessageRegistry,
) -> Result<Option<(Message, Vec<u8>)>> {
    read_message(read_half, overrun, registry).map_err(NetError::from)
}
