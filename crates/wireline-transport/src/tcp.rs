use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A connected TCP stream — implements `Read` + `Write`.
///
/// This is the fundamental I/O type returned by transport operations.
/// `TCP_NODELAY` is enabled on creation: frames are small and
/// latency-sensitive, so Nagle batching is never wanted here.
pub struct NetStream {
    inner: TcpStream,
}

impl NetStream {
    fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { inner: stream })
    }

    /// Connect to a listening peer (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let resolved = resolve(&addr)?;
        let stream = TcpStream::connect(resolved).map_err(|e| TransportError::Connect {
            addr: resolved.to_string(),
            source: e,
        })?;
        debug!(addr = %resolved, "connected");
        Self::from_tcp(stream)
    }

    /// Connect with an explicit timeout on connection establishment.
    pub fn connect_timeout(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        timeout: Duration,
    ) -> Result<Self> {
        let resolved = resolve(&addr)?;
        let stream =
            TcpStream::connect_timeout(&resolved, timeout).map_err(|e| TransportError::Connect {
                addr: resolved.to_string(),
                source: e,
            })?;
        debug!(addr = %resolved, ?timeout, "connected");
        Self::from_tcp(stream)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self { inner: cloned })
    }

    /// Shut down both directions of the stream.
    ///
    /// This is the only cancellation mechanism: a clone blocked in `read`
    /// on another thread returns immediately once the socket is shut down.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown(Shutdown::Both).map_err(Into::into)
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Local address of this stream.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

fn resolve(addr: &impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::Io(std::io::Error::other("address resolved to nothing")))
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetStream")
            .field("peer", &self.inner.peer_addr().ok())
            .finish()
    }
}

/// TCP listener transport.
///
/// Binds a socket address and hands out one [`NetStream`] per accepted
/// connection (blocking accept loop, one stream per client).
pub struct NetListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl NetListener {
    /// Bind and listen on a socket address.
    ///
    /// Binding port 0 picks a free port; use [`NetListener::local_addr`]
    /// to learn the assigned one.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: format!("{addr:?}"),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<NetStream> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(peer = %addr, "accepted connection");
        NetStream::from_tcp(stream)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_accept_connect() {
        let listener = NetListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let handle = std::thread::spawn(move || {
            let mut client = NetStream::connect(addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn connect_refused_reports_address() {
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let l = NetListener::bind("127.0.0.1:0").unwrap();
            l.local_addr()
        };
        let err = NetStream::connect(addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.to_string().contains(&addr.port().to_string()));
    }

    #[test]
    fn shutdown_unblocks_reader() {
        let listener = NetListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let client = NetStream::connect(addr).unwrap();
        let server = listener.accept().unwrap();

        let mut reading = client.try_clone().unwrap();
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reading.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        client.shutdown().unwrap();

        let n = reader.join().unwrap().unwrap();
        assert_eq!(n, 0, "shutdown should surface as EOF to the reader");
        drop(server);
    }

    #[test]
    fn read_timeout_applies() {
        let listener = NetListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let mut client = NetStream::connect(addr).unwrap();
        let _server = listener.accept().unwrap();

        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }
}
