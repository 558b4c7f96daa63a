//! UDP broadcast discovery.
//!
//! A tiny request/response exchange over a separate, unreliable datagram
//! channel. The responder answers `wireline-discover <name>` datagrams with
//! `wireline-service <name> <port>`; clients use the answer to open a
//! regular [`NetStream`](crate::NetStream) session. Loss is handled by the
//! caller's explicit timeout, never by retry logic here.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};

const DISCOVER_PREFIX: &str = "wireline-discover ";
const SERVICE_PREFIX: &str = "wireline-service ";
const MAX_DATAGRAM: usize = 512;

/// Answers discovery datagrams for one named service.
pub struct DiscoveryResponder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl DiscoveryResponder {
    /// Bind a UDP socket and start answering discovery requests for
    /// `service_name`, advertising `service_port`.
    pub fn start(
        bind: impl ToSocketAddrs + std::fmt::Debug,
        service_name: &str,
        service_port: u16,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(&bind).map_err(|e| TransportError::Bind {
            addr: format!("{bind:?}"),
            source: e,
        })?;
        let local_addr = socket.local_addr()?;
        // Poll so the responder thread can observe the stop flag.
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let name = service_name.to_string();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            while !thread_stop.load(Ordering::Relaxed) {
                let (len, from) = match socket.recv_from(&mut buf) {
                    Ok(recv) => recv,
                    Err(err)
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(err) => {
                        warn!(%err, "discovery responder socket error");
                        return;
                    }
                };

                let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                    continue;
                };
                let Some(requested) = text.trim_end().strip_prefix(DISCOVER_PREFIX) else {
                    continue;
                };
                if requested != name {
                    continue;
                }

                debug!(peer = %from, service = %name, "answering discovery request");
                let reply = format!("{SERVICE_PREFIX}{name} {service_port}");
                if let Err(err) = socket.send_to(reply.as_bytes(), from) {
                    warn!(%err, "discovery reply failed");
                }
            }
        });

        Ok(Self {
            stop,
            handle: Some(handle),
            local_addr,
        })
    }

    /// The UDP address the responder is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the responder thread. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Locate a named service by sending a discovery datagram to `target`
/// (typically a broadcast address) and waiting up to `timeout` for an
/// answer.
///
/// Returns the TCP address of the service: the responder's host with the
/// advertised port.
pub fn discover(
    target: impl ToSocketAddrs + std::fmt::Debug,
    service_name: &str,
    timeout: Duration,
) -> Result<SocketAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;

    let request = format!("{DISCOVER_PREFIX}{service_name}");
    socket.send_to(request.as_bytes(), &target)?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|r| !r.is_zero())
            .ok_or(TransportError::DiscoveryTimeout(timeout))?;
        socket.set_read_timeout(Some(remaining))?;

        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(recv) => recv,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(TransportError::DiscoveryTimeout(timeout));
            }
            Err(err) => return Err(err.into()),
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            continue;
        };
        let Some(rest) = text.trim_end().strip_prefix(SERVICE_PREFIX) else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        if parts.next() != Some(service_name) {
            continue;
        }
        let Some(port) = parts.next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };

        return Ok(SocketAddr::new(from.ip(), port));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_answers_matching_request() {
        let mut responder = DiscoveryResponder::start("127.0.0.1:0", "echo", 4567).unwrap();
        let addr = responder.local_addr();

        let found = discover(addr, "echo", Duration::from_secs(2)).unwrap();
        assert_eq!(found.port(), 4567);
        assert_eq!(found.ip(), addr.ip());

        responder.stop();
    }

    #[test]
    fn responder_ignores_other_services() {
        let mut responder = DiscoveryResponder::start("127.0.0.1:0", "echo", 4567).unwrap();
        let addr = responder.local_addr();

        let err = discover(addr, "other", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TransportError::DiscoveryTimeout(_)));

        responder.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut responder = DiscoveryResponder::start("127.0.0.1:0", "echo", 1).unwrap();
        responder.stop();
        responder.stop();
    }
}
