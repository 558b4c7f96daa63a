//! Client session: one socket, Transaction or Listening discipline.

use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use wireline_message::{
    write_message, Message, MessageRegistry, ModeChange, Payload, SessionMode,
};
use wireline_transport::NetStream;

use crate::error::{NetError, Result};
use crate::handlers::HandlerTable;
use crate::keepalive::{Keepalive, SessionProbe};
use crate::session::{
    read_one, split_stream, BusyGuard, CipherConfig, KeepaliveConfig, ReadHalf, SessionInfo,
    WriteHalf,
};

/// Configuration for [`Client::connect`].
#[derive(Debug)]
pub struct ClientConfig {
    addr: String,
    cipher: Option<CipherConfig>,
    registry: MessageRegistry,
    keepalive: KeepaliveConfig,
    connect_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            cipher: None,
            registry: MessageRegistry::new(),
            keepalive: KeepaliveConfig::default(),
            connect_timeout: None,
        }
    }

    /// Encrypt the connection. The server must use the same config.
    pub fn with_cipher(mut self, cipher: CipherConfig) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use a custom-tag registry for decoding received frames.
    pub fn with_registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Override the ping schedule used in Listening mode.
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Bound the connect attempt instead of blocking indefinitely.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

struct ReadState {
    half: ReadHalf,
    overrun: Vec<u8>,
}

struct ClientInner {
    /// Raw clone kept solely so `shutdown()` can abort a blocked read.
    raw: NetStream,
    read: Mutex<ReadState>,
    write: Mutex<WriteHalf>,
    /// Serializes transactions: at most one in flight per session.
    txn: Mutex<()>,
    registry: MessageRegistry,
    handlers: Mutex<HandlerTable>,
    mode: Mutex<SessionMode>,
    busy: AtomicBool,
    open: AtomicBool,
    stop_listening: AtomicBool,
    peer_addr: SocketAddr,
    keepalive_cfg: KeepaliveConfig,
    keepalive: Mutex<Option<Keepalive>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    on_disconnect: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl ClientInner {
    /// Close the socket and stop supervision. Idempotent; the disconnect
    /// callback fires only on the first, unexpected teardown.
    fn teardown(&self, unexpected: bool) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(keepalive) = lock(&self.keepalive).take() {
            keepalive.stop();
        }
        if let Err(err) = self.raw.shutdown() {
            debug!(error = %err, "socket shutdown failed");
        }
        if unexpected {
            if let Some(callback) = lock(&self.on_disconnect).as_ref() {
                callback();
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(NetError::PeerClosed)
        }
    }

    fn mode(&self) -> SessionMode {
        *lock(&self.mode)
    }

    fn mark_alive(&self) {
        if let Some(keepalive) = lock(&self.keepalive).as_ref() {
            keepalive.mark_alive();
        }
    }

    fn send(&self, message: &Message) -> Result<()> {
        let mut writer = lock(&self.write);
        write_message(&mut *writer, message)?;
        Ok(())
    }
}

impl SessionProbe for ClientInner {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send_ping(&self) -> Result<()> {
        self.send(&Message::ping())
    }
}

/// A connected client session.
///
/// Starts in Transaction mode; [`Client::set_mode`] negotiates a switch
/// with the server. Closing (or dropping) the client aborts any blocked
/// read and joins the receive worker.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect to a server. A refused or timed-out connect is the `Err`;
    /// the caller may simply retry.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.keepalive.ensure_valid()?;
        let stream = match config.connect_timeout {
            Some(timeout) => NetStream::connect_timeout(&config.addr, timeout)?,
            None => NetStream::connect(&config.addr)?,
        };
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half, raw) = split_stream(stream, config.cipher.as_ref())?;
        info!(%peer_addr, encrypted = config.cipher.is_some(), "client connected");

        Ok(Self {
            inner: Arc::new(ClientInner {
                raw,
                read: Mutex::new(ReadState {
                    half: read_half,
                    overrun: Vec::new(),
                }),
                write: Mutex::new(write_half),
                txn: Mutex::new(()),
                registry: config.registry,
                handlers: Mutex::new(HandlerTable::new()),
                mode: Mutex::new(SessionMode::Transaction),
                busy: AtomicBool::new(false),
                open: AtomicBool::new(true),
                stop_listening: AtomicBool::new(false),
                peer_addr,
                keepalive_cfg: config.keepalive,
                keepalive: Mutex::new(None),
                worker: Mutex::new(None),
                on_disconnect: Mutex::new(None),
            }),
        })
    }

    /// Register a handler for pushes received in Listening mode.
    pub fn on_command<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).on_command(command, handler);
    }

    /// Register the catch-all for pushes with no specific handler.
    pub fn on_unmatched<F>(&self, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).on_unmatched(handler);
    }

    /// Register a callback fired once when the connection dies
    /// unexpectedly (peer hangup or keepalive timeout).
    pub fn on_disconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.inner.on_disconnect) = Some(Box::new(callback));
    }

    pub fn mode(&self) -> SessionMode {
        self.inner.mode()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Synchronous exchange: send one message, block for its reply.
    ///
    /// Transaction mode only. Concurrent callers serialize; each gets the
    /// reply to its own request.
    pub fn transaction(&self, message: Message) -> Result<Message> {
        self.inner.ensure_open()?;
        let current = self.inner.mode();
        if current != SessionMode::Transaction {
            return Err(NetError::ModeViolation { current });
        }

        let _txn = lock(&self.inner.txn);
        let _busy = BusyGuard::hold(&self.inner.busy);
        // Correlate the reply by id so a stray frame is never mistaken
        // for it.
        let message = if message.id.is_none() {
            message.with_id(wireline_message::generate_id())
        } else {
            message
        };
        let want = message.id.clone();
        self.inner.send(&message)?;

        let mut state = lock(&self.inner.read);
        loop {
            let overrun = mem::take(&mut state.overrun);
            let next = read_one(&mut state.half, overrun, &self.inner.registry);
            match next {
                Ok(None) => {
                    drop(state);
                    self.inner.teardown(false);
                    return Err(NetError::PeerClosed);
                }
                Err(err) => {
                    drop(state);
                    self.inner.teardown(false);
                    return Err(err);
                }
                Ok(Some((reply, overrun))) => {
                    state.overrun = overrun;
                    match reply.payload {
                        // A server probe can interleave with the reply.
                        Payload::Ping => self.inner.send(&Message::ping_reply())?,
                        Payload::PingReply | Payload::Mode(_) => {}
                        _ if reply.id == want => return Ok(reply),
                        _ => {
                            debug!(command = %reply.command, "discarding frame that is not the awaited reply");
                        }
                    }
                }
            }
        }
    }

    /// Fire-and-forget push. Listening mode only.
    pub fn push(&self, message: Message) -> Result<()> {
        self.inner.ensure_open()?;
        let current = self.inner.mode();
        if current != SessionMode::Listening {
            return Err(NetError::ModeViolation { current });
        }
        let _busy = BusyGuard::hold(&self.inner.busy);
        self.inner.send(&message)
    }

    /// Negotiate a mode switch with the server.
    ///
    /// Switching to the current mode is a no-op with no message exchange.
    /// Entering Listening spawns the receive worker and starts keepalive;
    /// returning to Transaction stops both, nudging the blocked worker
    /// with a ping so it exits deterministically.
    pub fn set_mode(&self, mode: SessionMode) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.mode() == mode {
            return Ok(());
        }

        match mode {
            SessionMode::Listening => {
                let schedule = self.inner.keepalive_cfg;
                self.inner.send(&Message::mode_change(ModeChange {
                    mode: SessionMode::Listening,
                    send_pings: true,
                    ping_interval: Some(schedule.interval),
                    ping_timeout: Some(schedule.timeout),
                }))?;
                *lock(&self.inner.mode) = SessionMode::Listening;
                self.inner.stop_listening.store(false, Ordering::Release);

                let worker_inner = Arc::clone(&self.inner);
                *lock(&self.inner.worker) =
                    Some(std::thread::spawn(move || receive_loop(worker_inner)));

                let weak = Arc::downgrade(&self.inner);
                let keepalive = Keepalive::start(
                    Arc::clone(&self.inner) as Arc<dyn SessionProbe>,
                    schedule,
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            warn!("server unresponsive; closing session");
                            inner.teardown(true);
                        }
                    },
                );
                *lock(&self.inner.keepalive) = Some(keepalive);
                info!("session entered listening mode");
            }
            SessionMode::Transaction => {
                if let Some(keepalive) = lock(&self.inner.keepalive).take() {
                    keepalive.stop();
                }
                self.inner.stop_listening.store(true, Ordering::Release);
                self.inner.send(&Message::mode_change(ModeChange {
                    mode: SessionMode::Transaction,
                    send_pings: false,
                    ping_interval: None,
                    ping_timeout: None,
                }))?;
                // The server's PingReply arrives after it applied the
                // switch; the worker sees the stop flag and exits.
                self.inner.send(&Message::ping())?;
                if let Some(worker) = lock(&self.inner.worker).take() {
                    let _ = worker.join();
                }
                *lock(&self.inner.mode) = SessionMode::Transaction;
                info!("session entered transaction mode");
            }
        }
        Ok(())
    }

    /// Close the session. Idempotent; unblocks any in-progress read and
    /// joins the receive worker.
    pub fn close(&self) {
        self.inner.stop_listening.store(true, Ordering::Release);
        self.inner.teardown(false);
        if let Some(worker) = lock(&self.inner.worker).take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Listening-mode receive loop: parse frames strictly in arrival order,
/// answer internal traffic inline, dispatch the rest to handlers.
fn receive_loop(inner: Arc<ClientInner>) {
    loop {
        let message = {
            let mut state = lock(&inner.read);
            let overrun = mem::take(&mut state.overrun);
            match read_one(&mut state.half, overrun, &inner.registry) {
                Ok(Some((message, next))) => {
                    state.overrun = next;
                    message
                }
                Ok(None) | Err(NetError::PeerClosed) => {
                    drop(state);
                    debug!("server closed the connection");
                    inner.teardown(true);
                    return;
                }
                Err(err) => {
                    drop(state);
                    if inner.open.load(Ordering::Acquire) {
                        warn!(error = %err, "receive loop failed");
                    }
                    inner.teardown(true);
                    return;
                }
            }
        };

        inner.mark_alive();
        match &message.payload {
            Payload::Ping => {
                if inner.send(&Message::ping_reply()).is_err() {
                    inner.teardown(true);
                    return;
                }
            }
            Payload::PingReply => {
                // When leaving listening mode the nudge's reply marks the
                // point where the server has applied the switch; pending
                // pushes before it have all been drained in order.
                if inner.stop_listening.load(Ordering::Acquire) {
                    return;
                }
            }
            Payload::Mode(_) => {}
            _ => dispatch_push(&inner, &message),
        }
    }
}

fn dispatch_push(inner: &Arc<ClientInner>, message: &Message) {
    let _busy = BusyGuard::hold(&inner.busy);
    let info = SessionInfo {
        client_id: 0,
        peer_addr: inner.peer_addr,
        mode: SessionMode::Listening,
    };
    let handler = {
        let table = lock(&inner.handlers);
        table.resolve(&message.command).or_else(|| table.unmatched())
    };
    let Some(handler) = handler else {
        debug!(command = %message.command, "push with no handler dropped");
        return;
    };
    match handler(&info, message) {
        Ok(Some(reply)) => {
            if let Err(err) = inner.send(&reply) {
                warn!(error = %err, "failed to send handler reply");
            }
        }
        Ok(None) => {}
        Err(err) => warn!(command = %message.command, error = %err, "push handler failed"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
