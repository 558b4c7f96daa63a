//! Server: accept loop, per-connection workers, live-client set,
//! handler dispatch, and broadcast.

use std::collections::HashMap;
use std::mem;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use wireline_message::{
    generate_id, write_message, Message, MessageRegistry, ModeChange, Part, Payload, SessionMode,
};
use wireline_transport::{NetListener, NetStream};

use crate::error::{NetError, Result};
use crate::handlers::HandlerTable;
use crate::keepalive::{Keepalive, SessionProbe};
use crate::session::{
    read_one, split_stream, BusyGuard, CipherConfig, KeepaliveConfig, SessionInfo, WriteHalf,
};

/// Configuration for [`Server::bind`].
#[derive(Debug)]
pub struct ServerConfig {
    addr: String,
    cipher: Option<CipherConfig>,
    registry: MessageRegistry,
    /// Root directory served by the Filenames default handler; `None`
    /// disables it.
    file_root: Option<PathBuf>,
    /// Fallback ping schedule when a `ClientMode` message carries none.
    keepalive: KeepaliveConfig,
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            cipher: None,
            registry: MessageRegistry::new(),
            file_root: None,
            keepalive: KeepaliveConfig::default(),
        }
    }

    /// Encrypt all connections. Clients must use the same config.
    pub fn with_cipher(mut self, cipher: CipherConfig) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use a custom-tag registry for decoding received frames.
    pub fn with_registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Serve files under `root` for unhandled Filenames requests.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    /// Override the fallback ping schedule.
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }
}

type ConnCallback = Box<dyn Fn(u64, SocketAddr) + Send + Sync>;

/// Server-side view of one connected client.
pub struct RemoteClient {
    id: u64,
    peer_addr: SocketAddr,
    write: Mutex<WriteHalf>,
    raw: NetStream,
    mode: Mutex<SessionMode>,
    busy: AtomicBool,
    open: AtomicBool,
    keepalive: Mutex<Option<Keepalive>>,
}

impl RemoteClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn mode(&self) -> SessionMode {
        *lock(&self.mode)
    }

    /// Send one message to this client.
    pub fn send(&self, message: &Message) -> Result<()> {
        let _busy = BusyGuard::hold(&self.busy);
        let mut writer = lock(&self.write);
        write_message(&mut *writer, message)?;
        Ok(())
    }

    /// Shut the socket down, waking this client's reader thread so it can
    /// clean up. Idempotent.
    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(keepalive) = lock(&self.keepalive).take() {
            keepalive.stop();
        }
        if let Err(err) = self.raw.shutdown() {
            debug!(client = self.id, error = %err, "socket shutdown failed");
        }
    }

    fn mark_alive(&self) {
        if let Some(keepalive) = lock(&self.keepalive).as_ref() {
            keepalive.mark_alive();
        }
    }
}

impl SessionProbe for RemoteClient {
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

struct ServerInner {
    listener: NetListener,
    local_addr: SocketAddr,
    cipher: Option<CipherConfig>,
    registry: MessageRegistry,
    file_root: Option<PathBuf>,
    keepalive_cfg: KeepaliveConfig,
    handlers: Mutex<HandlerTable>,
    clients: Mutex<HashMap<u64, Arc<RemoteClient>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    on_connected: Mutex<Option<ConnCallback>>,
    on_disconnected: Mutex<Option<ConnCallback>>,
}

/// Accepts connections and serves each on its own thread.
pub struct Server {
    inner: Arc<ServerInner>,
    accept_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listening socket. The accept loop starts with
    /// [`Server::start`].
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.keepalive.ensure_valid()?;
        let listener = NetListener::bind(&config.addr)?;
        let local_addr = listener.local_addr();
        info!(%local_addr, encrypted = config.cipher.is_some(), "server bound");
        Ok(Self {
            inner: Arc::new(ServerInner {
                listener,
                local_addr,
                cipher: config.cipher,
                registry: config.registry,
                file_root: config.file_root,
                keepalive_cfg: config.keepalive,
                handlers: Mutex::new(HandlerTable::new()),
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                on_connected: Mutex::new(None),
                on_disconnected: Mutex::new(None),
            }),
            accept_worker: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Register a handler for one command.
    pub fn on_command<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).on_command(command, handler);
    }

    /// Register the catch-all for otherwise-unmatched messages.
    pub fn on_unmatched<F>(&self, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).on_unmatched(handler);
    }

    /// Callback fired after a client is registered in the live set.
    pub fn on_client_connected(&self, callback: impl Fn(u64, SocketAddr) + Send + Sync + 'static) {
        *lock(&self.inner.on_connected) = Some(Box::new(callback));
    }

    /// Callback fired after a client is removed from the live set.
    pub fn on_client_disconnected(
        &self,
        callback: impl Fn(u64, SocketAddr) + Send + Sync + 'static,
    ) {
        *lock(&self.inner.on_disconnected) = Some(Box::new(callback));
    }

    /// Start the accept loop on its own thread. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *lock(&self.accept_worker) = Some(std::thread::spawn(move || accept_loop(inner)));
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        lock(&self.inner.clients).len()
    }

    /// Send one message to every listening client concurrently.
    ///
    /// A client that fails mid-broadcast is closed and skipped; the
    /// broadcast itself never fails on a single client's account.
    pub fn broadcast(&self, message: &Message) {
        let targets: Vec<Arc<RemoteClient>> = lock(&self.inner.clients)
            .values()
            .filter(|client| {
                client.open.load(Ordering::Acquire) && client.mode() == SessionMode::Listening
            })
            .cloned()
            .collect();

        let mut workers = Vec::with_capacity(targets.len());
        for client in targets {
            let message = message.clone();
            workers.push(std::thread::spawn(move || {
                if let Err(err) = client.send(&message) {
                    debug!(client = client.id, error = %err, "broadcast send failed; dropping client");
                    client.close();
                }
            }));
        }
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Stop accepting and disconnect every client. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Wake the blocked accept with a throwaway connection.
        let _ = NetStream::connect(self.inner.local_addr);
        if let Some(worker) = lock(&self.accept_worker).take() {
            let _ = worker.join();
        }
        let clients: Vec<Arc<RemoteClient>> =
            lock(&self.inner.clients).values().cloned().collect();
        for client in clients {
            client.close();
        }
        info!("server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(inner: Arc<ServerInner>) {
    loop {
        match inner.listener.accept() {
            Ok(stream) => {
                if !inner.running.load(Ordering::Acquire) {
                    return;
                }
                let conn_inner = Arc::clone(&inner);
                std::thread::spawn(move || serve_connection(conn_inner, stream));
            }
            Err(err) => {
                if !inner.running.load(Ordering::Acquire) {
                    return;
                }
                warn!(error = %err, "accept failed");
            }
        }
    }
}

/// One connection's whole lifetime: register, read frames until the
/// client goes away or a handler fails, deregister.
fn serve_connection(inner: Arc<ServerInner>, stream: NetStream) {
    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            debug!(error = %err, "connection lost before setup");
            return;
        }
    };
    let (mut read_half, write_half, raw) = match split_stream(stream, inner.cipher.as_ref()) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(client = id, error = %err, "connection setup failed");
            return;
        }
    };

    let client = Arc::new(RemoteClient {
        id,
        peer_addr,
        write: Mutex::new(write_half),
        raw,
        mode: Mutex::new(SessionMode::Transaction),
        busy: AtomicBool::new(false),
        open: AtomicBool::new(true),
        keepalive: Mutex::new(None),
    });
    lock(&inner.clients).insert(id, Arc::clone(&client));
    info!(client = id, %peer_addr, "client connected");
    if let Some(callback) = lock(&inner.on_connected).as_ref() {
        callback(id, peer_addr);
    }

    let mut overrun = Vec::new();
    loop {
        let message = match read_one(&mut read_half, mem::take(&mut overrun), &inner.registry) {
            Ok(Some((message, next))) => {
                overrun = next;
                message
            }
            Ok(None) | Err(NetError::PeerClosed) => {
                debug!(client = id, "client hung up");
                break;
            }
            Err(err) => {
                if client.open.load(Ordering::Acquire) {
                    warn!(client = id, error = %err, "connection error");
                }
                break;
            }
        };

        client.mark_alive();
        let handled = {
            let _busy = BusyGuard::hold(&client.busy);
            handle_frame(&inner, &client, &message)
        };
        if let Err(err) = handled {
            warn!(client = id, command = %message.command, error = %err, "dispatch failed; closing connection");
            break;
        }
    }

    client.close();
    lock(&inner.clients).remove(&id);
    if let Some(callback) = lock(&inner.on_disconnected).as_ref() {
        callback(id, peer_addr);
    }
    info!(client = id, "client disconnected");
}

fn handle_frame(inner: &ServerInner, client: &Arc<RemoteClient>, message: &Message) -> Result<()> {
    match &message.payload {
        Payload::Ping => client.send(&Message::ping_reply()),
        Payload::PingReply => Ok(()),
        Payload::Mode(change) => apply_mode(inner, client, change),
        _ => {
            let reply = resolve_reply(inner, client, message)?;
            if let Some(mut reply) = reply {
                // Replies carry the request's id, or a fresh one.
                if reply.id.is_none() {
                    reply.id = message.id.clone().or_else(|| Some(generate_id()));
                }
                client.send(&reply)?;
            }
            Ok(())
        }
    }
}

/// Resolve a reply in priority order: command handler, Filenames default,
/// catch-all.
fn resolve_reply(
    inner: &ServerInner,
    client: &Arc<RemoteClient>,
    message: &Message,
) -> Result<Option<Message>> {
    let info = SessionInfo {
        client_id: client.id,
        peer_addr: client.peer_addr,
        mode: client.mode(),
    };
    if let Some(handler) = lock(&inner.handlers).resolve(&message.command) {
        return handler(&info, message).map_err(|err| NetError::Handler(err.to_string()));
    }
    if let (Payload::Filenames(names), Some(root)) = (&message.payload, &inner.file_root) {
        return Ok(Some(file_reply(root, names, &message.command)));
    }
    if let Some(handler) = lock(&inner.handlers).unmatched() {
        return handler(&info, message).map_err(|err| NetError::Handler(err.to_string()));
    }
    debug!(command = %message.command, "no handler matched; dropping");
    Ok(None)
}

fn apply_mode(inner: &ServerInner, client: &Arc<RemoteClient>, change: &ModeChange) -> Result<()> {
    *lock(&client.mode) = change.mode;
    info!(client = client.id, mode = ?change.mode, "client mode changed");
    match change.mode {
        SessionMode::Listening if change.send_pings => {
            let schedule = KeepaliveConfig {
                interval: change.ping_interval.unwrap_or(inner.keepalive_cfg.interval),
                timeout: change.ping_timeout.unwrap_or(inner.keepalive_cfg.timeout),
            };
            let weak = Arc::downgrade(client);
            let keepalive = Keepalive::start(
                Arc::clone(client) as Arc<dyn SessionProbe>,
                schedule,
                move || {
                    if let Some(client) = weak.upgrade() {
                        warn!(client = client.id, "client unresponsive; dropping");
                        client.close();
                    }
                },
            );
            *lock(&client.keepalive) = Some(keepalive);
        }
        _ => {
            if let Some(keepalive) = lock(&client.keepalive).take() {
                keepalive.stop();
            }
        }
    }
    Ok(())
}

/// Default reply for a Filenames request: the named files under the
/// configured root as multipart parts, or a 404 status naming the first
/// unreadable path.
fn file_reply(root: &Path, names: &[String], command: &str) -> Message {
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let relative = Path::new(name);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            debug!(path = %name, "file request escapes root");
            return Message::status(404, name.clone());
        }
        match std::fs::read(root.join(relative)) {
            Ok(contents) => parts.push(Part::file(name.clone(), name.clone(), contents)),
            Err(err) => {
                debug!(path = %name, error = %err, "file request unreadable");
                return Message::status(404, name.clone());
            }
        }
    }
    Message::multipart(command, parts)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_on_ephemeral_port_reports_real_addr() {
        let server = Server::bind(ServerConfig::new("127.0.0.1:0")).expect("bind should succeed");
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn bad_keepalive_schedule_is_rejected_before_binding() {
        use std::time::Duration;

        let result = Server::bind(ServerConfig::new("127.0.0.1:0").with_keepalive(
            KeepaliveConfig {
                interval: Duration::ZERO,
                timeout: Duration::from_secs(1),
            },
        ));
        assert!(matches!(result, Err(NetError::Configuration(_))));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let server = Server::bind(ServerConfig::new("127.0.0.1:0")).expect("bind should succeed");
        server.start();
        server.start();
        server.stop();
        server.stop();
    }

    #[test]
    fn file_reply_rejects_escaping_paths() {
        let reply = file_reply(Path::new("/tmp"), &["../etc/passwd".into()], "Fetch");
        assert_eq!(reply.status_code(), Some("404"));
    }
}
