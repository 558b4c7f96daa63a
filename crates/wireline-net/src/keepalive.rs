//! Liveness supervision for one session.
//!
//! Two periodic timers run on their own threads: the probe timer sends a
//! ping whenever the session is idle, and the check timer declares the
//! peer dead once the silence window is exceeded. A busy session counts
//! as alive on both timers, so active transfers never trigger probes or
//! false timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::session::KeepaliveConfig;

/// Timer tick granularity; interval changes and stops take effect within
/// one tick.
const TICK: Duration = Duration::from_millis(20);

/// Non-owning view of a session, read by the supervisor. Only session
/// code ever flips the underlying flags.
pub trait SessionProbe: Send + Sync {
    /// True while a send or receive is in progress.
    fn is_busy(&self) -> bool;
    /// True until the session closes.
    fn is_open(&self) -> bool;
    /// Send one ping frame to the peer.
    fn send_ping(&self) -> Result<()>;
}

struct Shared {
    probe: Arc<dyn SessionProbe>,
    on_dead: Box<dyn Fn() + Send + Sync>,
    last_seen: Mutex<Instant>,
    config: Mutex<KeepaliveConfig>,
    stopped: AtomicBool,
    dead_fired: AtomicBool,
}

impl Shared {
    fn mark_alive(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn silence(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    fn config(&self) -> KeepaliveConfig {
        *lock(&self.config)
    }

    fn done(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || !self.probe.is_open()
    }
}

/// Handle to a running supervisor. Cloning shares the same supervisor.
#[derive(Clone)]
pub struct Keepalive {
    shared: Arc<Shared>,
}

impl Keepalive {
    /// Start supervising `probe` with the given schedule.
    ///
    /// `on_dead` fires at most once, from the check-timer thread, after
    /// the peer has been silent longer than the timeout while idle.
    pub fn start(
        probe: Arc<dyn SessionProbe>,
        config: KeepaliveConfig,
        on_dead: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            probe,
            on_dead: Box::new(on_dead),
            last_seen: Mutex::new(Instant::now()),
            config: Mutex::new(config),
            stopped: AtomicBool::new(false),
            dead_fired: AtomicBool::new(false),
        });

        let probe_shared = Arc::clone(&shared);
        thread::spawn(move || probe_loop(probe_shared));
        let check_shared = Arc::clone(&shared);
        thread::spawn(move || check_loop(check_shared));

        Self { shared }
    }

    /// Record evidence of liveness (any frame arrived).
    pub fn mark_alive(&self) {
        self.shared.mark_alive();
    }

    /// Change both timer periods. Takes effect within one tick.
    pub fn set_intervals(&self, config: KeepaliveConfig) {
        *lock(&self.shared.config) = config;
    }

    /// Stop both timers. Idempotent; safe from any state.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

fn probe_loop(shared: Arc<Shared>) {
    let mut last_fire = Instant::now();
    loop {
        thread::sleep(TICK);
        if shared.done() {
            return;
        }
        if last_fire.elapsed() < shared.config().interval {
            continue;
        }
        last_fire = Instant::now();
        if shared.probe.is_busy() {
            // Ongoing I/O is itself evidence of liveness.
            shared.mark_alive();
        } else if let Err(err) = shared.probe.send_ping() {
            // Leave the verdict to the check timer.
            debug!(error = %err, "keepalive ping failed");
        }
    }
}

fn check_loop(shared: Arc<Shared>) {
    let mut last_fire = Instant::now();
    loop {
        thread::sleep(TICK);
        if shared.done() {
            return;
        }
        let config = shared.config();
        if last_fire.elapsed() < config.timeout {
            continue;
        }
        last_fire = Instant::now();
        if shared.probe.is_busy() {
            shared.mark_alive();
        } else if shared.silence() > config.timeout
            && shared
                .dead_fired
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!("peer declared dead after keepalive timeout");
            shared.stopped.store(true, Ordering::Release);
            (shared.on_dead)();
            return;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
