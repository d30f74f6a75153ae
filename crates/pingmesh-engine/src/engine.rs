//! Engine lifecycle and shared state
//!
//! The engine owns one reader-writer lock guarding the probe index, the
//! expirer-running flag, the per-destination channel map, and the open
//! sockets. The lock is never held across an await point, a socket syscall,
//! or a channel send that could block; the one deliberate exception is the
//! expirer entry guard, which flips a flag and spawns (without blocking)
//! inside the same critical section as the first insertion.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pingmesh_net::{Family, SocketPair};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::index::ProbeIndex;
use crate::probe::{PingExpired, PingSuccess};
use crate::receiver;

/// Bounded senders for one destination's terminal events. Registered by the
/// prober before its first insertion, removed at prober exit. Capacity equals
/// the probe count, so neither the receivers nor the expirer can ever block
/// on a consumer that has gone away.
pub(crate) struct DestChannels {
    pub success_tx: mpsc::Sender<PingSuccess>,
    pub expired_tx: mpsc::Sender<PingExpired>,
}

pub(crate) struct State {
    pub started: bool,
    pub sockets: Option<SocketPair>,
    pub index: ProbeIndex,
    pub expirer_running: bool,
    pub expirer_handle: Option<JoinHandle<()>>,
    pub channels: HashMap<IpAddr, DestChannels>,
    pub receiver_handles: Vec<JoinHandle<()>>,
    pub receiver_groups: HashMap<Family, CancellationToken>,
    pub shutdown: CancellationToken,
    pub prober_shutdown: CancellationToken,
    pub expirer_shutdown: CancellationToken,
    pub receiver_shutdown: CancellationToken,
}

impl Default for State {
    fn default() -> Self {
        Self {
            started: false,
            sockets: None,
            index: ProbeIndex::default(),
            expirer_running: false,
            expirer_handle: None,
            channels: HashMap::new(),
            receiver_handles: Vec::new(),
            receiver_groups: HashMap::new(),
            shutdown: CancellationToken::new(),
            prober_shutdown: CancellationToken::new(),
            expirer_shutdown: CancellationToken::new(),
            receiver_shutdown: CancellationToken::new(),
        }
    }
}

pub(crate) struct Shared {
    pub config: EngineConfig,
    /// Echo identifier: low 16 bits of the pid. The kernel rewrites it on
    /// datagram sockets, but the wire stays well-formed either way.
    pub identifier: u16,
    pub state: RwLock<State>,
    pub active_probers: AtomicUsize,
    pub prober_idle: Notify,
}

/// Concurrent ICMP echo engine.
///
/// Cheap to clone; all clones share one probe index, socket pair, and worker
/// set. Construct with [`Engine::new`], open sockets and spawn receivers with
/// [`Engine::start`], then call [`Engine::ping`] from as many tasks as there
/// are destinations (one active prober per destination).
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

impl Engine {
    /// Build the engine data structures. Opens no sockets and spawns no
    /// workers; deferring that to [`start`](Engine::start) lets a daemon
    /// construct the engine early and begin probing only when needed.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                identifier: (std::process::id() & 0xffff) as u16,
                state: RwLock::new(State::default()),
                active_probers: AtomicUsize::new(0),
                prober_idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Number of probes currently awaiting a terminal event.
    pub fn outstanding_probes(&self) -> usize {
        self.shared.state.read().index.len()
    }

    /// Get a cancellation token for stopping the engine. Cancelling it wakes
    /// [`run`](Engine::run), which drains the engine; [`stop`](Engine::stop)
    /// cancels it too, so any holder learns the engine is going down. A fresh
    /// token is issued on every start.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.state.read().shutdown.clone()
    }

    /// Open sockets and spawn receivers, honouring the configured splay.
    ///
    /// # Panics
    ///
    /// Panics if the engine is already started; that is a violated contract,
    /// not a recoverable condition.
    pub fn start(&self) -> Result<()> {
        self.start_splay(self.shared.config.splay_receivers)
    }

    /// [`start`](Engine::start) with an explicit splay choice. Tests disable
    /// splay for faster startup.
    pub fn start_splay(&self, splay: bool) -> Result<()> {
        // Check-and-set in one critical section so two concurrent starts
        // cannot both proceed.
        {
            let mut state = self.shared.state.write();
            if state.started {
                panic!("engine already started");
            }
            state.started = true;
            state.shutdown = CancellationToken::new();
            state.prober_shutdown = CancellationToken::new();
            state.expirer_shutdown = CancellationToken::new();
        }

        if self.shared.config.fake_success {
            info!("engine started in fake-success mode, no sockets opened");
            return Ok(());
        }

        // Sockets are opened before re-taking the lock; the lock is never
        // held across a syscall.
        let sockets = match SocketPair::open() {
            Ok(sockets) => sockets,
            Err(e) => {
                self.shared.state.write().started = false;
                return Err(e.into());
            }
        };

        let mut state = self.shared.state.write();
        state.receiver_shutdown = CancellationToken::new();
        state.receiver_groups.clear();

        let mut spawned = 0;
        for (family, count) in [
            (Family::V4, self.shared.config.receivers_v4),
            (Family::V6, self.shared.config.receivers_v6),
        ] {
            let group = CancellationToken::new();
            state.receiver_groups.insert(family, group.clone());
            let socket = sockets.socket(family);

            for r in 0..count {
                // Stagger same-family receivers by read_deadline / count so
                // their deadlines do not line up.
                let start_delay = if splay {
                    self.shared.config.read_deadline / count as u32 * r as u32
                } else {
                    std::time::Duration::ZERO
                };
                let handle = tokio::spawn(receiver::run(
                    Arc::clone(&self.shared),
                    Arc::clone(&socket),
                    family,
                    r,
                    state.receiver_shutdown.clone(),
                    group.clone(),
                    start_delay,
                ));
                state.receiver_handles.push(handle);
                spawned += 1;
            }
        }

        state.sockets = Some(sockets);
        state.started = true;
        info!(receivers = spawned, "engine started");
        Ok(())
    }

    /// Block until `shutdown` or the engine's own
    /// [`shutdown_token`](Engine::shutdown_token) fires, then drain the
    /// engine with [`stop`](Engine::stop). Intended to be spawned alongside
    /// the daemon's other long-lived tasks.
    pub async fn run(&self, shutdown: CancellationToken) {
        let engine_shutdown = self.shared.state.read().shutdown.clone();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = engine_shutdown.cancelled() => {}
        }
        debug!("engine shutdown signalled");
        self.stop().await;
    }

    /// Drain in a fixed order so no component delivers to a closed peer:
    /// probers first, then the expirer, then the receivers, then the sockets.
    pub async fn stop(&self) {
        info!("stopping engine");

        let (shutdown, prober_shutdown) = {
            let state = self.shared.state.read();
            (state.shutdown.clone(), state.prober_shutdown.clone())
        };
        shutdown.cancel();
        prober_shutdown.cancel();
        self.wait_for_probers().await;

        let (expirer_shutdown, expirer_handle) = {
            let mut state = self.shared.state.write();
            (state.expirer_shutdown.clone(), state.expirer_handle.take())
        };
        expirer_shutdown.cancel();
        if let Some(handle) = expirer_handle {
            let _ = handle.await;
        }

        let (receiver_shutdown, groups, handles) = {
            let mut state = self.shared.state.write();
            (
                state.receiver_shutdown.clone(),
                std::mem::take(&mut state.receiver_groups),
                std::mem::take(&mut state.receiver_handles),
            )
        };
        receiver_shutdown.cancel();
        for group in groups.values() {
            group.cancel();
        }
        for handle in handles {
            let _ = handle.await;
        }

        let mut state = self.shared.state.write();
        if !state.index.is_empty() {
            debug!(
                outstanding = state.index.len(),
                "shutdown preempted delivery for outstanding probes"
            );
        }
        state.sockets = None;
        state.started = false;
        info!("engine stopped");
    }

    async fn wait_for_probers(&self) {
        loop {
            let idle = self.shared.prober_idle.notified();
            if self.shared.active_probers.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Scope guard for prober accounting: `stop` waits until the count drains.
pub(crate) struct ProberGuard {
    shared: Arc<Shared>,
}

impl ProberGuard {
    pub fn register(shared: &Arc<Shared>) -> Self {
        shared.active_probers.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for ProberGuard {
    fn drop(&mut self) {
        if self.shared.active_probers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.prober_idle.notify_waiters();
        }
    }
}
