//! Admission Controller
//!
//! Owns the listening socket and the shared admission state. The accept loop
//! runs as one task per server instance; every accepted connection is either
//! queued for execution, rejected for capacity, or answered by the paused fast
//! path. Queued requests move to running only while a slot is free, so
//! `max_concurrency` bounds the work actually executing, not just the queue.

use super::command_registry::CommandRegistry;
use super::request_task::{Admission, RequestTask};
use crate::config::ServerConfig;
use crate::utils::error::{NetcmdError, Result};
use async_std::channel::{self, Receiver, Sender};
use async_std::net::{TcpListener, TcpStream};
use async_std::task::{self, JoinHandle};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::FutureExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the accept loop and the request tasks mutate, guarded by one lock
#[derive(Default)]
pub(crate) struct AdmissionState {
    pub(crate) running: usize,
    pub(crate) pending: VecDeque<RequestTask>,
    /// A drain worker is alive
    pub(crate) draining: bool,
    pub(crate) total_requests: u64,
    pub(crate) paused: bool,
    pub(crate) stopped: bool,
    pub(crate) started_at: Option<DateTime<Utc>>,
}

/// State shared between a `Server` handle, its accept loop and its request tasks
pub(crate) struct ServerShared {
    config: ServerConfig,
    registry: CommandRegistry,
    state: Mutex<AdmissionState>,
}

impl ServerShared {
    fn new(config: ServerConfig, registry: CommandRegistry) -> Self {
        Self {
            config,
            registry,
            state: Mutex::new(AdmissionState {
                stopped: true,
                ..AdmissionState::default()
            }),
        }
    }

    /// Every field mutation is a single counter or flag update, so a poisoned
    /// lock still holds consistent state
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock_state().paused
    }

    pub(crate) fn pause(&self) {
        self.lock_state().paused = true;
        info!("Server paused.");
    }

    pub(crate) fn unpause(&self) {
        self.lock_state().paused = false;
        info!("Server unpaused.");
    }

    /// `"{started_at},{total_requests}"`, both read under one lock
    pub(crate) fn stats_line(&self) -> String {
        let state = self.lock_state();
        let started = state
            .started_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        format!("{},{}", started, state.total_requests)
    }

    /// Decide what happens to a freshly accepted connection
    fn admit(self: &Arc<Self>, connection: TcpStream) {
        let mut state = self.lock_state();
        state.total_requests += 1;

        // Paused: answer without touching the counters
        if state.paused {
            drop(state);
            debug!("Server paused; answering without admission");
            let request = RequestTask::new(connection, Arc::clone(self), Admission::Paused);
            task::spawn(request.run(None));
            return;
        }

        // Queued plus running work may not exceed the ceiling
        let in_flight = state.running + state.pending.len();
        if in_flight >= self.config.max_concurrency {
            let (running, pending) = (state.running, state.pending.len());
            drop(state);
            let rejection = NetcmdError::Capacity(self.config.max_concurrency);
            warn!(running, pending, "Rejecting connection: {}", rejection);
            let request =
                RequestTask::new(connection, Arc::clone(self), Admission::OverCapacity);
            task::spawn(request.run(None));
            return;
        }

        // Queue it and make sure someone is draining
        let request = RequestTask::new(connection, Arc::clone(self), Admission::Slot);
        state.pending.push_back(request);
        self.start_drain(&mut state);
    }

    /// Start a drain worker unless one is alive or nothing can run yet
    fn start_drain(self: &Arc<Self>, state: &mut AdmissionState) {
        // One worker at a time, and only when a queued request could start
        if state.draining
            || state.pending.is_empty()
            || state.running >= self.config.max_concurrency
        {
            return;
        }
        state.draining = true;
        let shared = Arc::clone(self);
        task::spawn(async move { shared.drain() });
    }

    /// Pop queued tasks and dispatch each to its own task while slots are free
    fn drain(self: Arc<Self>) {
        loop {
            // Pop and count in one step under the lock
            let next = {
                let mut state = self.lock_state();
                let request = if state.running < self.config.max_concurrency {
                    state.pending.pop_front()
                } else {
                    None
                };
                match request {
                    Some(request) => {
                        state.increment_resources();
                        Some(request)
                    }
                    None => {
                        state.draining = false;
                        None
                    }
                }
            };

            let Some(request) = next else {
                return;
            };

            // The guard travels with the request and frees the slot when dropped
            let slot = ResourceGuard {
                shared: Arc::clone(&self),
            };
            task::spawn(request.run(Some(slot)));
        }
    }

    /// Give back a slot and resume draining if work is waiting for it
    fn decrement_resources(self: &Arc<Self>) {
        let mut state = self.lock_state();
        state.running = state.running.saturating_sub(1);

        // A freed slot may unblock queued work
        self.start_drain(&mut state);
    }
}

impl AdmissionState {
    fn increment_resources(&mut self) {
        self.running += 1;
    }
}

/// One occupied execution slot; dropping it releases the slot on every exit path
pub(crate) struct ResourceGuard {
    shared: Arc<ServerShared>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.shared.decrement_resources();
    }
}

/// Handles of a started accept loop
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: Sender<()>,
    accept_task: JoinHandle<()>,
}

/// A command server instance
///
/// Several instances may run in one process as long as they listen on distinct
/// ports.
pub struct Server {
    shared: Arc<ServerShared>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Create a stopped server
    ///
    /// # Arguments
    /// * `config` - Listen address, admission ceiling and idle timeout
    /// * `registry` - Handlers for every non built-in command
    pub fn new(config: ServerConfig, registry: CommandRegistry) -> Self {
        Self {
            shared: Arc::new(ServerShared::new(config, registry)),
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the listening socket and start accepting connections
    ///
    /// Resets the request counter and the start time. Failing to bind is fatal
    /// for startup and is returned to the caller.
    ///
    /// # Returns
    /// * `Result<SocketAddr>` - The address actually bound (useful with port 0)
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(running) = self.lock_running().as_ref() {
            return Err(NetcmdError::AlreadyRunning(running.local_addr));
        }

        // Validate and bind before touching any state
        self.shared.config.validate()?;
        let addr = self.shared.config.listen_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| NetcmdError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        // Another start may have won while we were binding
        let mut running = self.lock_running();
        if let Some(existing) = running.as_ref() {
            return Err(NetcmdError::AlreadyRunning(existing.local_addr));
        }

        // Fresh counters for this run
        {
            let mut state = self.shared.lock_state();
            state.stopped = false;
            state.started_at = Some(Utc::now());
            state.total_requests = 0;
        }

        // Spawn the accept loop with its shutdown channel
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let accept_task = task::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            shutdown_rx,
        ));
        *running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
        });

        info!(
            %local_addr,
            max_concurrency = self.shared.config.max_concurrency,
            "Server listening"
        );
        Ok(local_addr)
    }

    /// Stop accepting connections and release the listener
    ///
    /// Clears the start time and resets the request counter once the accept
    /// loop has exited. Requests already admitted run to completion.
    pub async fn stop(&self) {
        let running = self.lock_running().take();

        // Stop accepting first so nothing is counted after the reset
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(()).await;
            running.accept_task.await;
            info!(local_addr = %running.local_addr, "Server stopped.");
        }

        let mut state = self.shared.lock_state();
        state.stopped = true;
        state.started_at = None;
        state.total_requests = 0;
    }

    /// Answer every command except `unpause` with the paused error
    pub fn pause(&self) {
        self.shared.pause();
    }

    pub fn unpause(&self) {
        self.shared.unpause();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock_state().stopped
    }

    /// Requests currently holding an execution slot
    pub fn running_count(&self) -> usize {
        self.shared.lock_state().running
    }

    /// Requests admitted but still waiting for a slot
    pub fn pending_count(&self) -> usize {
        self.shared.lock_state().pending.len()
    }

    /// Connections accepted since the last `start`
    pub fn total_requests(&self) -> u64 {
        self.shared.lock_state().total_requests
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock_state().started_at
    }

    /// Same text the `stats` command answers with
    pub fn stats(&self) -> String {
        self.shared.stats_line()
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.config.max_concurrency
    }

    /// Address of the listening socket while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|running| running.local_addr)
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.shared.registry()
    }
}

/// Accept connections until the shutdown channel fires
async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener, shutdown_rx: Receiver<()>) {
    loop {
        futures::select! {
            accepted = listener.accept().fuse() => {
                match accepted {
                    Ok((connection, peer)) => {
                        // Admission decides between queue, rejection and the paused path
                        debug!(%peer, "Received request from client");
                        shared.admit(connection);
                    }
                    Err(e) => {
                        // Back off so a persistent error does not spin
                        error!("Error accepting connection: {}", e);
                        task::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = shutdown_rx.recv().fuse() => {
                debug!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}
