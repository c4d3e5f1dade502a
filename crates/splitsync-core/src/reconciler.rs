//! Cloud reconciler: periodic poll + merge against the remote store.
//!
//! One [`SyncSession`] exists per active race. It owns the poll loop, the
//! outbox retry loop, and the local presence listener, and funnels every
//! inbound record through the store's single merge entry point. Sessions are
//! plain values owned by the caller; nothing here is process-global, so
//! tests and multi-race setups can run sessions side by side.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::duplicate::{detect_cross_device_duplicate, CrossDeviceDuplicate};
use crate::error::{Error, Result};
use crate::events::{ConnectionStatus, EngineEvent, EventBus, TerminalReason};
use crate::models::{DeviceInfo, EntryId, QueuedWrite, TimedEntry, TimingPoint};
use crate::outbox::{Outbox, OutboxConfig};
use crate::presence::{DeviceRoster, LocalMessage, LocalPresenceChannel, DEFAULT_STALE_CUTOFF_MS};
use crate::store::RaceStore;
use crate::transport::{RaceTransport, TransportError};
use crate::util::unix_millis_now;

/// Reconciler cadence
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Poll interval while the connection is healthy
    pub poll_interval: Duration,
    /// Poll interval after repeated consecutive failures
    pub degraded_poll_interval: Duration,
    /// Degrade once consecutive failures exceed this count
    pub degraded_after_failures: u32,
    /// How often this session announces itself on the local channel
    pub heartbeat_interval: Duration,
    /// Outbox cadence and limits
    pub outbox: OutboxConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            degraded_poll_interval: Duration::from_secs(30),
            degraded_after_failures: 2,
            heartbeat_interval: Duration::from_secs(10),
            outbox: OutboxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PollState {
    status: ConnectionStatus,
    /// Last successful poll (Unix ms)
    last_poll: Option<i64>,
    /// Device count reported by the server on the last poll
    device_count: u32,
    /// Highest bib seen server-side, for collaborator bib auto-increment
    highest_bib: u32,
}

struct SessionInner<T: RaceTransport> {
    race_id: String,
    store: Arc<Mutex<RaceStore>>,
    transport: Arc<T>,
    outbox: Outbox<T>,
    events: EventBus,
    local: LocalPresenceChannel,
    roster: std::sync::Mutex<DeviceRoster>,
    poll_state: std::sync::Mutex<PollState>,
    consecutive_failures: AtomicU32,
    /// Prevents a second fetch from starting while one is outstanding
    poll_in_flight: AtomicBool,
    /// Latched once a non-retryable condition is hit
    terminal: AtomicBool,
    /// Abort handles for the spawned background tasks, so a terminal
    /// condition can stop them immediately rather than waiting out a tick
    tasks: std::sync::Mutex<Vec<AbortHandle>>,
    config: ReconcilerConfig,
}

impl<T: RaceTransport> SessionInner<T> {
    fn set_status(&self, status: ConnectionStatus) {
        let last_poll = {
            let mut state = self.poll_state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = status;
            state.last_poll
        };
        self.events.publish(EngineEvent::Status { status, last_poll });
    }

    fn poll_interval(&self) -> Duration {
        if self.consecutive_failures.load(Ordering::SeqCst) > self.config.degraded_after_failures {
            self.config.degraded_poll_interval
        } else {
            self.config.poll_interval
        }
    }

    /// Latch the terminal state; the signal fires exactly once even when
    /// two poll outcomes race. Background tasks are stopped on the spot.
    fn enter_terminal(&self, reason: TerminalReason) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("Sync session for race {} ended: {reason:?}", self.race_id);
        self.outbox.set_enabled(false);
        self.set_status(ConnectionStatus::Error);
        self.events.publish(EngineEvent::Terminal(reason));
        // Abort takes effect at the next await point, so the task that
        // latched the terminal state still finishes this call.
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Run one poll: fetch the remote snapshot and merge it.
    ///
    /// Returns the number of newly applied remote entries. Overlapping calls
    /// are skipped rather than run concurrently; failures are recorded and
    /// surfaced as events, never thrown at callers.
    async fn poll_once(&self) -> usize {
        if self.is_terminal() || self.poll_in_flight.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let applied = self.poll_inner().await;
        self.poll_in_flight.store(false, Ordering::SeqCst);
        applied
    }

    async fn poll_inner(&self) -> usize {
        let previously_connected = {
            let state = self.poll_state.lock().unwrap_or_else(|e| e.into_inner());
            matches!(
                state.status,
                ConnectionStatus::Connected | ConnectionStatus::Syncing
            )
        };
        self.set_status(if previously_connected {
            ConnectionStatus::Syncing
        } else {
            ConnectionStatus::Connecting
        });

        let (device_id, device_name) = {
            let store = self.store.lock().await;
            (store.device().id.clone(), store.device().name.clone())
        };

        let response = self
            .transport
            .fetch_entries(&self.race_id, &device_id, &device_name)
            .await;

        match response {
            Ok(response) => {
                if response.deleted {
                    self.enter_terminal(TerminalReason::RaceDeleted);
                    return 0;
                }

                let applied = {
                    let mut store = self.store.lock().await;
                    match store.apply_remote(response.entries, &response.deleted_ids) {
                        Ok(applied) => applied,
                        Err(error) => {
                            tracing::warn!("Failed to persist merged snapshot: {error}");
                            self.record_failure(&error.to_string());
                            return 0;
                        }
                    }
                };

                self.consecutive_failures.store(0, Ordering::SeqCst);
                {
                    let mut state = self.poll_state.lock().unwrap_or_else(|e| e.into_inner());
                    state.last_poll = Some(unix_millis_now());
                    state.device_count = response.device_count;
                    state.highest_bib = response.highest_bib;
                }
                self.set_status(ConnectionStatus::Connected);

                if applied > 0 {
                    tracing::info!("Applied {applied} remote entries for race {}", self.race_id);
                    self.events.publish(EngineEvent::Synced { applied });
                }
                applied
            }
            Err(TransportError::AuthExpired) => {
                self.enter_terminal(TerminalReason::AuthExpired);
                0
            }
            Err(error) => {
                // Connection-level failures read as offline; everything else
                // (5xx, malformed bodies) as a server-side error. Both retry.
                let status = if matches!(&error, TransportError::Http(_)) {
                    ConnectionStatus::Offline
                } else {
                    ConnectionStatus::Error
                };
                self.record_failure(&error.to_string());
                self.set_status(status);
                0
            }
        }
    }

    fn record_failure(&self, message: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            "Poll failed for race {} (consecutive failures: {failures}): {message}",
            self.race_id
        );
        self.events.publish(EngineEvent::SyncError {
            message: message.to_string(),
        });
    }

    /// Push entries recorded while fully offline.
    ///
    /// The outbox only captures sends that failed after it existed; entries
    /// created before any session was primed would otherwise never sync.
    async fn push_unsynced(&self) -> Result<usize> {
        let pending = {
            let store = self.store.lock().await;
            let queued: Vec<EntryId> = store
                .outbox()
                .iter()
                .filter_map(|item| match &item.write {
                    QueuedWrite::SendEntry { entry } => Some(entry.id),
                    QueuedWrite::DeleteEntry { .. } => None,
                })
                .collect();
            store
                .unsynced_own_entries()
                .into_iter()
                .filter(|entry| !queued.contains(&entry.id))
                .collect::<Vec<_>>()
        };

        let count = pending.len();
        for entry in pending {
            self.outbox.enqueue_or_send(entry).await?;
        }
        Ok(count)
    }

    async fn handle_local_message(&self, message: LocalMessage) {
        match message {
            LocalMessage::Entry(entry) => {
                let (duplicate, applied) = {
                    let mut store = self.store.lock().await;
                    let duplicate =
                        detect_cross_device_duplicate(store.entries(), &entry, &entry.device_id);
                    let applied = store.apply_entry(entry);
                    (duplicate, applied)
                };
                if let Err(error) = applied {
                    tracing::warn!("Failed to apply local broadcast entry: {error}");
                }
                if let Some(duplicate) = duplicate {
                    self.events.publish(EngineEvent::Duplicate(duplicate));
                }
            }
            LocalMessage::Presence(device) => {
                let mut roster = self.roster.lock().unwrap_or_else(|e| e.into_inner());
                roster.observe(device.clone());
                roster.evict_stale(unix_millis_now(), DEFAULT_STALE_CUTOFF_MS);
                drop(roster);
                self.events.publish(EngineEvent::Presence(device));
            }
        }
    }
}

/// One reconciliation session for one race.
pub struct SyncSession<T: RaceTransport> {
    inner: Arc<SessionInner<T>>,
    poll_task: Option<JoinHandle<()>>,
    queue_task: Option<JoinHandle<()>>,
    local_task: Option<JoinHandle<()>>,
    presence_task: Option<JoinHandle<()>>,
}

impl<T: RaceTransport> SyncSession<T> {
    /// Build a session without starting its background tasks.
    ///
    /// Call [`Self::spawn`] to start the timers, or drive it manually with
    /// [`Self::force_refresh`]/[`Self::process_outbox`] (tests, one-shot CLI
    /// runs).
    pub async fn new(
        race_id: impl Into<String>,
        store: Arc<Mutex<RaceStore>>,
        transport: Arc<T>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        let race_id = race_id.into();
        if race_id.trim().is_empty() {
            return Err(Error::InvalidInput("race id cannot be empty".to_string()));
        }

        {
            let mut guard = store.lock().await;
            guard.set_race_id(Some(race_id.clone()))?;
        }

        let events = EventBus::default();
        let outbox = Outbox::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            events.clone(),
            config.outbox.clone(),
        );

        let inner = Arc::new(SessionInner {
            race_id,
            store,
            transport,
            outbox,
            events,
            local: LocalPresenceChannel::default(),
            roster: std::sync::Mutex::new(DeviceRoster::new()),
            poll_state: std::sync::Mutex::new(PollState {
                status: ConnectionStatus::Disconnected,
                last_poll: None,
                device_count: 0,
                highest_bib: 0,
            }),
            consecutive_failures: AtomicU32::new(0),
            poll_in_flight: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            tasks: std::sync::Mutex::new(Vec::new()),
            config,
        });

        Ok(Self {
            inner,
            poll_task: None,
            queue_task: None,
            local_task: None,
            presence_task: None,
        })
    }

    /// Start the poll timer, the outbox timer, the presence heartbeat, and
    /// the local listener.
    ///
    /// The first poll is preceded by the offline catch-up push. At most one
    /// of each task exists per session.
    pub fn spawn(&mut self) {
        if self.poll_task.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.poll_task = Some(tokio::spawn(async move {
            if let Err(error) = inner.push_unsynced().await {
                if let Error::Transport(TransportError::AuthExpired) = error {
                    inner.enter_terminal(TerminalReason::AuthExpired);
                } else {
                    tracing::warn!("Offline catch-up push failed: {error}");
                }
            }
            while !inner.is_terminal() {
                inner.poll_once().await;
                tokio::time::sleep(inner.poll_interval()).await;
            }
        }));

        let inner = Arc::clone(&self.inner);
        self.queue_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.outbox.process_interval);
            while !inner.is_terminal() {
                ticker.tick().await;
                match inner.outbox.process_pending().await {
                    Ok(_) => {}
                    Err(Error::Transport(TransportError::AuthExpired)) => {
                        inner.enter_terminal(TerminalReason::AuthExpired);
                    }
                    Err(error) => {
                        tracing::warn!("Outbox pass failed: {error}");
                    }
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut receiver = self.inner.local.subscribe();
        self.local_task = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => inner.handle_local_message(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Local channel lagged, skipped {skipped} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Announce this device on the same channel it listens on, so peer
        // sessions (and this one's roster) see it as live.
        let inner = Arc::clone(&self.inner);
        self.presence_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
            while !inner.is_terminal() {
                ticker.tick().await;
                let device = {
                    let store = inner.store.lock().await;
                    store.device().clone()
                };
                inner.local.publish_presence(DeviceInfo {
                    id: device.id,
                    name: device.name,
                    last_seen: unix_millis_now(),
                });
            }
        }));

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in [
            &self.poll_task,
            &self.queue_task,
            &self.local_task,
            &self.presence_task,
        ]
        .into_iter()
        .flatten()
        {
            tasks.push(task.abort_handle());
        }
    }

    // -----------------------------------------------------------------
    // UI-facing surface
    // -----------------------------------------------------------------

    /// Subscribe to status/sync/terminal events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Handle for same-device broadcast (the cross-tab analog).
    #[must_use]
    pub fn local_channel(&self) -> &LocalPresenceChannel {
        &self.inner.local
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner
            .poll_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .status
    }

    /// Last successful poll (Unix ms).
    #[must_use]
    pub fn last_poll(&self) -> Option<i64> {
        self.inner
            .poll_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_poll
    }

    /// Device count reported by the server on the last poll.
    #[must_use]
    pub fn device_count(&self) -> u32 {
        self.inner
            .poll_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .device_count
    }

    /// Highest bib seen server-side, for collaborator bib auto-increment.
    #[must_use]
    pub fn highest_bib(&self) -> u32 {
        self.inner
            .poll_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .highest_bib
    }

    /// Outbox length, for diagnostics.
    pub async fn queue_len(&self) -> usize {
        self.inner.outbox.len().await
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.is_terminal()
    }

    /// Pause or resume outbox processing without dropping queued items.
    pub fn set_sync_enabled(&self, enabled: bool) {
        self.inner.outbox.set_enabled(enabled);
    }

    /// Run one poll immediately, outside the timer cadence.
    pub async fn force_refresh(&self) -> usize {
        self.inner.poll_once().await
    }

    /// Run one outbox pass immediately, outside the timer cadence.
    pub async fn process_outbox(&self) -> Result<usize> {
        self.inner.outbox.process_pending().await
    }

    /// Push locally recorded entries that never reached the server.
    pub async fn push_unsynced(&self) -> Result<usize> {
        self.inner.push_unsynced().await
    }

    /// Record a UI-originated entry: append locally, broadcast on the local
    /// channel, hand to the outbox. Returns the advisory duplicate match,
    /// if any; the write itself always goes through.
    pub async fn record_entry(
        &self,
        bib: &str,
        point: TimingPoint,
        run: Option<u32>,
    ) -> Result<Option<CrossDeviceDuplicate>> {
        let (entry, duplicate) = {
            let mut store = self.inner.store.lock().await;
            let device = store.device().clone();
            let entry = TimedEntry::new(bib, point, run, device.id.clone(), device.name)?;
            let duplicate = detect_cross_device_duplicate(store.entries(), &entry, &device.id);
            store.record_entry(entry.clone())?;
            (entry, duplicate)
        };

        self.inner.local.publish_entry(entry.clone());
        if let Some(duplicate) = &duplicate {
            self.inner
                .events
                .publish(EngineEvent::Duplicate(duplicate.clone()));
        }

        match self.inner.outbox.enqueue_or_send(entry).await {
            Ok(_) => {}
            Err(Error::Transport(TransportError::AuthExpired)) => {
                self.inner.enter_terminal(TerminalReason::AuthExpired);
            }
            Err(error) => return Err(error),
        }
        Ok(duplicate)
    }

    /// Delete an entry locally and propagate the tombstone.
    ///
    /// A tombstone that cannot be delivered right away is queued and retried
    /// with the same backoff as entry sends; until it lands, polls never
    /// re-apply the server's copy of the deleted id.
    pub async fn delete_entry(&self, id: &EntryId) -> Result<()> {
        let device_id = {
            let mut store = self.inner.store.lock().await;
            store.remove_entry(id)?;
            store.device().id.clone()
        };

        match self.inner.outbox.enqueue_or_delete(*id, &device_id).await {
            Ok(_) => Ok(()),
            Err(Error::Transport(TransportError::AuthExpired)) => {
                self.inner.enter_terminal(TerminalReason::AuthExpired);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Currently live devices seen over the presence channel.
    #[must_use]
    pub fn active_devices(&self) -> Vec<DeviceInfo> {
        self.inner
            .roster
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Tear the session down: stop the timers, the heartbeat, and the local
    /// listener, reset the failure counter, and mark the session
    /// disconnected. Idempotent.
    pub fn cleanup(&mut self) {
        for task in [
            self.poll_task.take(),
            self.queue_task.take(),
            self.local_task.take(),
            self.presence_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        self.inner.set_status(ConnectionStatus::Disconnected);
    }
}

impl<T: RaceTransport> Drop for SyncSession<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
