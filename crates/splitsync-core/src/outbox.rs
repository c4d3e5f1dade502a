//! Sync outbox: at-least-once delivery of local writes.
//!
//! Failed sends land in a persistent queue and are retried with exponential
//! backoff up to a fixed ceiling. Exhausting the ceiling drops the item from
//! the queue while the record stays in local storage unsynced, and the
//! operator is told about it; delivery is abandoned, data never is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::models::{EntryId, QueuedWrite, SyncQueueItem, TimedEntry};
use crate::store::RaceStore;
use crate::transport::RaceTransport;
use crate::util::unix_millis_now;

/// Outbox cadence and limits
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Failed attempts from the queue before the item is dropped
    pub retry_ceiling: u32,
    /// Exponential backoff base: delay is `base * 2^retry_count`
    pub backoff_base: Duration,
    /// How often the background processor wakes
    pub process_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 5,
            backoff_base: Duration::from_secs(2),
            process_interval: Duration::from_secs(10),
        }
    }
}

/// What happened to an entry handed to [`Outbox::enqueue_or_send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Delivered and acknowledged immediately
    Delivered,
    /// Queued for background redelivery
    Queued,
}

/// Retryable outbox over the shared store.
pub struct Outbox<T: RaceTransport> {
    store: Arc<Mutex<RaceStore>>,
    transport: Arc<T>,
    events: EventBus,
    config: OutboxConfig,
    /// Guards against overlapping processing passes double-sending an item
    in_flight: AtomicBool,
    /// Administrative pause: queued items are kept, not drained
    enabled: AtomicBool,
}

impl<T: RaceTransport> Outbox<T> {
    pub fn new(
        store: Arc<Mutex<RaceStore>>,
        transport: Arc<T>,
        events: EventBus,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            config,
            in_flight: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    /// Pause or resume background processing. Pausing never drops items.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current queue length, for diagnostics.
    pub async fn len(&self) -> usize {
        self.store.lock().await.outbox_len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Attempt immediate delivery; queue the entry on transient failure.
    ///
    /// Non-transient failures (credential expiry) propagate to the caller
    /// instead of being queued, since redelivery could never succeed.
    pub async fn enqueue_or_send(&self, entry: TimedEntry) -> Result<SendDisposition> {
        let race_id = {
            let store = self.store.lock().await;
            store
                .race_id()
                .map(ToString::to_string)
                .ok_or_else(|| Error::InvalidInput("no race selected".to_string()))?
        };

        match self.transport.send_entry(&race_id, &entry).await {
            Ok(outcome) => {
                if outcome.photo_skipped {
                    tracing::debug!("Server skipped photo payload for entry {}", entry.id);
                }
                let mut store = self.store.lock().await;
                store.mark_entry_synced(&entry.id, unix_millis_now())?;
                Ok(SendDisposition::Delivered)
            }
            Err(error) if error.is_transient() => {
                tracing::debug!("Immediate send failed, queuing entry {}: {error}", entry.id);
                let mut store = self.store.lock().await;
                store.push_outbox(SyncQueueItem::for_entry(entry, Some(error.to_string())))?;
                Ok(SendDisposition::Queued)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Attempt immediate tombstone delivery; queue it on transient failure.
    ///
    /// A queued tombstone rides the same backoff path as a queued entry, so
    /// a delete made offline still propagates once connectivity returns.
    pub async fn enqueue_or_delete(
        &self,
        entry_id: EntryId,
        device_id: &str,
    ) -> Result<SendDisposition> {
        let race_id = {
            let store = self.store.lock().await;
            store
                .race_id()
                .map(ToString::to_string)
                .ok_or_else(|| Error::InvalidInput("no race selected".to_string()))?
        };

        match self
            .transport
            .delete_entry(&race_id, &entry_id.as_str(), device_id)
            .await
        {
            Ok(()) => Ok(SendDisposition::Delivered),
            Err(error) if error.is_transient() => {
                tracing::debug!("Tombstone send failed, queuing delete for {entry_id}: {error}");
                let mut store = self.store.lock().await;
                store.push_outbox(SyncQueueItem::for_delete(
                    entry_id,
                    device_id,
                    Some(error.to_string()),
                ))?;
                Ok(SendDisposition::Queued)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Run one redelivery pass over due items. Returns the delivered count.
    ///
    /// Skips silently when disabled, when no race is selected, or when a
    /// pass is already in flight.
    pub async fn process_pending(&self) -> Result<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let result = self.process_pass().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn process_pass(&self) -> Result<usize> {
        let backoff_base_ms = i64::try_from(self.config.backoff_base.as_millis()).unwrap_or(2_000);
        let now = unix_millis_now();

        let (race_id, due) = {
            let store = self.store.lock().await;
            let Some(race_id) = store.race_id().map(ToString::to_string) else {
                return Ok(0);
            };
            let due: Vec<SyncQueueItem> = store
                .outbox()
                .iter()
                .filter(|item| item.is_due(now, backoff_base_ms))
                .cloned()
                .collect();
            (race_id, due)
        };

        let mut delivered = 0;
        for item in due {
            match &item.write {
                QueuedWrite::SendEntry { entry } => {
                    // Redeliver the live store copy, not the snapshot frozen
                    // at queue time: the record may have been edited since.
                    let live = { self.store.lock().await.entry(&entry.id).cloned() };
                    let Some(live) = live else {
                        // Deleted locally while queued; the tombstone item
                        // handles propagation.
                        self.remove_item(&item).await?;
                        continue;
                    };
                    match self.transport.send_entry(&race_id, &live).await {
                        Ok(_) => {
                            let mut store = self.store.lock().await;
                            let edited_again = store
                                .entry(&live.id)
                                .is_some_and(|current| current.updated_at > live.updated_at);
                            if edited_again {
                                // Keep the item; the next pass sends the
                                // newer copy and only then marks it synced.
                                continue;
                            }
                            let outbox = store
                                .outbox()
                                .iter()
                                .filter(|queued| !queued.same_write(&item))
                                .cloned()
                                .collect();
                            store.set_outbox(outbox)?;
                            store.mark_entry_synced(&live.id, unix_millis_now())?;
                            delivered += 1;
                        }
                        Err(error) if error.is_transient() => {
                            self.record_failure(&item, &error.to_string()).await?;
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                QueuedWrite::DeleteEntry {
                    entry_id,
                    device_id,
                } => {
                    match self
                        .transport
                        .delete_entry(&race_id, &entry_id.as_str(), device_id)
                        .await
                    {
                        Ok(()) => {
                            self.remove_item(&item).await?;
                            delivered += 1;
                        }
                        Err(error) if error.is_transient() => {
                            self.record_failure(&item, &error.to_string()).await?;
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
            }
        }

        if delivered > 0 {
            tracing::debug!("Outbox pass delivered {delivered} queued writes");
        }
        Ok(delivered)
    }

    async fn remove_item(&self, item: &SyncQueueItem) -> Result<()> {
        let mut store = self.store.lock().await;
        let outbox = store
            .outbox()
            .iter()
            .filter(|queued| !queued.same_write(item))
            .cloned()
            .collect();
        store.set_outbox(outbox)
    }

    /// Bump the retry count for a failed item, dropping it at the ceiling.
    async fn record_failure(&self, item: &SyncQueueItem, message: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let mut exhausted = false;

        let outbox = store
            .outbox()
            .iter()
            .filter_map(|queued| {
                if !queued.same_write(item) {
                    return Some(queued.clone());
                }
                let mut updated = queued.clone();
                updated.retry_count += 1;
                updated.last_attempt = unix_millis_now();
                updated.last_error = Some(message.to_string());
                if updated.retry_count >= self.config.retry_ceiling {
                    exhausted = true;
                    None
                } else {
                    Some(updated)
                }
            })
            .collect();
        store.set_outbox(outbox)?;
        drop(store);

        if exhausted {
            tracing::warn!(
                "Dropping queued write for entry {} after {} failed attempts",
                item.write.entry_id(),
                self.config.retry_ceiling
            );
            let message = match &item.write {
                QueuedWrite::SendEntry { entry } => format!(
                    "entry for bib {} could not be delivered after {} attempts",
                    entry.bib, self.config.retry_ceiling
                ),
                QueuedWrite::DeleteEntry { entry_id, .. } => format!(
                    "deletion of entry {} could not be delivered after {} attempts",
                    entry_id, self.config.retry_ceiling
                ),
            };
            self.events.publish(EngineEvent::SyncError { message });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimingPoint;
    use crate::store::DeviceIdentity;
    use crate::test_support::ScriptedTransport;
    use crate::transport::TransportError;

    fn store_with_race() -> Arc<Mutex<RaceStore>> {
        let mut store = RaceStore::in_memory(DeviceIdentity {
            id: "dev-a".to_string(),
            name: "Timer A".to_string(),
        });
        store.set_race_id(Some("race-1".to_string())).unwrap();
        Arc::new(Mutex::new(store))
    }

    fn outbox(
        store: &Arc<Mutex<RaceStore>>,
        transport: &Arc<ScriptedTransport>,
        events: &EventBus,
    ) -> Outbox<ScriptedTransport> {
        Outbox::new(
            Arc::clone(store),
            Arc::clone(transport),
            events.clone(),
            OutboxConfig {
                // Zero base keeps every item immediately due in tests.
                backoff_base: Duration::from_millis(0),
                ..OutboxConfig::default()
            },
        )
    }

    fn entry() -> TimedEntry {
        TimedEntry::new("042", TimingPoint::Finish, None, "dev-a", "Timer A").unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn immediate_send_marks_entry_synced() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();

        let disposition = outbox.enqueue_or_send(entry.clone()).await.unwrap();
        assert_eq!(disposition, SendDisposition::Delivered);
        assert_eq!(outbox.len().await, 0);
        assert!(store.lock().await.entry(&entry.id).unwrap().is_synced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_send_queues_item_with_error() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::Api("HTTP 503".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();

        let disposition = outbox.enqueue_or_send(entry.clone()).await.unwrap();
        assert_eq!(disposition, SendDisposition::Queued);
        assert_eq!(outbox.len().await, 1);

        let store = store.lock().await;
        let queued = &store.outbox()[0];
        assert_eq!(queued.retry_count, 0);
        assert!(queued.last_error.as_deref().unwrap().contains("503"));
        assert!(!store.entry(&entry.id).unwrap().is_synced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_delivers_and_clears_queue() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::Api("HTTP 500".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        outbox.enqueue_or_send(entry.clone()).await.unwrap();

        let delivered = outbox.process_pending().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(outbox.len().await, 0);
        assert!(store.lock().await.entry(&entry.id).unwrap().is_synced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edited_entry_redelivers_current_copy_not_queued_snapshot() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::Api("HTTP 503".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        outbox.enqueue_or_send(entry.clone()).await.unwrap();

        // Edit the record while its first copy sits in the queue.
        {
            let mut store = store.lock().await;
            let mut edited = store.entry(&entry.id).unwrap().clone();
            edited.bib = "043".to_string();
            edited.touch();
            store.update_entry(edited).unwrap();
        }

        let delivered = outbox.process_pending().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(outbox.len().await, 0);

        let sent = transport.sent_entries.lock().unwrap().clone();
        assert_eq!(sent.last().unwrap().bib, "043");

        let store = store.lock().await;
        let current = store.entry(&entry.id).unwrap();
        assert_eq!(current.bib, "043");
        assert!(current.is_synced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_entry_for_locally_deleted_record_is_dropped_unsent() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::Api("HTTP 503".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        outbox.enqueue_or_send(entry.clone()).await.unwrap();
        store.lock().await.remove_entry(&entry.id).unwrap();

        assert_eq!(outbox.process_pending().await.unwrap(), 0);
        assert_eq!(outbox.len().await, 0);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_tombstone_queues_and_later_pass_delivers_it() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        store.lock().await.remove_entry(&entry.id).unwrap();

        transport.queue_delete(Err(TransportError::Api("HTTP 503".to_string())));
        let disposition = outbox.enqueue_or_delete(entry.id, "dev-a").await.unwrap();
        assert_eq!(disposition, SendDisposition::Queued);
        assert_eq!(outbox.len().await, 1);
        assert!(transport.deleted_entry_ids.lock().unwrap().is_empty());

        let delivered = outbox.process_pending().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(outbox.len().await, 0);
        let deleted = transport.deleted_entry_ids.lock().unwrap().clone();
        assert_eq!(deleted, vec![entry.id.as_str()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_ceiling_drops_item_and_reports_once() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let mut receiver = events.subscribe();
        let outbox = outbox(&store, &transport, &events);

        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        transport.queue_send(Err(TransportError::Api("down".to_string())));
        outbox.enqueue_or_send(entry.clone()).await.unwrap();

        for _ in 0..5 {
            transport.queue_send(Err(TransportError::Api("down".to_string())));
            outbox.process_pending().await.unwrap();
        }

        assert_eq!(outbox.len().await, 0);
        assert!(!store.lock().await.entry(&entry.id).unwrap().is_synced());

        let mut error_events = 0;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, EngineEvent::SyncError { .. }) {
                error_events += 1;
            }
        }
        assert_eq!(error_events, 1);

        // A further pass has nothing left to drop.
        assert_eq!(outbox.process_pending().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_outbox_keeps_items_untouched() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::Api("down".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        outbox.enqueue_or_send(entry).await.unwrap();

        outbox.set_enabled(false);
        assert_eq!(outbox.process_pending().await.unwrap(), 0);
        assert_eq!(outbox.len().await, 1);
        assert_eq!(transport.sent_count(), 0);

        outbox.set_enabled(true);
        assert_eq!(outbox.process_pending().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backoff_defers_items_that_are_not_due() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = Outbox::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            events.clone(),
            OutboxConfig::default(),
        );

        transport.queue_send(Err(TransportError::Api("down".to_string())));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();
        outbox.enqueue_or_send(entry).await.unwrap();

        // Item was just attempted; the 2s base backoff has not elapsed.
        assert_eq!(outbox.process_pending().await.unwrap(), 0);
        assert_eq!(outbox.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_expiry_propagates_instead_of_queueing() {
        let store = store_with_race();
        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::default();
        let outbox = outbox(&store, &transport, &events);

        transport.queue_send(Err(TransportError::AuthExpired));
        let entry = entry();
        store.lock().await.record_entry(entry.clone()).unwrap();

        assert!(outbox.enqueue_or_send(entry).await.is_err());
        assert_eq!(outbox.len().await, 0);
    }
}
