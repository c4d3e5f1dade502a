//! Sync outbox item model

use serde::{Deserialize, Serialize};

use crate::models::{EntryId, TimedEntry};

/// The write a queue item must deliver to the race server.
///
/// Deletions ride the queue alongside entry sends: a tombstone that fails
/// to reach the server is retried exactly like an unconfirmed entry, so a
/// delete made offline still propagates once connectivity returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueuedWrite {
    /// Deliver (or redeliver) an entry. The queued copy is a fallback;
    /// the processor sends the live store copy at delivery time.
    #[serde(rename_all = "camelCase")]
    SendEntry { entry: TimedEntry },
    /// Propagate a deletion tombstone
    #[serde(rename_all = "camelCase")]
    DeleteEntry { entry_id: EntryId, device_id: String },
}

impl QueuedWrite {
    /// Id of the entry this write concerns.
    #[must_use]
    pub const fn entry_id(&self) -> EntryId {
        match self {
            Self::SendEntry { entry } => entry.id,
            Self::DeleteEntry { entry_id, .. } => *entry_id,
        }
    }

    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteEntry { .. })
    }

    /// The tombstoned id, when this write is a deletion.
    #[must_use]
    pub const fn delete_target(&self) -> Option<EntryId> {
        match self {
            Self::DeleteEntry { entry_id, .. } => Some(*entry_id),
            Self::SendEntry { .. } => None,
        }
    }
}

/// One not-yet-confirmed write waiting for redelivery.
///
/// The underlying record always stays in the local store; dropping an item
/// at the retry ceiling abandons delivery, never data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// The write to (re)deliver
    pub write: QueuedWrite,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    /// Timestamp of the last attempt (Unix ms)
    pub last_attempt: i64,
    /// Error message from the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// Queue an entry after a failed immediate send.
    #[must_use]
    pub fn for_entry(entry: TimedEntry, last_error: Option<String>) -> Self {
        Self::new(QueuedWrite::SendEntry { entry }, last_error)
    }

    /// Queue a deletion tombstone after a failed immediate send.
    #[must_use]
    pub fn for_delete(
        entry_id: EntryId,
        device_id: impl Into<String>,
        last_error: Option<String>,
    ) -> Self {
        Self::new(
            QueuedWrite::DeleteEntry {
                entry_id,
                device_id: device_id.into(),
            },
            last_error,
        )
    }

    fn new(write: QueuedWrite, last_error: Option<String>) -> Self {
        Self {
            write,
            retry_count: 0,
            last_attempt: chrono::Utc::now().timestamp_millis(),
            last_error,
        }
    }

    /// Whether two items queue the same write (same entry, same kind).
    #[must_use]
    pub fn same_write(&self, other: &Self) -> bool {
        self.write.entry_id() == other.write.entry_id()
            && self.write.is_delete() == other.write.is_delete()
    }

    /// Whether this item is due for another attempt under exponential
    /// backoff: `now - last_attempt >= base * 2^retry_count`.
    #[must_use]
    pub fn is_due(&self, now: i64, backoff_base_ms: i64) -> bool {
        let delay = backoff_base_ms.saturating_mul(1_i64 << self.retry_count.min(30));
        now - self.last_attempt >= delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimingPoint;

    fn entry() -> TimedEntry {
        TimedEntry::new("1", TimingPoint::Start, None, "dev-a", "Timer A").unwrap()
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        let mut item = SyncQueueItem::for_entry(entry(), None);
        item.last_attempt = 0;

        assert!(item.is_due(2_000, 2_000));
        assert!(!item.is_due(1_999, 2_000));

        item.retry_count = 3;
        assert!(!item.is_due(15_999, 2_000));
        assert!(item.is_due(16_000, 2_000));
    }

    #[test]
    fn test_same_write_distinguishes_kinds() {
        let entry = entry();
        let send = SyncQueueItem::for_entry(entry.clone(), None);
        let delete = SyncQueueItem::for_delete(entry.id, "dev-a", None);

        assert!(send.same_write(&send.clone()));
        assert!(!send.same_write(&delete));
        assert_eq!(send.write.entry_id(), delete.write.entry_id());
        assert_eq!(delete.write.delete_target(), Some(entry.id));
        assert_eq!(send.write.delete_target(), None);
    }
}
