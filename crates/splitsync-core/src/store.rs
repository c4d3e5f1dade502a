//! Local record store.
//!
//! The single mutation point for race records: direct local writes, remote
//! poll merges, and presence-channel entries all flow through the same
//! apply/merge operations so the duplicate and tombstone rules hold
//! regardless of origin.
//!
//! State is persisted as one schema-versioned JSON document (entries, fault
//! records, the sync outbox, device identity, selected race) so a process
//! restart resumes exactly where it left off, including still-queued writes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{EntryId, FaultEntry, FaultId, SyncQueueItem, TimedEntry};

const STORE_SCHEMA_VERSION: u32 = 1;

/// Stable identity of this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    schema_version: u32,
    device: DeviceIdentity,
    #[serde(default)]
    race_id: Option<String>,
    #[serde(default)]
    entries: Vec<TimedEntry>,
    #[serde(default)]
    faults: Vec<FaultEntry>,
    #[serde(default)]
    outbox: Vec<SyncQueueItem>,
}

impl StoreDocument {
    fn fresh(device: DeviceIdentity) -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            device,
            race_id: None,
            entries: Vec::new(),
            faults: Vec::new(),
            outbox: Vec::new(),
        }
    }
}

/// Persistent local store for one device's view of a race.
pub struct RaceStore {
    document: StoreDocument,
    path: Option<PathBuf>,
}

impl RaceStore {
    /// Open (or create) the store document at the given path.
    ///
    /// An unreadable or schema-incompatible document is quarantined with a
    /// timestamped rename and replaced by a fresh one; locally recorded data
    /// is never silently overwritten in place.
    pub fn open(path: impl Into<PathBuf>, device: DeviceIdentity) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let document = if path.exists() {
            match Self::load_document(&path) {
                Ok(document) => document,
                Err(error) => {
                    tracing::warn!(
                        "Unusable store document at {}: {}. Quarantining and starting fresh.",
                        path.display(),
                        error
                    );
                    Self::quarantine(&path)?;
                    StoreDocument::fresh(device)
                }
            }
        } else {
            StoreDocument::fresh(device)
        };

        let mut store = Self {
            document,
            path: Some(path),
        };
        store.persist()?;
        Ok(store)
    }

    /// Open an in-memory store (primarily for tests).
    #[must_use]
    pub fn in_memory(device: DeviceIdentity) -> Self {
        Self {
            document: StoreDocument::fresh(device),
            path: None,
        }
    }

    fn load_document(path: &Path) -> Result<StoreDocument> {
        let raw = std::fs::read_to_string(path)?;
        let document: StoreDocument = serde_json::from_str(&raw)?;
        if document.schema_version != STORE_SCHEMA_VERSION {
            return Err(Error::Store(format!(
                "unsupported store schema_version {} (expected {STORE_SCHEMA_VERSION})",
                document.schema_version
            )));
        }
        Ok(document)
    }

    fn quarantine(path: &Path) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let base_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("store.json");
        let backup = path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
        std::fs::rename(path, &backup)?;
        tracing::warn!(
            "Moved unusable store document from {} to {}",
            path.display(),
            backup.display()
        );
        Ok(())
    }

    /// Write the document to disk via a temp file + rename.
    fn persist(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(&self.document)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Identity and race selection
    // -----------------------------------------------------------------

    #[must_use]
    pub const fn device(&self) -> &DeviceIdentity {
        &self.document.device
    }

    pub fn set_device_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.document.device.name = name.into();
        self.persist()
    }

    #[must_use]
    pub fn race_id(&self) -> Option<&str> {
        self.document.race_id.as_deref()
    }

    pub fn set_race_id(&mut self, race_id: Option<String>) -> Result<()> {
        self.document.race_id = race_id;
        self.persist()
    }

    // -----------------------------------------------------------------
    // Timed entries
    // -----------------------------------------------------------------

    #[must_use]
    pub fn entries(&self) -> &[TimedEntry] {
        &self.document.entries
    }

    #[must_use]
    pub fn entry(&self, id: &EntryId) -> Option<&TimedEntry> {
        self.document.entries.iter().find(|entry| entry.id == *id)
    }

    /// Append a locally recorded entry.
    pub fn record_entry(&mut self, entry: TimedEntry) -> Result<()> {
        self.document.entries.push(entry);
        self.persist()
    }

    /// Replace an existing entry after a local edit.
    pub fn update_entry(&mut self, entry: TimedEntry) -> Result<()> {
        let slot = self
            .document
            .entries
            .iter_mut()
            .find(|existing| existing.id == entry.id)
            .ok_or_else(|| Error::NotFound(entry.id.to_string()))?;
        *slot = entry;
        self.persist()
    }

    /// Remove an entry. Returns the removed record so the caller can emit
    /// the matching remote tombstone.
    pub fn remove_entry(&mut self, id: &EntryId) -> Result<TimedEntry> {
        let position = self
            .document
            .entries
            .iter()
            .position(|entry| entry.id == *id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let removed = self.document.entries.remove(position);
        self.persist()?;
        Ok(removed)
    }

    /// Record the remote acknowledgement for a delivered entry.
    pub fn mark_entry_synced(&mut self, id: &EntryId, synced_at: i64) -> Result<()> {
        if let Some(entry) = self
            .document
            .entries
            .iter_mut()
            .find(|entry| entry.id == *id)
        {
            entry.synced_at = Some(synced_at);
        }
        self.persist()
    }

    /// Entries this device recorded that were never acknowledged remotely.
    ///
    /// These are pushed when a reconciler session starts, catching up
    /// anything recorded while fully offline.
    #[must_use]
    pub fn unsynced_own_entries(&self) -> Vec<TimedEntry> {
        let device_id = &self.document.device.id;
        self.document
            .entries
            .iter()
            .filter(|entry| entry.device_id == *device_id && entry.synced_at.is_none())
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------
    // Merge entry point
    // -----------------------------------------------------------------

    /// Apply a single entry from any origin (remote poll, presence channel).
    ///
    /// Idempotent last-write-wins by id: unknown ids are inserted, known ids
    /// replaced only when the incoming `updated_at` is strictly newer.
    /// Returns whether the store changed.
    pub fn apply_entry(&mut self, incoming: TimedEntry) -> Result<bool> {
        let applied = self.apply_entry_in_memory(incoming);
        if applied {
            self.persist()?;
        }
        Ok(applied)
    }

    fn apply_entry_in_memory(&mut self, incoming: TimedEntry) -> bool {
        match self
            .document
            .entries
            .iter_mut()
            .find(|existing| existing.id == incoming.id)
        {
            Some(existing) => {
                if incoming.updated_at > existing.updated_at {
                    *existing = incoming;
                    true
                } else {
                    false
                }
            }
            None => {
                self.document.entries.push(incoming);
                true
            }
        }
    }

    /// Merge a remote snapshot: apply new/newer entries, then honor deletion
    /// tombstones. Tombstones win regardless of ordering within the same
    /// response, and an id with a locally queued tombstone is never
    /// re-applied from the server (the delete was made here and is still in
    /// flight). Returns the count of newly applied entries.
    pub fn apply_remote(
        &mut self,
        entries: Vec<TimedEntry>,
        deleted_ids: &[String],
    ) -> Result<usize> {
        let tombstones: HashSet<&str> = deleted_ids.iter().map(String::as_str).collect();
        let pending_deletes: HashSet<EntryId> = self
            .document
            .outbox
            .iter()
            .filter_map(|item| item.write.delete_target())
            .collect();

        let mut applied = 0;
        for entry in entries {
            if tombstones.contains(entry.id.as_str().as_str())
                || pending_deletes.contains(&entry.id)
            {
                continue;
            }
            if self.apply_entry_in_memory(entry) {
                applied += 1;
            }
        }

        self.document
            .entries
            .retain(|entry| !tombstones.contains(entry.id.as_str().as_str()));

        self.persist()?;
        Ok(applied)
    }

    // -----------------------------------------------------------------
    // Fault records
    // -----------------------------------------------------------------

    #[must_use]
    pub fn faults(&self) -> &[FaultEntry] {
        &self.document.faults
    }

    #[must_use]
    pub fn fault(&self, id: &FaultId) -> Option<&FaultEntry> {
        self.document.faults.iter().find(|fault| fault.id == *id)
    }

    pub fn record_fault(&mut self, fault: FaultEntry) -> Result<()> {
        self.document.faults.push(fault);
        self.persist()
    }

    /// Replace an existing fault after an edit/restore/mark transition.
    pub fn update_fault(&mut self, fault: FaultEntry) -> Result<()> {
        let slot = self
            .document
            .faults
            .iter_mut()
            .find(|existing| existing.id == fault.id)
            .ok_or_else(|| Error::NotFound(fault.id.to_string()))?;
        *slot = fault;
        self.persist()
    }

    /// Hard-delete a fault (after out-of-scope chief-judge approval).
    pub fn remove_fault(&mut self, id: &FaultId) -> Result<FaultEntry> {
        let position = self
            .document
            .faults
            .iter()
            .position(|fault| fault.id == *id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let removed = self.document.faults.remove(position);
        self.persist()?;
        Ok(removed)
    }

    // -----------------------------------------------------------------
    // Sync outbox
    // -----------------------------------------------------------------

    #[must_use]
    pub fn outbox(&self) -> &[SyncQueueItem] {
        &self.document.outbox
    }

    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.document.outbox.len()
    }

    pub fn push_outbox(&mut self, item: SyncQueueItem) -> Result<()> {
        self.document.outbox.push(item);
        self.persist()
    }

    /// Replace the whole outbox after a processing pass.
    pub fn set_outbox(&mut self, outbox: Vec<SyncQueueItem>) -> Result<()> {
        self.document.outbox = outbox;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimingPoint;
    use pretty_assertions::assert_eq;

    fn device() -> DeviceIdentity {
        DeviceIdentity {
            id: "dev-a".to_string(),
            name: "Timer A".to_string(),
        }
    }

    fn entry_from(device_id: &str, bib: &str) -> TimedEntry {
        TimedEntry::new(bib, TimingPoint::Finish, None, device_id, device_id).unwrap()
    }

    #[test]
    fn test_apply_entry_is_idempotent() {
        let mut store = RaceStore::in_memory(device());
        let entry = entry_from("dev-b", "042");

        assert!(store.apply_entry(entry.clone()).unwrap());
        assert!(!store.apply_entry(entry).unwrap());
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_apply_entry_last_write_wins() {
        let mut store = RaceStore::in_memory(device());
        let mut entry = entry_from("dev-b", "042");
        store.apply_entry(entry.clone()).unwrap();

        // Older copy never replaces a newer one.
        let mut stale = entry.clone();
        stale.updated_at -= 10;
        stale.bib = "099".to_string();
        assert!(!store.apply_entry(stale).unwrap());
        assert_eq!(store.entries()[0].bib, "042");

        entry.updated_at += 10;
        entry.bib = "043".to_string();
        assert!(store.apply_entry(entry).unwrap());
        assert_eq!(store.entries()[0].bib, "043");
    }

    #[test]
    fn test_tombstone_wins_regardless_of_order() {
        let mut store = RaceStore::in_memory(device());
        let doomed = entry_from("dev-b", "007");
        let kept = entry_from("dev-b", "008");
        store.apply_entry(doomed.clone()).unwrap();

        let applied = store
            .apply_remote(
                vec![doomed.clone(), kept.clone()],
                &[doomed.id.as_str()],
            )
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()[0].id, kept.id);
    }

    #[test]
    fn test_apply_remote_twice_yields_same_state() {
        let mut store = RaceStore::in_memory(device());
        let a = entry_from("dev-b", "001");
        let b = entry_from("dev-c", "002");
        let tombstoned = entry_from("dev-b", "003");
        store.record_entry(tombstoned.clone()).unwrap();

        let snapshot = vec![a.clone(), b.clone()];
        let deleted = vec![tombstoned.id.as_str()];

        let first = store.apply_remote(snapshot.clone(), &deleted).unwrap();
        let after_first: Vec<EntryId> = store.entries().iter().map(|e| e.id).collect();

        let second = store.apply_remote(snapshot, &deleted).unwrap();
        let after_second: Vec<EntryId> = store.entries().iter().map(|e| e.id).collect();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_unsynced_own_entries_excludes_foreign_and_acknowledged() {
        let mut store = RaceStore::in_memory(device());
        let own_pending = entry_from("dev-a", "010");
        let mut own_synced = entry_from("dev-a", "011");
        own_synced.synced_at = Some(1);
        let foreign = entry_from("dev-b", "012");

        store.record_entry(own_pending.clone()).unwrap();
        store.record_entry(own_synced).unwrap();
        store.apply_entry(foreign).unwrap();

        let pending = store.unsynced_own_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, own_pending.id);
    }

    #[test]
    fn test_document_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.json");

        {
            let mut store = RaceStore::open(&path, device()).unwrap();
            store.set_race_id(Some("race-9".to_string())).unwrap();
            store.record_entry(entry_from("dev-a", "042")).unwrap();
            store
                .push_outbox(SyncQueueItem::for_entry(entry_from("dev-a", "043"), None))
                .unwrap();
        }

        let store = RaceStore::open(&path, device()).unwrap();
        assert_eq!(store.race_id(), Some("race-9"));
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.outbox_len(), 1);
    }

    #[test]
    fn test_corrupt_document_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = RaceStore::open(&path, device()).unwrap();
        assert!(store.entries().is_empty());

        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("race.json.corrupt-")
            });
        assert!(quarantined);
    }

    #[test]
    fn test_apply_remote_skips_ids_with_queued_tombstone() {
        let mut store = RaceStore::in_memory(device());
        let deleted = entry_from("dev-a", "042");
        let kept = entry_from("dev-b", "050");
        store.record_entry(deleted.clone()).unwrap();
        store.remove_entry(&deleted.id).unwrap();
        store
            .push_outbox(SyncQueueItem::for_delete(deleted.id, "dev-a", None))
            .unwrap();

        // The server has not seen the delete yet and still returns the entry.
        let applied = store.apply_remote(vec![deleted.clone(), kept], &[]).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(store.entries().len(), 1);
        assert!(store.entry(&deleted.id).is_none());
    }

    #[test]
    fn test_remove_entry_returns_record_for_tombstoning() {
        let mut store = RaceStore::in_memory(device());
        let entry = entry_from("dev-a", "021");
        store.record_entry(entry.clone()).unwrap();

        let removed = store.remove_entry(&entry.id).unwrap();
        assert_eq!(removed.id, entry.id);
        assert!(store.entries().is_empty());
        assert!(store.remove_entry(&entry.id).is_err());
    }
}
