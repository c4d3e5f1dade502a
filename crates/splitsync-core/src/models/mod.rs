//! Data models for splitsync

mod device;
mod entry;
mod fault;
mod outbox_item;

pub use device::DeviceInfo;
pub use entry::{normalize_bib, EntryId, EntryMedia, EntryStatus, TimedEntry, TimingPoint};
pub use fault::{
    ChangeType, DeletionMark, FaultEntry, FaultId, FaultSnapshot, FaultType, FaultVersion,
    GateRange,
};
pub use outbox_item::{QueuedWrite, SyncQueueItem};
