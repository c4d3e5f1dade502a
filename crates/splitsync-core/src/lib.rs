//! splitsync-core - Core library for splitsync
//!
//! This crate contains the shared models, local store, and the offline-first
//! sync engine (duplicate detection, version history, outbox, cloud
//! reconciler, local presence channel) used by all splitsync interfaces.

pub mod config;
pub mod duplicate;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod outbox;
pub mod presence;
pub mod reconciler;
pub mod store;
pub mod transport;
pub mod util;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use models::{EntryId, FaultEntry, FaultId, TimedEntry};
