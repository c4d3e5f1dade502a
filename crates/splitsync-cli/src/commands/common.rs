use std::path::Path;

use serde::Serialize;
use splitsync_core::config::SyncProfile;
use splitsync_core::models::{EntryId, EntryStatus, FaultId, TimedEntry};
use splitsync_core::store::{DeviceIdentity, RaceStore};

use crate::error::CliError;

/// Open the local store, seeding a fresh device identity when none exists.
pub fn open_store(store_path: &Path, profile: Option<&SyncProfile>) -> Result<RaceStore, CliError> {
    let name = profile
        .map(|profile| profile.device_name.clone())
        .unwrap_or_else(|| "Unnamed device".to_string());
    let identity = DeviceIdentity {
        id: uuid::Uuid::now_v7().to_string(),
        name,
    };
    Ok(RaceStore::open(store_path, identity)?)
}

pub fn resolve_entry_id(store: &RaceStore, prefix: &str) -> Result<EntryId, CliError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(CliError::RecordNotFound(String::new()));
    }

    let matches: Vec<EntryId> = store
        .entries()
        .iter()
        .filter(|entry| entry.id.as_str().starts_with(prefix))
        .map(|entry| entry.id)
        .collect();

    match matches.as_slice() {
        [] => Err(CliError::RecordNotFound(prefix.to_string())),
        [id] => Ok(*id),
        _ => Err(CliError::AmbiguousId(format!(
            "entry id prefix '{prefix}' matches {} records",
            matches.len()
        ))),
    }
}

pub fn resolve_fault_id(store: &RaceStore, prefix: &str) -> Result<FaultId, CliError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(CliError::RecordNotFound(String::new()));
    }

    let matches: Vec<FaultId> = store
        .faults()
        .iter()
        .filter(|fault| fault.id.as_str().starts_with(prefix))
        .map(|fault| fault.id)
        .collect();

    match matches.as_slice() {
        [] => Err(CliError::RecordNotFound(prefix.to_string())),
        [id] => Ok(*id),
        _ => Err(CliError::AmbiguousId(format!(
            "fault id prefix '{prefix}' matches {} records",
            matches.len()
        ))),
    }
}

/// Human-friendly age of a Unix-ms timestamp.
pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let elapsed_ms = now_ms.saturating_sub(timestamp_ms);
    let minutes = elapsed_ms / 60_000;
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

pub const fn status_label(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::Ok => "ok",
        EntryStatus::DidNotStart => "dns",
        EntryStatus::DidNotFinish => "dnf",
        EntryStatus::Disqualified => "dsq",
        EntryStatus::FaultPenalty => "fault",
    }
}

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub bib: String,
    pub point: String,
    pub run: u32,
    pub status: String,
    pub device: String,
    pub timestamp: i64,
    pub relative_time: String,
    pub synced: bool,
}

impl EntryListItem {
    pub fn from_entry(entry: &TimedEntry, now_ms: i64) -> Self {
        Self {
            id: entry.id.as_str(),
            bib: entry.bib.clone(),
            point: entry.point.to_string(),
            run: entry.run,
            status: status_label(entry.status).to_string(),
            device: entry.device_name.clone(),
            timestamp: entry.timestamp,
            relative_time: format_relative_time(entry.timestamp, now_ms),
            synced: entry.is_synced(),
        }
    }
}
