//! Timed entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a timed entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where on the course the observation was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingPoint {
    Start,
    Finish,
}

impl fmt::Display for TimingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Finish => write!(f, "finish"),
        }
    }
}

/// Result status attached to a timing observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    Ok,
    DidNotStart,
    DidNotFinish,
    Disqualified,
    FaultPenalty,
}

/// Optional photo/GPS payload captured alongside an entry.
///
/// Carried opaquely; the engine never inspects the photo bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMedia {
    /// Base64-encoded photo data, if a photo was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_data: Option<String>,
    /// GPS latitude at capture time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// GPS longitude at capture time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// One timing observation recorded on a device.
///
/// Identity is the id alone: ids are generated device-locally and never
/// derived from content, so two devices recording the same physical moment
/// always produce two distinct records. Catching that case is the duplicate
/// detector's job, not the model's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEntry {
    /// Unique identifier, assigned at creation and never reassigned
    pub id: EntryId,
    /// Bib number, zero-padded digits
    pub bib: String,
    /// Timing point where the observation was taken
    pub point: TimingPoint,
    /// Run number, >= 1
    pub run: u32,
    /// Observation timestamp (Unix ms)
    pub timestamp: i64,
    /// Last local modification timestamp (Unix ms), used for LWW merges
    pub updated_at: i64,
    /// Result status
    pub status: EntryStatus,
    /// Originating device id
    pub device_id: String,
    /// Originating device display name
    pub device_name: String,
    /// Set once the remote write is acknowledged; absent while unconfirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
    /// Optional photo/GPS payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<EntryMedia>,
}

impl TimedEntry {
    /// Create a new entry for the given bib and timing point.
    ///
    /// The bib is normalized to zero-padded digits; an empty or non-numeric
    /// bib is rejected. `run` defaults to 1 when `None`.
    pub fn new(
        bib: &str,
        point: TimingPoint,
        run: Option<u32>,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Result<Self> {
        let bib = normalize_bib(bib)?;
        let run = match run {
            Some(0) => return Err(Error::InvalidInput("run number must be >= 1".to_string())),
            Some(run) => run,
            None => 1,
        };
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: EntryId::new(),
            bib,
            point,
            run,
            timestamp: now,
            updated_at: now,
            status: EntryStatus::Ok,
            device_id: device_id.into(),
            device_name: device_name.into(),
            synced_at: None,
            media: None,
        })
    }

    /// Whether this entry has been acknowledged by the remote store.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }

    /// Bump `updated_at` after an edit and clear the sync acknowledgement.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.synced_at = None;
    }
}

/// Zero-pad a bib number to three digits.
///
/// Bibs wider than three digits are kept as-is. Rejects empty and
/// non-numeric input.
pub fn normalize_bib(bib: &str) -> Result<String> {
    let bib = bib.trim();
    if bib.is_empty() {
        return Err(Error::InvalidInput("bib number cannot be empty".to_string()));
    }
    if !bib.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "bib number must be digits only: {bib}"
        )));
    }
    Ok(format!("{bib:0>3}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_unique() {
        let id1 = EntryId::new();
        let id2 = EntryId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::new();
        let parsed: EntryId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entry_new_defaults_run_to_one() {
        let entry = TimedEntry::new("42", TimingPoint::Finish, None, "dev-a", "Timer A").unwrap();
        assert_eq!(entry.bib, "042");
        assert_eq!(entry.run, 1);
        assert_eq!(entry.status, EntryStatus::Ok);
        assert!(entry.synced_at.is_none());
        assert_eq!(entry.timestamp, entry.updated_at);
    }

    #[test]
    fn test_entry_new_rejects_empty_bib() {
        assert!(TimedEntry::new("  ", TimingPoint::Start, None, "dev-a", "Timer A").is_err());
    }

    #[test]
    fn test_entry_new_rejects_run_zero() {
        assert!(TimedEntry::new("7", TimingPoint::Start, Some(0), "dev-a", "Timer A").is_err());
    }

    #[test]
    fn test_touch_clears_sync_acknowledgement() {
        let mut entry =
            TimedEntry::new("7", TimingPoint::Start, None, "dev-a", "Timer A").unwrap();
        entry.synced_at = Some(entry.timestamp);
        entry.touch();
        assert!(entry.synced_at.is_none());
        assert!(entry.updated_at >= entry.timestamp);
    }

    #[test]
    fn test_normalize_bib() {
        assert_eq!(normalize_bib("7").unwrap(), "007");
        assert_eq!(normalize_bib("042").unwrap(), "042");
        assert_eq!(normalize_bib("1234").unwrap(), "1234");
        assert!(normalize_bib("").is_err());
        assert!(normalize_bib("4a").is_err());
    }

    #[test]
    fn test_serde_uses_camel_case_wire_names() {
        let entry = TimedEntry::new("42", TimingPoint::Finish, None, "dev-a", "Timer A").unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("deviceId").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json.get("point").unwrap(), "finish");
    }
}
