//! Gate fault model with versioned edit history

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::entry::normalize_bib;

/// A unique identifier for a fault record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultId(Uuid);

impl FaultId {
    /// Create a new unique fault ID using UUID v7
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

impl Default for FaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FaultId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of gate infraction observed by a judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultType {
    MissedGate,
    Straddle,
    BindingRelease,
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissedGate => write!(f, "missed-gate"),
            Self::Straddle => write!(f, "straddle"),
            Self::BindingRelease => write!(f, "binding-release"),
        }
    }
}

/// Inclusive range of gates assigned to a recording judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRange {
    pub from: u32,
    pub to: u32,
}

/// What kind of mutation produced a history version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Edit,
    Restore,
}

/// Snapshot of the substantive fault fields at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultSnapshot {
    pub bib: String,
    pub gate: u32,
    pub fault_type: FaultType,
    pub run: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One append-only entry in a fault's version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultVersion {
    /// Monotonically increasing version number
    pub version: u32,
    /// When this version was recorded (Unix ms)
    pub timestamp: i64,
    /// Display name of the editor
    pub edited_by: String,
    /// Device the edit was made on
    pub edited_by_device_id: String,
    /// Kind of mutation
    pub change_type: ChangeType,
    /// Free-text description of the delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
    /// Field values as of this version
    pub snapshot: FaultSnapshot,
}

/// Soft deletion state awaiting chief-judge approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionMark {
    /// Display name of whoever marked the record
    pub marked_by: String,
    /// Device the mark was made on
    pub marked_by_device_id: String,
    /// When the mark was made (Unix ms)
    pub marked_at: i64,
}

/// A penalty/infraction observation recorded by a gate judge.
///
/// Every substantive edit appends a `FaultVersion`; `current_version` always
/// matches the version number of the newest history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultEntry {
    pub id: FaultId,
    pub bib: String,
    pub run: u32,
    pub gate: u32,
    pub fault_type: FaultType,
    /// Observation timestamp (Unix ms)
    pub timestamp: i64,
    pub device_id: String,
    pub device_name: String,
    /// Gate range assigned to the recording judge
    pub judge_gates: GateRange,
    pub current_version: u32,
    /// Append-only, oldest first; callers sort for display
    pub version_history: Vec<FaultVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Soft state; hard deletion requires a second actor's approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_mark: Option<DeletionMark>,
}

impl FaultEntry {
    /// Create a new fault record, seeding version 1 with `ChangeType::Create`.
    pub fn new(
        bib: &str,
        gate: u32,
        fault_type: FaultType,
        run: Option<u32>,
        judge_gates: GateRange,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Result<Self> {
        let bib = normalize_bib(bib)?;
        let run = match run {
            Some(0) => return Err(Error::InvalidInput("run number must be >= 1".to_string())),
            Some(run) => run,
            None => 1,
        };
        let device_id = device_id.into();
        let device_name = device_name.into();
        let now = chrono::Utc::now().timestamp_millis();

        let snapshot = FaultSnapshot {
            bib: bib.clone(),
            gate,
            fault_type,
            run,
            notes: None,
        };
        Ok(Self {
            id: FaultId::new(),
            bib,
            run,
            gate,
            fault_type,
            timestamp: now,
            device_id: device_id.clone(),
            device_name: device_name.clone(),
            judge_gates,
            current_version: 1,
            version_history: vec![FaultVersion {
                version: 1,
                timestamp: now,
                edited_by: device_name,
                edited_by_device_id: device_id,
                change_type: ChangeType::Create,
                change_description: None,
                snapshot,
            }],
            notes: None,
            deletion_mark: None,
        })
    }

    /// Current field values as a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> FaultSnapshot {
        FaultSnapshot {
            bib: self.bib.clone(),
            gate: self.gate,
            fault_type: self.fault_type,
            run: self.run,
            notes: self.notes.clone(),
        }
    }

    /// Mark this fault for deletion. The hard delete happens elsewhere,
    /// after a chief judge approves.
    pub fn mark_for_deletion(&mut self, marked_by: impl Into<String>, device_id: impl Into<String>) {
        self.deletion_mark = Some(DeletionMark {
            marked_by: marked_by.into(),
            marked_by_device_id: device_id.into(),
            marked_at: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Withdraw a pending deletion mark.
    pub fn unmark_for_deletion(&mut self) {
        self.deletion_mark = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FaultEntry {
        FaultEntry::new(
            "15",
            7,
            FaultType::MissedGate,
            None,
            GateRange { from: 5, to: 12 },
            "dev-j",
            "Judge 1",
        )
        .unwrap()
    }

    #[test]
    fn test_new_seeds_create_version() {
        let fault = sample();
        assert_eq!(fault.bib, "015");
        assert_eq!(fault.current_version, 1);
        assert_eq!(fault.version_history.len(), 1);
        assert_eq!(fault.version_history[0].change_type, ChangeType::Create);
        assert_eq!(fault.version_history[0].snapshot.gate, 7);
    }

    #[test]
    fn test_mark_and_unmark_for_deletion() {
        let mut fault = sample();
        assert!(fault.deletion_mark.is_none());

        fault.mark_for_deletion("Chief", "dev-c");
        let mark = fault.deletion_mark.as_ref().unwrap();
        assert_eq!(mark.marked_by, "Chief");
        assert_eq!(mark.marked_by_device_id, "dev-c");

        fault.unmark_for_deletion();
        assert!(fault.deletion_mark.is_none());
    }

    #[test]
    fn test_snapshot_reflects_current_fields() {
        let mut fault = sample();
        fault.notes = Some("gate 7, inside ski".to_string());
        let snapshot = fault.snapshot();
        assert_eq!(snapshot.bib, "015");
        assert_eq!(snapshot.notes.as_deref(), Some("gate 7, inside ski"));
    }

    #[test]
    fn test_rejects_invalid_input() {
        let gates = GateRange { from: 1, to: 10 };
        assert!(FaultEntry::new("", 3, FaultType::Straddle, None, gates, "d", "J").is_err());
        assert!(FaultEntry::new("9", 3, FaultType::Straddle, Some(0), gates, "d", "J").is_err());
    }
}
