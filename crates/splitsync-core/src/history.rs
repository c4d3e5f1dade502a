//! Version history tracking for fault records
//!
//! Every substantive mutation appends a new version; history is append-only
//! and the version counter only moves forward. Restoring an old version
//! re-applies its snapshot as a brand new version, so full provenance is
//! always retained.

use crate::error::{Error, Result};
use crate::models::{ChangeType, FaultEntry, FaultVersion};

/// Record the fault's current field values as the next version.
///
/// Call after mutating the substantive fields (bib, gate, fault type, run,
/// notes). Increments `current_version` and appends the matching history
/// entry.
pub fn append_version(
    fault: &mut FaultEntry,
    change_type: ChangeType,
    edited_by: impl Into<String>,
    edited_by_device_id: impl Into<String>,
    change_description: Option<String>,
) -> u32 {
    let version = fault.current_version + 1;
    fault.current_version = version;
    fault.version_history.push(FaultVersion {
        version,
        timestamp: chrono::Utc::now().timestamp_millis(),
        edited_by: edited_by.into(),
        edited_by_device_id: edited_by_device_id.into(),
        change_type,
        change_description,
        snapshot: fault.snapshot(),
    });
    version
}

/// Restore the fault's fields to those of `target_version`.
///
/// The restore itself becomes a new version with `ChangeType::Restore`;
/// nothing in the history is deleted or renumbered. Restoring the current
/// version is rejected, as is an unknown target.
pub fn restore_version(
    fault: &mut FaultEntry,
    target_version: u32,
    edited_by: impl Into<String>,
    edited_by_device_id: impl Into<String>,
) -> Result<u32> {
    if target_version == fault.current_version {
        return Err(Error::InvalidInput(format!(
            "version {target_version} is already current"
        )));
    }

    let snapshot = fault
        .version_history
        .iter()
        .find(|entry| entry.version == target_version)
        .map(|entry| entry.snapshot.clone())
        .ok_or_else(|| Error::NotFound(format!("fault version {target_version}")))?;

    fault.bib = snapshot.bib;
    fault.gate = snapshot.gate;
    fault.fault_type = snapshot.fault_type;
    fault.run = snapshot.run;
    fault.notes = snapshot.notes;

    Ok(append_version(
        fault,
        ChangeType::Restore,
        edited_by,
        edited_by_device_id,
        Some(format!("restored version {target_version}")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaultType, GateRange};
    use pretty_assertions::assert_eq;

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
    fn test_append_version_increments_and_snapshots() {
        let mut fault = sample();
        fault.gate = 9;
        let version = append_version(
            &mut fault,
            ChangeType::Edit,
            "Judge 1",
            "dev-j",
            Some("corrected gate".to_string()),
        );

        assert_eq!(version, 2);
        assert_eq!(fault.current_version, 2);
        assert_eq!(fault.version_history.len(), 2);
        let latest = fault.version_history.last().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.change_type, ChangeType::Edit);
        assert_eq!(latest.snapshot.gate, 9);
    }

    #[test]
    fn test_restore_applies_snapshot_as_new_version() {
        let mut fault = sample();
        fault.gate = 9;
        fault.fault_type = FaultType::Straddle;
        append_version(&mut fault, ChangeType::Edit, "Judge 1", "dev-j", None);

        let version = restore_version(&mut fault, 1, "Judge 1", "dev-j").unwrap();

        assert_eq!(version, 3);
        assert_eq!(fault.current_version, 3);
        assert_eq!(fault.gate, 7);
        assert_eq!(fault.fault_type, FaultType::MissedGate);
        assert_eq!(fault.version_history.len(), 3);
        let latest = fault.version_history.last().unwrap();
        assert_eq!(latest.change_type, ChangeType::Restore);
        assert!(latest
            .change_description
            .as_deref()
            .unwrap()
            .contains("version 1"));
    }

    #[test]
    fn test_restore_current_version_is_rejected() {
        let mut fault = sample();
        let err = restore_version(&mut fault, 1, "Judge 1", "dev-j").unwrap_err();
        assert!(err.to_string().contains("already current"));
        assert_eq!(fault.current_version, 1);
        assert_eq!(fault.version_history.len(), 1);
    }

    #[test]
    fn test_restore_unknown_version_is_rejected() {
        let mut fault = sample();
        fault.gate = 9;
        append_version(&mut fault, ChangeType::Edit, "Judge 1", "dev-j", None);

        assert!(restore_version(&mut fault, 99, "Judge 1", "dev-j").is_err());
        assert_eq!(fault.current_version, 2);
    }

    #[test]
    fn test_versions_strictly_increase_across_restores() {
        let mut fault = sample();
        fault.notes = Some("first edit".to_string());
        append_version(&mut fault, ChangeType::Edit, "Judge 1", "dev-j", None);
        restore_version(&mut fault, 1, "Judge 1", "dev-j").unwrap();
        restore_version(&mut fault, 2, "Judge 1", "dev-j").unwrap();

        let versions: Vec<u32> = fault.version_history.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(fault.notes.as_deref(), Some("first edit"));
    }
}
