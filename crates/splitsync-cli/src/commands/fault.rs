use std::path::Path;

use splitsync_core::history::{append_version, restore_version};
use splitsync_core::models::{ChangeType, FaultEntry, FaultType, GateRange};

use crate::commands::common::{format_relative_time, open_store, resolve_fault_id};
use crate::error::CliError;
use crate::profile::load_profile;

#[allow(clippy::too_many_arguments)]
pub fn run_fault(
    bib: &str,
    gate: u32,
    fault_type: FaultType,
    run: Option<u32>,
    gates_from: u32,
    gates_to: u32,
    notes: Option<String>,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let device = store.device().clone();
    let mut fault = FaultEntry::new(
        bib,
        gate,
        fault_type,
        run,
        GateRange {
            from: gates_from,
            to: gates_to,
        },
        device.id,
        device.name.clone(),
    )?;
    if let Some(notes) = notes {
        fault.notes = Some(notes);
        // The creation snapshot should carry the notes as entered.
        fault.version_history[0].snapshot.notes = fault.notes.clone();
    }

    store.record_fault(fault.clone())?;
    println!("{}", fault.id);
    Ok(())
}

pub fn run_history(id: &str, store_path: &Path, profile_path: &Path) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let store = open_store(store_path, profile.as_ref())?;

    let fault_id = resolve_fault_id(&store, id)?;
    let fault = store
        .fault(&fault_id)
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    println!(
        "fault {} bib {} gate {} ({}) - version {}",
        fault.id, fault.bib, fault.gate, fault.fault_type, fault.current_version
    );
    if let Some(mark) = &fault.deletion_mark {
        println!("marked for deletion by {} (pending approval)", mark.marked_by);
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut versions: Vec<_> = fault.version_history.iter().collect();
    versions.sort_by(|a, b| b.version.cmp(&a.version));
    for version in versions {
        let change = match version.change_type {
            ChangeType::Create => "create",
            ChangeType::Edit => "edit",
            ChangeType::Restore => "restore",
        };
        println!(
            "  v{} {} by {} ({}) - bib {} gate {} {}{}",
            version.version,
            change,
            version.edited_by,
            format_relative_time(version.timestamp, now),
            version.snapshot.bib,
            version.snapshot.gate,
            version.snapshot.fault_type,
            version
                .change_description
                .as_deref()
                .map(|description| format!(": {description}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub fn run_restore(
    id: &str,
    version: u32,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let fault_id = resolve_fault_id(&store, id)?;
    let mut fault = store
        .fault(&fault_id)
        .cloned()
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    let device = store.device().clone();
    let new_version = restore_version(&mut fault, version, device.name, device.id)?;
    store.update_fault(fault)?;
    println!("restored v{version} as v{new_version}");
    Ok(())
}

pub fn run_mark(
    id: &str,
    undo: bool,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let fault_id = resolve_fault_id(&store, id)?;
    let mut fault = store
        .fault(&fault_id)
        .cloned()
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    if undo {
        fault.unmark_for_deletion();
        println!("deletion mark withdrawn for {fault_id}");
    } else {
        let device = store.device().clone();
        fault.mark_for_deletion(device.name, device.id);
        println!("{fault_id} marked for deletion (awaiting chief judge approval)");
    }
    store.update_fault(fault)?;
    Ok(())
}

/// Apply a notes/gate/bib edit to a fault, recording the new version.
pub fn run_fault_edit(
    id: &str,
    gate: Option<u32>,
    notes: Option<String>,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let fault_id = resolve_fault_id(&store, id)?;
    let mut fault = store
        .fault(&fault_id)
        .cloned()
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    let mut changes = Vec::new();
    if let Some(gate) = gate {
        changes.push(format!("gate {} -> {gate}", fault.gate));
        fault.gate = gate;
    }
    if let Some(notes) = notes {
        changes.push("notes updated".to_string());
        fault.notes = Some(notes);
    }
    if changes.is_empty() {
        println!("nothing to change");
        return Ok(());
    }

    let device = store.device().clone();
    let version = append_version(
        &mut fault,
        ChangeType::Edit,
        device.name,
        device.id,
        Some(changes.join(", ")),
    );
    store.update_fault(fault)?;
    println!("recorded v{version}");
    Ok(())
}
