use std::path::Path;

use serde::Serialize;

use crate::commands::common::{format_relative_time, open_store, EntryListItem};
use crate::error::CliError;
use crate::profile::load_profile;

pub fn run_list(
    limit: usize,
    json: bool,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let store = open_store(store_path, profile.as_ref())?;
    let now = chrono::Utc::now().timestamp_millis();

    let mut entries: Vec<_> = store.entries().to_vec();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);

    if json {
        let items: Vec<EntryListItem> = entries
            .iter()
            .map(|entry| EntryListItem::from_entry(entry, now))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("no entries recorded");
        return Ok(());
    }

    for entry in &entries {
        let short_id = entry.id.as_str().chars().take(8).collect::<String>();
        let sync = if entry.is_synced() { "synced" } else { "local" };
        println!(
            "{short_id}  bib {:>4}  {:<6} run {}  {:<14} {:<7} {} ({})",
            entry.bib,
            entry.point.to_string(),
            entry.run,
            crate::commands::common::status_label(entry.status),
            sync,
            entry.device_name,
            format_relative_time(entry.timestamp, now),
        );
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FaultListItem {
    id: String,
    bib: String,
    gate: u32,
    fault_type: String,
    run: u32,
    version: u32,
    marked_for_deletion: bool,
    device: String,
    recorded: String,
}

pub fn run_faults(json: bool, store_path: &Path, profile_path: &Path) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let store = open_store(store_path, profile.as_ref())?;
    let now = chrono::Utc::now().timestamp_millis();

    let mut faults: Vec<_> = store.faults().to_vec();
    faults.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if json {
        let items: Vec<FaultListItem> = faults
            .iter()
            .map(|fault| FaultListItem {
                id: fault.id.as_str(),
                bib: fault.bib.clone(),
                gate: fault.gate,
                fault_type: fault.fault_type.to_string(),
                run: fault.run,
                version: fault.current_version,
                marked_for_deletion: fault.deletion_mark.is_some(),
                device: fault.device_name.clone(),
                recorded: format_relative_time(fault.timestamp, now),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if faults.is_empty() {
        println!("no faults recorded");
        return Ok(());
    }

    for fault in &faults {
        let short_id = fault.id.as_str().chars().take(8).collect::<String>();
        let mark = if fault.deletion_mark.is_some() {
            "  [marked for deletion]"
        } else {
            ""
        };
        println!(
            "{short_id}  bib {:>4}  gate {:>2}  {:<15} run {}  v{}  {} ({}){mark}",
            fault.bib,
            fault.gate,
            fault.fault_type.to_string(),
            fault.run,
            fault.current_version,
            fault.device_name,
            format_relative_time(fault.timestamp, now),
        );
    }
    Ok(())
}
