use std::path::Path;

use splitsync_core::models::QueuedWrite;

use crate::commands::common::{format_relative_time, open_store};
use crate::error::CliError;
use crate::profile::load_profile;

/// Show the pending outbox: what is still waiting for the race server,
/// how many attempts each item has burned, and the last error seen.
pub fn run_queue(store_path: &Path, profile_path: &Path) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let store = open_store(store_path, profile.as_ref())?;
    let now = chrono::Utc::now().timestamp_millis();

    let outbox = store.outbox();
    if outbox.is_empty() {
        println!("outbox is empty");
        return Ok(());
    }

    println!("{} item(s) pending delivery", outbox.len());
    for item in outbox {
        let short_id = item
            .write
            .entry_id()
            .as_str()
            .chars()
            .take(8)
            .collect::<String>();
        let what = match &item.write {
            QueuedWrite::SendEntry { entry } => {
                format!("bib {:>4}  {}", entry.bib, entry.point)
            }
            QueuedWrite::DeleteEntry { .. } => "delete     ".to_string(),
        };
        println!(
            "{short_id}  {what}  attempt {}  last tried {}",
            item.retry_count + 1,
            format_relative_time(item.last_attempt, now),
        );
        if let Some(error) = &item.last_error {
            println!("          last error: {error}");
        }
    }
    Ok(())
}
