use std::path::Path;
use std::sync::Arc;

use splitsync_core::duplicate::detect_cross_device_duplicate;
use splitsync_core::events::EventBus;
use splitsync_core::models::{EntryStatus, TimedEntry, TimingPoint};
use splitsync_core::outbox::{Outbox, OutboxConfig, SendDisposition};
use splitsync_core::transport::HttpTransport;
use tokio::sync::Mutex;

use crate::commands::common::{open_store, resolve_entry_id};
use crate::error::CliError;
use crate::profile::{load_profile, require_profile, save_profile};

pub async fn run_record(
    bib: &str,
    point: TimingPoint,
    run: Option<u32>,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let device = store.device().clone();
    let entry = TimedEntry::new(bib, point, run, device.id.clone(), device.name)?;
    let duplicate = detect_cross_device_duplicate(store.entries(), &entry, &device.id);
    store.record_entry(entry.clone())?;

    println!("{}", entry.id);
    if let Some(duplicate) = duplicate {
        println!(
            "warning: bib {} at {} (run {}) was already recorded by {}",
            duplicate.bib, duplicate.point, duplicate.run, duplicate.other_device_name
        );
    }

    let Some(profile) = profile.filter(|profile| profile.is_sync_ready()) else {
        println!("recorded locally; sync is not configured");
        return Ok(());
    };

    store.set_race_id(profile.race_id.clone())?;
    let token = profile.token.as_deref().unwrap_or_default();
    let transport = Arc::new(HttpTransport::new(&profile.endpoint, token).map_err(
        |error| CliError::Config(error.to_string()),
    )?);
    let outbox = Outbox::new(
        Arc::new(Mutex::new(store)),
        transport,
        EventBus::default(),
        OutboxConfig::default(),
    );

    match outbox.enqueue_or_send(entry).await? {
        SendDisposition::Delivered => println!("synced"),
        SendDisposition::Queued => println!("queued for retry"),
    }
    Ok(())
}

pub async fn run_edit(
    id: &str,
    bib: Option<String>,
    status: Option<EntryStatus>,
    run: Option<u32>,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let entry_id = resolve_entry_id(&store, id)?;
    let mut entry = store
        .entry(&entry_id)
        .cloned()
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    if let Some(bib) = bib {
        entry.bib = splitsync_core::models::normalize_bib(&bib)?;
    }
    if let Some(status) = status {
        entry.status = status;
    }
    if let Some(run) = run {
        if run == 0 {
            return Err(
                splitsync_core::Error::InvalidInput("run number must be >= 1".to_string()).into(),
            );
        }
        entry.run = run;
    }
    entry.touch();
    store.update_entry(entry)?;
    println!("{entry_id}");
    Ok(())
}

pub async fn run_delete(
    id: &str,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = load_profile(profile_path)?;
    let mut store = open_store(store_path, profile.as_ref())?;

    let entry_id = resolve_entry_id(&store, id)?;
    let removed = store.remove_entry(&entry_id)?;
    println!("{}", removed.id);

    let Some(profile) = profile.filter(|profile| profile.is_sync_ready()) else {
        println!("deleted locally; run sync once configured to propagate the tombstone");
        return Ok(());
    };

    store.set_race_id(profile.race_id.clone())?;
    let token = profile.token.as_deref().unwrap_or_default();
    let transport = Arc::new(
        HttpTransport::new(&profile.endpoint, token)
            .map_err(|error| CliError::Config(error.to_string()))?,
    );
    let outbox = Outbox::new(
        Arc::new(Mutex::new(store)),
        transport,
        EventBus::default(),
        OutboxConfig::default(),
    );

    match outbox
        .enqueue_or_delete(removed.id, &removed.device_id)
        .await
    {
        Ok(SendDisposition::Delivered) => println!("tombstone sent"),
        Ok(SendDisposition::Queued) => println!("tombstone queued for retry"),
        Err(splitsync_core::Error::Transport(
            splitsync_core::transport::TransportError::AuthExpired,
        )) => {
            let mut profile = require_profile(profile_path)?;
            profile.clear_token();
            save_profile(profile_path, &profile)?;
            println!("authentication expired; token cleared, re-authenticate to sync");
        }
        Err(error) => return Err(error.into()),
    }
    Ok(())
}
