use std::path::Path;

use splitsync_core::config::SyncProfile;
use splitsync_core::transport::{HttpTransport, RaceTransport};

use crate::commands::common::open_store;
use crate::error::CliError;
use crate::profile::{load_profile, require_profile, save_profile};

pub fn run_init(
    endpoint: &str,
    device_name: &str,
    profile_path: &Path,
) -> Result<(), CliError> {
    if load_profile(profile_path)?.is_some() {
        return Err(CliError::Config(format!(
            "a profile already exists at {}; edit it with the set-* commands",
            profile_path.display()
        )));
    }
    let profile = SyncProfile::new(endpoint, device_name)?;
    save_profile(profile_path, &profile)?;
    println!("profile created at {}", profile_path.display());
    println!("next: `splitsync config set-token <token>` and `splitsync config set-race <id>`");
    Ok(())
}

pub fn run_show(profile_path: &Path) -> Result<(), CliError> {
    let profile = require_profile(profile_path)?;
    println!("endpoint:    {}", profile.endpoint);
    println!("device name: {}", profile.device_name);
    println!(
        "race:        {}",
        profile.race_id.as_deref().unwrap_or("(none selected)")
    );
    // Never print the credential itself.
    println!(
        "token:       {}",
        if profile.token.is_some() {
            "set (redacted)"
        } else {
            "(not set)"
        }
    );
    println!(
        "sync:        {}",
        if profile.sync_enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn run_set_token(token: &str, profile_path: &Path) -> Result<(), CliError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CliError::Config("token must not be empty".to_string()));
    }
    let mut profile = require_profile(profile_path)?;
    profile.token = Some(token.to_string());
    save_profile(profile_path, &profile)?;
    println!("token stored");
    Ok(())
}

/// Select the active race, probing the server for it when a token is
/// available. An unreachable server does not block the selection; an
/// explicit "race does not exist" answer does.
pub async fn run_set_race(race_id: &str, profile_path: &Path) -> Result<(), CliError> {
    let race_id = race_id.trim();
    if race_id.is_empty() {
        return Err(CliError::Config("race id must not be empty".to_string()));
    }
    let mut profile = require_profile(profile_path)?;

    if let Some(token) = profile.token.as_deref() {
        let transport = HttpTransport::new(&profile.endpoint, token)
            .map_err(splitsync_core::Error::from)?;
        match transport.check_race_exists(race_id).await {
            Ok(status) if status.exists => {
                println!("race found ({} entries on the server)", status.entry_count);
            }
            Ok(_) => {
                return Err(CliError::Config(format!(
                    "race {race_id} does not exist on {}",
                    profile.endpoint
                )));
            }
            Err(error) => {
                println!("could not verify race right now ({error}); selecting it anyway");
            }
        }
    }

    profile.race_id = Some(race_id.to_string());
    save_profile(profile_path, &profile)?;
    println!("active race set to {race_id}");
    Ok(())
}

/// Rename the device in both the profile and the store document, so
/// collaborators see the new name on the next heartbeat or sync.
pub fn run_device(
    name: &str,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::Config("device name must not be empty".to_string()));
    }

    if let Some(mut profile) = load_profile(profile_path)? {
        profile.device_name = name.to_string();
        save_profile(profile_path, &profile)?;
    }

    let mut store = open_store(store_path, None)?;
    store.set_device_name(name)?;
    println!("device name set to {name}");
    Ok(())
}

pub fn run_set_sync(enabled: bool, profile_path: &Path) -> Result<(), CliError> {
    let mut profile = require_profile(profile_path)?;
    profile.sync_enabled = enabled;
    save_profile(profile_path, &profile)?;
    if enabled {
        println!("sync enabled");
    } else {
        println!("sync disabled; queued items are kept and resume when re-enabled");
    }
    Ok(())
}
