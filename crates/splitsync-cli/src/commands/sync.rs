use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use splitsync_core::events::{ConnectionStatus, EngineEvent, TerminalReason};
use splitsync_core::reconciler::{ReconcilerConfig, SyncSession};
use splitsync_core::transport::HttpTransport;

use crate::commands::common::open_store;
use crate::error::CliError;
use crate::profile::{require_profile, save_profile};

const fn status_text(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Syncing => "syncing",
        ConnectionStatus::Error => "error",
        ConnectionStatus::Offline => "offline",
    }
}

/// React to a session-ending condition: clear the credential or the race
/// selection so the next run starts from a recoverable state.
fn apply_terminal(reason: TerminalReason, profile_path: &Path) -> Result<(), CliError> {
    let mut profile = require_profile(profile_path)?;
    match reason {
        TerminalReason::AuthExpired => {
            profile.clear_token();
            save_profile(profile_path, &profile)?;
            println!(
                "credentials expired; stored token cleared. Run `splitsync config set-token` to re-authenticate"
            );
        }
        TerminalReason::RaceDeleted => {
            profile.race_id = None;
            save_profile(profile_path, &profile)?;
            println!("the selected race was deleted on the server; race selection cleared");
        }
    }
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Status { status, .. } => println!("status: {}", status_text(*status)),
        EngineEvent::Synced { applied } => println!("applied {applied} remote entries"),
        EngineEvent::SyncError { message } => eprintln!("sync error: {message}"),
        EngineEvent::Duplicate(duplicate) => println!(
            "warning: bib {} already recorded at {} (run {}) by {}",
            duplicate.bib, duplicate.point, duplicate.run, duplicate.other_device_name
        ),
        EngineEvent::Presence(device) => println!("device active: {}", device.name),
        EngineEvent::Terminal(reason) => match reason {
            TerminalReason::AuthExpired => println!("session ended: credentials expired"),
            TerminalReason::RaceDeleted => println!("session ended: race deleted"),
        },
    }
}

pub async fn run_sync(
    watch: bool,
    store_path: &Path,
    profile_path: &Path,
) -> Result<(), CliError> {
    let profile = require_profile(profile_path)?;
    if !profile.is_sync_ready() {
        return Err(CliError::SyncNotConfigured);
    }
    let race_id = profile.race_id.clone().ok_or(CliError::SyncNotConfigured)?;
    let token = profile.token.clone().ok_or(CliError::SyncNotConfigured)?;

    let store = open_store(store_path, Some(&profile))?;
    let store = Arc::new(Mutex::new(store));
    let transport =
        HttpTransport::new(&profile.endpoint, token).map_err(splitsync_core::Error::from)?;

    let mut session = SyncSession::new(
        race_id,
        store,
        Arc::new(transport),
        ReconcilerConfig::default(),
    )
    .await?;

    if watch {
        watch_loop(&mut session, profile_path).await
    } else {
        one_shot(&session, profile_path).await
    }
}

async fn one_shot(
    session: &SyncSession<HttpTransport>,
    profile_path: &Path,
) -> Result<(), CliError> {
    let mut events = session.subscribe();

    let pushed = session.push_unsynced().await;
    let applied = session.force_refresh().await;
    let delivered = session.process_outbox().await;

    // Terminal conditions surface through the event stream even when the
    // triggering call also returned an error.
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Terminal(reason) = event {
            apply_terminal(reason, profile_path)?;
            return Ok(());
        }
    }

    let pushed = pushed?;
    let delivered = delivered?;
    println!(
        "pushed {pushed} unsynced, applied {applied} remote, delivered {delivered} queued"
    );
    let pending = session.queue_len().await;
    if pending > 0 {
        println!("{pending} item(s) still queued; run again or use --watch");
    }
    println!("status: {}", status_text(session.status()));
    Ok(())
}

async fn watch_loop(
    session: &mut SyncSession<HttpTransport>,
    profile_path: &Path,
) -> Result<(), CliError> {
    let mut events = session.subscribe();
    session.spawn();
    println!("syncing; press Ctrl-C to stop");

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(EngineEvent::Terminal(reason)) => {
                    print_event(&EngineEvent::Terminal(reason));
                    apply_terminal(reason, profile_path)?;
                    break;
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged; skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping");
                break;
            }
        }
    }

    session.cleanup();
    Ok(())
}

pub fn run_sync_status(store_path: &Path, profile_path: &Path) -> Result<(), CliError> {
    let profile = require_profile(profile_path)?;
    let store = open_store(store_path, Some(&profile))?;

    println!("endpoint:     {}", profile.endpoint);
    println!("device:       {}", profile.device_name);
    println!(
        "race:         {}",
        profile.race_id.as_deref().unwrap_or("(none selected)")
    );
    println!(
        "token:        {}",
        if profile.token.is_some() {
            "set"
        } else {
            "(not set)"
        }
    );
    println!(
        "sync:         {}",
        if profile.sync_enabled { "enabled" } else { "disabled" }
    );
    println!("entries:      {}", store.entries().len());
    println!("faults:       {}", store.faults().len());
    println!("queued:       {}", store.outbox_len());
    println!("unsynced own: {}", store.unsynced_own_entries().len());
    Ok(())
}
