mod cli;
mod commands;
mod error;
mod profile;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, SyncCommands};
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store_path = resolve_store_path(cli.store_path)?;
    let profile_path = profile::default_profile_path()?;

    match cli.command {
        Commands::Record { bib, point, run } => {
            commands::record::run_record(&bib, point.into(), run, &store_path, &profile_path).await
        }
        Commands::Fault {
            bib,
            gate,
            fault_type,
            run,
            gates_from,
            gates_to,
            notes,
        } => commands::fault::run_fault(
            &bib,
            gate,
            fault_type.into(),
            run,
            gates_from,
            gates_to,
            notes,
            &store_path,
            &profile_path,
        ),
        Commands::List { limit, json } => {
            commands::list::run_list(limit, json, &store_path, &profile_path)
        }
        Commands::Faults { json } => commands::list::run_faults(json, &store_path, &profile_path),
        Commands::Edit {
            id,
            bib,
            status,
            run,
        } => {
            commands::record::run_edit(
                &id,
                bib,
                status.map(Into::into),
                run,
                &store_path,
                &profile_path,
            )
            .await
        }
        Commands::Delete { id } => {
            commands::record::run_delete(&id, &store_path, &profile_path).await
        }
        Commands::FaultEdit { id, gate, notes } => {
            commands::fault::run_fault_edit(&id, gate, notes, &store_path, &profile_path)
        }
        Commands::History { id } => commands::fault::run_history(&id, &store_path, &profile_path),
        Commands::Restore { id, version } => {
            commands::fault::run_restore(&id, version, &store_path, &profile_path)
        }
        Commands::Mark { id, undo } => {
            commands::fault::run_mark(&id, undo, &store_path, &profile_path)
        }
        Commands::Device { name } => {
            commands::config_cmd::run_device(&name, &store_path, &profile_path)
        }
        Commands::Queue => commands::queue::run_queue(&store_path, &profile_path),
        Commands::Sync { command } => match command {
            SyncCommands::Run { watch } => {
                commands::sync::run_sync(watch, &store_path, &profile_path).await
            }
            SyncCommands::Status => commands::sync::run_sync_status(&store_path, &profile_path),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Init {
                endpoint,
                device_name,
            } => commands::config_cmd::run_init(&endpoint, &device_name, &profile_path),
            ConfigCommands::Show => commands::config_cmd::run_show(&profile_path),
            ConfigCommands::SetToken { token } => {
                commands::config_cmd::run_set_token(&token, &profile_path)
            }
            ConfigCommands::SetRace { race_id } => {
                commands::config_cmd::run_set_race(&race_id, &profile_path).await
            }
            ConfigCommands::SetSync { enabled } => {
                commands::config_cmd::run_set_sync(enabled, &profile_path)
            }
        },
    }
}

fn resolve_store_path(overridden: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match overridden {
        Some(path) => Ok(path),
        None => profile::default_store_path(),
    }
}
