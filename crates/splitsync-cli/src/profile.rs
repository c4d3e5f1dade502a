//! Persistent device profile for the CLI.

use std::path::{Path, PathBuf};

use splitsync_core::config::SyncProfile;

use crate::error::CliError;

const PROFILE_FILE_NAME: &str = "profile.json";
const STORE_FILE_NAME: &str = "race.json";

pub fn default_profile_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("splitsync").join(PROFILE_FILE_NAME))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

pub fn default_store_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("splitsync").join(STORE_FILE_NAME))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn load_profile(path: &Path) -> Result<Option<SyncProfile>, CliError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let profile = SyncProfile::parse(&raw)
        .map_err(|error| CliError::Config(format!("{}: {error}", path.display())))?;
    Ok(Some(profile))
}

pub fn require_profile(path: &Path) -> Result<SyncProfile, CliError> {
    load_profile(path)?.ok_or(CliError::SyncNotConfigured)
}

pub fn save_profile(path: &Path, profile: &SyncProfile) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(profile)?;
    std::fs::write(path, serialized)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let mut profile = SyncProfile::new("https://race.example.com", "Timer A").unwrap();
        profile.token = Some("bearer".to_string());
        save_profile(&path, &profile).unwrap();

        let loaded = load_profile(&path).unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn missing_profile_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_profile(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
        assert!(matches!(
            require_profile(&dir.path().join("nope.json")),
            Err(CliError::SyncNotConfigured)
        ));
    }
}
