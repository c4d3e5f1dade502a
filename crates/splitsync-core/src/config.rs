//! Sync profile configuration.
//!
//! A schema-versioned document describing how this device reaches the race
//! server. Secrets live here only as the opaque bearer token the transport
//! needs; the PIN-to-token exchange itself is an external collaborator.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const PROFILE_SCHEMA_VERSION: u32 = 1;

/// Persisted sync configuration for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SyncProfile {
    pub schema_version: u32,
    /// Race server base URL
    pub endpoint: String,
    /// Currently selected race, if any
    #[serde(default)]
    pub race_id: Option<String>,
    /// Operator-facing device name
    pub device_name: String,
    /// Bearer credential from the auth collaborator
    #[serde(default)]
    pub token: Option<String>,
    /// Administrative sync toggle; off pauses the outbox, never drains it
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl SyncProfile {
    /// Build a validated profile.
    pub fn new(endpoint: impl Into<String>, device_name: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let device_name = normalize_text_option(Some(device_name.into()))
            .ok_or_else(|| Error::InvalidInput("device name cannot be empty".to_string()))?;
        Ok(Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            endpoint,
            race_id: None,
            device_name,
            token: None,
            sync_enabled: true,
        })
    }

    /// Parse a profile from raw JSON, rejecting unknown schema versions.
    pub fn parse(payload: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(payload)?;
        if profile.schema_version != PROFILE_SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported profile schema_version {} (expected {PROFILE_SCHEMA_VERSION})",
                profile.schema_version
            )));
        }
        normalize_endpoint(profile.endpoint.clone())?;
        Ok(profile)
    }

    /// Whether this profile can open a transport right now.
    #[must_use]
    pub fn is_sync_ready(&self) -> bool {
        self.sync_enabled && self.token.is_some() && self.race_id.is_some()
    }

    /// Drop the stored credential, e.g. after the server reports expiry.
    pub fn clear_token(&mut self) {
        self.token = None;
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
