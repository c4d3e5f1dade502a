//! Device presence model

use serde::{Deserialize, Serialize};

/// Ephemeral presence record for one device.
///
/// Heartbeat-driven liveness view, not durable data: stale records are
/// evicted by the presence layer, never tombstoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device id
    pub id: String,
    /// Display name shown to operators
    pub name: String,
    /// Last heartbeat (Unix ms)
    pub last_seen: i64,
}

impl DeviceInfo {
    /// Whether this device's last heartbeat is older than `cutoff_ms`.
    #[must_use]
    pub const fn is_stale(&self, now: i64, cutoff_ms: i64) -> bool {
        now - self.last_seen > cutoff_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_cutoff() {
        let device = DeviceInfo {
            id: "dev-a".to_string(),
            name: "Timer A".to_string(),
            last_seen: 1_000,
        };
        assert!(!device.is_stale(30_000, 30_000));
        assert!(device.is_stale(31_001, 30_000));
    }
}
