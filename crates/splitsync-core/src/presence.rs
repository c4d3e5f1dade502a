//! Local presence channel.
//!
//! Near-zero-latency sync between handles on the same device (the cross-tab
//! analog), bypassing the network entirely. Best-effort by contract: losing
//! this channel only costs latency, never correctness, because everything it
//! carries also arrives through cloud reconciliation.

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::models::{DeviceInfo, TimedEntry};

/// Default heartbeat staleness cutoff for the roster view.
pub const DEFAULT_STALE_CUTOFF_MS: i64 = 30_000;

/// Messages carried over the local channel
#[derive(Debug, Clone)]
pub enum LocalMessage {
    /// A newly recorded entry; receivers apply it through the same merge
    /// path as remote entries
    Entry(TimedEntry),
    /// Device heartbeat for the connected-devices view
    Presence(DeviceInfo),
}

/// Same-process broadcast channel between sync participants.
#[derive(Debug, Clone)]
pub struct LocalPresenceChannel {
    sender: broadcast::Sender<LocalMessage>,
}

impl LocalPresenceChannel {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LocalMessage> {
        self.sender.subscribe()
    }

    /// Broadcast a newly recorded entry. No receivers is fine.
    pub fn publish_entry(&self, entry: TimedEntry) {
        let _ = self.sender.send(LocalMessage::Entry(entry));
    }

    /// Broadcast a presence heartbeat. No receivers is fine.
    pub fn publish_presence(&self, device: DeviceInfo) {
        let _ = self.sender.send(LocalMessage::Presence(device));
    }
}

impl Default for LocalPresenceChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Liveness view over presence heartbeats.
///
/// Not durable data: stale devices are evicted from the view, nothing is
/// tombstoned.
#[derive(Debug, Default)]
pub struct DeviceRoster {
    devices: HashMap<String, DeviceInfo>,
}

impl DeviceRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat, replacing any older sighting of the device.
    pub fn observe(&mut self, device: DeviceInfo) {
        self.devices.insert(device.id.clone(), device);
    }

    /// Drop devices whose last heartbeat is older than `cutoff_ms`.
    pub fn evict_stale(&mut self, now: i64, cutoff_ms: i64) {
        self.devices
            .retain(|_, device| !device.is_stale(now, cutoff_ms));
    }

    /// Currently live devices, sorted by display name.
    #[must_use]
    pub fn active(&self) -> Vec<&DeviceInfo> {
        let mut devices: Vec<&DeviceInfo> = self.devices.values().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimingPoint;

    fn heartbeat(id: &str, name: &str, last_seen: i64) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
            last_seen,
        }
    }

    #[tokio::test]
    async fn entries_reach_subscribers() {
        let channel = LocalPresenceChannel::default();
        let mut receiver = channel.subscribe();

        let entry =
            TimedEntry::new("042", TimingPoint::Finish, None, "dev-a", "Timer A").unwrap();
        channel.publish_entry(entry.clone());

        match receiver.recv().await.unwrap() {
            LocalMessage::Entry(received) => assert_eq!(received.id, entry.id),
            LocalMessage::Presence(_) => panic!("expected entry message"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_best_effort() {
        let channel = LocalPresenceChannel::default();
        channel.publish_presence(heartbeat("dev-a", "Timer A", 0));
    }

    #[test]
    fn roster_replaces_older_heartbeats() {
        let mut roster = DeviceRoster::new();
        roster.observe(heartbeat("dev-a", "Timer A", 100));
        roster.observe(heartbeat("dev-a", "Timer A", 200));

        assert_eq!(roster.len(), 1);
        assert_eq!(roster.active()[0].last_seen, 200);
    }

    #[test]
    fn roster_evicts_stale_devices() {
        let mut roster = DeviceRoster::new();
        roster.observe(heartbeat("dev-a", "Timer A", 0));
        roster.observe(heartbeat("dev-b", "Gate 4", 50_000));

        roster.evict_stale(60_000, DEFAULT_STALE_CUTOFF_MS);
        let active = roster.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "dev-b");
    }

    #[test]
    fn roster_sorts_by_display_name() {
        let mut roster = DeviceRoster::new();
        roster.observe(heartbeat("dev-b", "Gate 4", 0));
        roster.observe(heartbeat("dev-a", "Timer A", 0));

        let names: Vec<&str> = roster.active().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Gate 4", "Timer A"]);
    }
}
