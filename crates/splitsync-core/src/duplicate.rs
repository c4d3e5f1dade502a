//! Cross-device duplicate detection
//!
//! Two devices recording the same physical moment produce two records with
//! distinct ids. This module flags that case so the operator can decide;
//! it never blocks or rewrites the submission.

use serde::{Deserialize, Serialize};

use crate::models::{TimedEntry, TimingPoint};

/// Advisory detection result surfaced to the operator. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDeviceDuplicate {
    pub bib: String,
    pub point: TimingPoint,
    pub run: u32,
    /// Display name of the device that recorded the earlier observation
    pub other_device_name: String,
    /// Timestamp of the earlier observation (Unix ms)
    pub other_timestamp: i64,
}

/// Check whether `candidate` collides with an existing entry recorded by a
/// different device on the same `(bib, point, run)`.
///
/// Pure and advisory: only the first match is reported, an empty bib never
/// matches, and the caller decides what to do with the result.
#[must_use]
pub fn detect_cross_device_duplicate(
    entries: &[TimedEntry],
    candidate: &TimedEntry,
    device_id: &str,
) -> Option<CrossDeviceDuplicate> {
    if candidate.bib.is_empty() {
        return None;
    }

    entries
        .iter()
        .find(|existing| {
            existing.bib == candidate.bib
                && existing.point == candidate.point
                && existing.run == candidate.run
                && existing.device_id != device_id
        })
        .map(|existing| CrossDeviceDuplicate {
            bib: existing.bib.clone(),
            point: existing.point,
            run: existing.run,
            other_device_name: existing.device_name.clone(),
            other_timestamp: existing.timestamp,
        })
}
