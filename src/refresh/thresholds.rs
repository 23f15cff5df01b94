//! Notification threshold tracking over successive session percentages.

use crate::profiles::{NotificationThresholds, ProfileId};
use std::collections::{HashMap, HashSet};

/// Per-profile de-duplication of threshold notifications.
///
/// A fired threshold is remembered as `(threshold, rounded percent)`. While
/// any entry for a threshold remains, it does not fire again; all of its
/// entries are dropped once the percentage falls below it, which re-arms it.
#[derive(Debug, Default)]
pub struct ThresholdTracker {
    fired: HashMap<ProfileId, HashSet<(u8, i64)>>,
}

impl ThresholdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the thresholds newly crossed by `percent`.
    pub fn evaluate(
        &mut self,
        profile_id: ProfileId,
        percent: f64,
        enabled: &NotificationThresholds,
    ) -> Vec<u8> {
        let fired = self.fired.entry(profile_id).or_default();
        let mut crossed = Vec::new();
        for level in NotificationThresholds::LEVELS {
            if percent < f64::from(level) {
                fired.retain(|(fired_level, _)| *fired_level != level);
                continue;
            }
            if !enabled.is_enabled(level) {
                continue;
            }
            if fired.iter().any(|(fired_level, _)| *fired_level == level) {
                continue;
            }
            fired.insert((level, percent.round() as i64));
            crossed.push(level);
        }
        crossed
    }

    pub fn forget(&mut self, profile_id: &ProfileId) {
        self.fired.remove(profile_id);
    }
}

/// A drop from a positive session percentage to exactly zero.
pub fn is_session_reset(previous: Option<f64>, current: f64) -> bool {
    matches!(previous, Some(p) if p > 0.0) && current == 0.0
}
