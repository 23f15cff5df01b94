//! Typed change events published by the engine.
//!
//! Components never observe each other's state implicitly: the lifecycle
//! manager, refresh engine and auto-start monitor publish `EngineEvent`s on a
//! broadcast channel, and the scheduler, renderer, notifier and statusline
//! exporter subscribe.

use crate::profiles::ProfileId;
use crate::render::Appearance;
use crate::usage::UsageSnapshot;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Why a fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Timer,
    Manual,
    CredentialsChanged,
    Activation,
}

impl RefreshTrigger {
    pub fn is_user_initiated(&self) -> bool {
        matches!(self, RefreshTrigger::Manual | RefreshTrigger::CredentialsChanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Timer => "timer",
            RefreshTrigger::Manual => "manual",
            RefreshTrigger::CredentialsChanged => "credentials_changed",
            RefreshTrigger::Activation => "activation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ProfileSwitched {
        from: Option<ProfileId>,
        to: ProfileId,
    },
    /// Profiles were created, renamed, deleted, reselected, or had refresh
    /// settings changed.
    ProfilesChanged,
    CredentialsChanged {
        profile_id: ProfileId,
    },
    /// Ask the scheduler for an immediate fetch.
    RefreshRequested {
        profile_id: ProfileId,
        trigger: RefreshTrigger,
    },
    SnapshotUpdated {
        profile_id: ProfileId,
        snapshot: UsageSnapshot,
    },
    RefreshFailed {
        profile_id: ProfileId,
        code: &'static str,
        message: String,
        user_visible: bool,
    },
    ThresholdCrossed {
        profile_id: ProfileId,
        profile_name: String,
        threshold: u8,
        percent: f64,
    },
    SessionReset {
        profile_id: ProfileId,
        profile_name: String,
    },
    AutoStartSucceeded {
        profile_id: ProfileId,
        profile_name: String,
        resets_at: Option<DateTime<Utc>>,
    },
    AutoStartFailed {
        profile_id: ProfileId,
        profile_name: String,
        message: String,
    },
    /// A key-relevant display setting changed; render caches must clear.
    DisplaySettingsChanged {
        profile_id: ProfileId,
    },
    AppearanceChanged(Appearance),
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::ProfileSwitched { .. } => "profile_switched",
            EngineEvent::ProfilesChanged => "profiles_changed",
            EngineEvent::CredentialsChanged { .. } => "credentials_changed",
            EngineEvent::RefreshRequested { .. } => "refresh_requested",
            EngineEvent::SnapshotUpdated { .. } => "snapshot_updated",
            EngineEvent::RefreshFailed { .. } => "refresh_failed",
            EngineEvent::ThresholdCrossed { .. } => "threshold_crossed",
            EngineEvent::SessionReset { .. } => "session_reset",
            EngineEvent::AutoStartSucceeded { .. } => "auto_start_succeeded",
            EngineEvent::AutoStartFailed { .. } => "auto_start_failed",
            EngineEvent::DisplaySettingsChanged { .. } => "display_settings_changed",
            EngineEvent::AppearanceChanged(_) => "appearance_changed",
        }
    }
}

/// Cloneable publisher handle for `EngineEvent`s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        tracing::trace!(kind = event.kind(), "Publishing engine event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::ProfilesChanged);
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::ProfilesChanged);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        EventBus::new().publish(EngineEvent::ProfilesChanged);
    }

    #[test]
    fn test_user_initiated_triggers() {
        assert!(RefreshTrigger::Manual.is_user_initiated());
        assert!(RefreshTrigger::CredentialsChanged.is_user_initiated());
        assert!(!RefreshTrigger::Timer.is_user_initiated());
        assert!(!RefreshTrigger::Activation.is_user_initiated());
    }
}
