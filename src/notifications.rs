//! User-facing notifications derived from engine events.
//!
//! Sent for:
//! - session thresholds being crossed
//! - a session window resetting
//! - auto-start outcomes
//! - refresh errors the user should see

use crate::events::EngineEvent;
use crate::profiles::{ProfileId, ProfileStore};
use std::sync::Arc;
use tokio::sync::broadcast;

const APP_TITLE: &str = "Meterbar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Stays on screen until dismissed where the platform allows it.
    pub urgent: bool,
}

impl Notification {
    fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgent: false,
        }
    }

    fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log; used when desktop delivery is unavailable.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            title = %notification.title,
            urgent = notification.urgent,
            "{}",
            notification.body
        );
        Ok(())
    }
}

#[cfg(feature = "desktop-notifications")]
pub struct DesktopNotifier;

#[cfg(feature = "desktop-notifications")]
impl DesktopNotifier {
    pub fn new() -> Self {
        #[cfg(target_os = "macos")]
        {
            // Without a bundle the notification needs an owning application.
            if let Err(e) = notify_rust::set_application("com.apple.Terminal") {
                tracing::warn!(error = %e, "Failed to set notification application");
            }
        }
        Self
    }
}

#[cfg(feature = "desktop-notifications")]
impl Notifier for DesktopNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let timeout = if notification.urgent {
            notify_rust::Timeout::Never
        } else {
            notify_rust::Timeout::Milliseconds(5000)
        };
        let mut native = notify_rust::Notification::new();
        native
            .summary(&notification.title)
            .body(&notification.body)
            .timeout(timeout);

        // Urgency is a freedesktop notification hint.
        #[cfg(target_os = "linux")]
        {
            let urgency = if notification.urgent {
                notify_rust::Urgency::Critical
            } else {
                notify_rust::Urgency::Normal
            };
            native.urgency(urgency);
        }

        native.show()?;
        Ok(())
    }
}

/// The platform notifier for this build.
pub fn default_notifier() -> Arc<dyn Notifier> {
    #[cfg(feature = "desktop-notifications")]
    {
        Arc::new(DesktopNotifier::new())
    }
    #[cfg(not(feature = "desktop-notifications"))]
    {
        Arc::new(LogNotifier)
    }
}

pub struct NotificationDispatcher {
    store: Arc<ProfileStore>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<ProfileStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    fn profile_name(&self, id: &ProfileId) -> String {
        self.store
            .profile(id)
            .map(|p| p.name)
            .unwrap_or_else(|| "Unknown profile".to_string())
    }

    /// Maps an event to the notification it warrants, if any.
    pub fn notification_for(&self, event: &EngineEvent) -> Option<Notification> {
        match event {
            EngineEvent::ThresholdCrossed {
                profile_name,
                threshold,
                percent,
                ..
            } => {
                let n = Notification::new(
                    format!("{} - {}% of session used", APP_TITLE, threshold),
                    format!("{} is at {:.0}% of its 5-hour session.", profile_name, percent),
                );
                Some(if *threshold >= 95 { n.urgent() } else { n })
            }
            EngineEvent::SessionReset { profile_name, .. } => Some(Notification::new(
                format!("{} - Session reset", APP_TITLE),
                format!("{} has a fresh 5-hour session.", profile_name),
            )),
            EngineEvent::AutoStartSucceeded {
                profile_name,
                resets_at,
                ..
            } => {
                let body = match resets_at {
                    Some(at) => format!(
                        "Started a new session for {}; it resets at {}.",
                        profile_name,
                        at.with_timezone(&chrono::Local).format("%H:%M")
                    ),
                    None => format!("Started a new session for {}.", profile_name),
                };
                Some(Notification::new(
                    format!("{} - Session started", APP_TITLE),
                    body,
                ))
            }
            EngineEvent::AutoStartFailed {
                profile_name,
                message,
                ..
            } => Some(Notification::new(
                format!("{} - Auto-start failed", APP_TITLE),
                format!("{}: {}", profile_name, message),
            )),
            EngineEvent::RefreshFailed {
                profile_id,
                code,
                message,
                user_visible: true,
            } => Some(
                Notification::new(
                    format!("{} - Usage refresh failed", APP_TITLE),
                    format!("{}: {} ({})", self.profile_name(profile_id), message, code),
                )
                .urgent(),
            ),
            _ => None,
        }
    }

    pub fn dispatch(&self, event: &EngineEvent) {
        if let Some(notification) = self.notification_for(event) {
            if let Err(e) = self.notifier.notify(&notification) {
                tracing::warn!(error = %e, kind = event.kind(), "Could not send notification");
            }
        }
    }

    pub async fn run(
        self,
        mut events: broadcast::Receiver<EngineEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Notification dispatcher lagged behind engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_paths::AppPaths;
    use crate::events::EventBus;
    use crate::profiles::Profile;
    use crate::testing::RecordingNotifier;
    use tempfile::TempDir;

    fn dispatcher() -> (TempDir, ProfileId, Arc<RecordingNotifier>, NotificationDispatcher) {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let store = Arc::new(ProfileStore::open(&paths).unwrap());
        let profile = Profile::new("Work");
        let id = profile.id;
        store.mutate(|s| s.profiles.push(profile)).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(store, notifier.clone());
        (dir, id, notifier, dispatcher)
    }

    #[test]
    fn test_threshold_notification() {
        let (_dir, id, notifier, dispatcher) = dispatcher();
        dispatcher.dispatch(&EngineEvent::ThresholdCrossed {
            profile_id: id,
            profile_name: "Work".to_string(),
            threshold: 75,
            percent: 76.4,
        });
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].title.contains("75%"));
        assert!(sent[0].body.contains("76%"));
        assert!(!sent[0].urgent);
    }

    #[test]
    fn test_hidden_refresh_failures_are_silent() {
        let (_dir, id, notifier, dispatcher) = dispatcher();
        dispatcher.dispatch(&EngineEvent::RefreshFailed {
            profile_id: id,
            code: "NET-001",
            message: "offline".to_string(),
            user_visible: false,
        });
        assert!(notifier.sent().is_empty());

        dispatcher.dispatch(&EngineEvent::RefreshFailed {
            profile_id: id,
            code: "API-001",
            message: "unauthorized".to_string(),
            user_visible: true,
        });
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.starts_with("Work:"));
        assert!(sent[0].urgent);
    }

    #[test]
    fn test_state_events_do_not_notify() {
        let (_dir, id, notifier, dispatcher) = dispatcher();
        dispatcher.dispatch(&EngineEvent::ProfilesChanged);
        dispatcher.dispatch(&EngineEvent::CredentialsChanged { profile_id: id });
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_dispatches_until_shutdown() {
        let (_dir, id, notifier, dispatcher) = dispatcher();
        let events = EventBus::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.run(events.subscribe(), shutdown_rx));

        events.publish(EngineEvent::SessionReset {
            profile_id: id,
            profile_name: "Work".to_string(),
        });
        for _ in 0..50 {
            if !notifier.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(notifier.sent().len(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
