//! Auto-Start Session Monitor.
//!
//! Runs on its own cadence, independent of refresh intervals. Each check
//! looks at every profile with auto-start enabled and, when its session
//! percentage reads exactly zero with no known reset still ahead, opens a
//! new session window with a throwaway conversation.

use super::gate::DebounceGate;
use super::wake::WakeDetector;
use crate::config::AutoStartConfig;
use crate::error::MeterError;
use crate::events::{EngineEvent, EventBus};
use crate::profiles::{Profile, ProfileId, ProfileStore};
use crate::refresh::RefreshEngine;
use crate::secrets::{run_blocking, SessionKey};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What started a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckReason {
    Startup,
    Cadence,
    Wake,
}

impl CheckReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckReason::Startup => "startup",
            CheckReason::Cadence => "cadence",
            CheckReason::Wake => "wake",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoStartDecision {
    Initialized { resets_at: Option<DateTime<Utc>> },
    /// Usage is above zero; a session is already running.
    SessionActive,
    /// The source gave no session percentage, which is not a zero.
    SessionUnreported,
    /// A reset time captured earlier has not passed yet.
    PendingReset(DateTime<Utc>),
    /// Only a session key with an organization can open a conversation.
    NoSessionKey,
    FetchFailed(MeterError),
    Failed(MeterError),
}

pub struct AutoStartMonitor {
    store: Arc<ProfileStore>,
    engine: Arc<RefreshEngine>,
    events: EventBus,
    config: AutoStartConfig,
    gate: Mutex<DebounceGate>,
}

impl AutoStartMonitor {
    pub fn new(
        store: Arc<ProfileStore>,
        engine: Arc<RefreshEngine>,
        events: EventBus,
        config: AutoStartConfig,
    ) -> Self {
        let gate = DebounceGate::new(Duration::from_secs(config.debounce_secs));
        Self {
            store,
            engine,
            events,
            config,
            gate: Mutex::new(gate),
        }
    }

    /// Checks every auto-start profile. `None` when the debounce gate dropped
    /// the check.
    pub async fn check_all(&self, reason: CheckReason) -> Option<Vec<(ProfileId, AutoStartDecision)>> {
        let passed = self
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_pass(Instant::now());
        if !passed {
            debug!(reason = reason.as_str(), "Auto-start check debounced");
            return None;
        }

        let profiles: Vec<Profile> = self
            .store
            .profiles()
            .into_iter()
            .filter(|p| p.auto_start_session)
            .collect();
        debug!(reason = reason.as_str(), profiles = profiles.len(), "Auto-start check");

        let mut decisions = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let decision = self.check_profile(profile, Utc::now()).await;
            decisions.push((profile.id, decision));
        }
        Some(decisions)
    }

    async fn check_profile(&self, profile: &Profile, now: DateTime<Utc>) -> AutoStartDecision {
        if let Some(resets_at) = profile.auto_start_reset_at.filter(|t| *t > now) {
            debug!(profile_id = %profile.id, %resets_at, "Auto-start suppressed until known reset");
            return AutoStartDecision::PendingReset(resets_at);
        }

        // Usage reads share the refresh engine's per-profile in-flight mark.
        let snapshot = match self.engine.fetch_exclusive(profile).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(profile_id = %profile.id, code = e.code(), error = %e, "Auto-start usage check failed");
                return AutoStartDecision::FetchFailed(e);
            }
        };
        match snapshot.session_reading() {
            Some(percent) if percent == 0.0 => {}
            Some(_) => return AutoStartDecision::SessionActive,
            None => {
                debug!(profile_id = %profile.id, "No session reading; auto-start needs a reported zero");
                return AutoStartDecision::SessionUnreported;
            }
        }

        let Some((key, organization_id)) = self.session_credential(profile.id).await else {
            info!(profile_id = %profile.id, "Session at 0% but no session key with organization; cannot auto-start");
            return AutoStartDecision::NoSessionKey;
        };

        let timezone = snapshot.timezone.clone().unwrap_or_else(|| "UTC".to_string());
        match self
            .initialize_session(profile, &key, &organization_id, &timezone)
            .await
        {
            Ok(resets_at) => {
                let store = self.store.clone();
                let id = profile.id;
                if let Err(e) = run_blocking(move || store.record_auto_start_reset(&id, resets_at)).await {
                    warn!(profile_id = %profile.id, code = e.code(), error = %e, "Failed to record auto-start reset time");
                }
                info!(profile_id = %profile.id, resets_at = ?resets_at, "Session auto-started");
                self.events.publish(EngineEvent::AutoStartSucceeded {
                    profile_id: profile.id,
                    profile_name: profile.name.clone(),
                    resets_at,
                });
                AutoStartDecision::Initialized { resets_at }
            }
            Err(e) => {
                warn!(profile_id = %profile.id, code = e.code(), error = %e, "Session auto-start failed");
                self.events.publish(EngineEvent::AutoStartFailed {
                    profile_id: profile.id,
                    profile_name: profile.name.clone(),
                    message: e.to_string(),
                });
                AutoStartDecision::Failed(e)
            }
        }
    }

    async fn session_credential(&self, profile_id: ProfileId) -> Option<(SessionKey, String)> {
        let vault = self.engine.fetcher().resolver().vault().clone();
        let set = match run_blocking(move || vault.load(&profile_id)).await {
            Ok(set) => set,
            Err(e) => {
                warn!(profile_id = %profile_id, code = e.code(), error = %e, "Failed to load credentials for auto-start");
                return None;
            }
        };
        let organization_id = set.organization_id.filter(|o| !o.trim().is_empty())?;
        Some((set.session_key?, organization_id))
    }

    /// Create, send, capture the reset time, delete.
    async fn initialize_session(
        &self,
        profile: &Profile,
        key: &SessionKey,
        organization_id: &str,
        timezone: &str,
    ) -> Result<Option<DateTime<Utc>>, MeterError> {
        let api = self.engine.fetcher().api();
        let conversation_id = api.create_conversation(key, organization_id).await?;
        let sent = api
            .send_message(key, organization_id, &conversation_id, &self.config.init_message, timezone)
            .await;

        if let Err(e) = api
            .delete_conversation(key, organization_id, &conversation_id)
            .await
        {
            warn!(profile_id = %profile.id, code = e.code(), error = %e, "Failed to delete auto-start conversation");
        }

        let mut resets_at = sent?;
        if resets_at.is_none() {
            resets_at = match self.engine.fetch_exclusive(profile).await {
                Ok(snapshot) => snapshot.session.resets_at,
                Err(e) => {
                    debug!(profile_id = %profile.id, code = e.code(), "Could not re-read usage after auto-start");
                    None
                }
            };
        }
        Ok(resets_at)
    }

    /// Startup check, then the fixed cadence plus wake detection.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut cadence = tokio::time::interval(Duration::from_secs(self.config.cadence_secs));
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let wake_tick = Duration::from_secs(self.config.wake_tick_secs.max(1));
        let mut wake_interval = tokio::time::interval(wake_tick);
        wake_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut detector = WakeDetector::new(wake_tick, Utc::now(), Instant::now());

        // Both intervals complete their first tick immediately.
        cadence.tick().await;
        wake_interval.tick().await;
        self.check_all(CheckReason::Startup).await;
        info!(cadence_secs = self.config.cadence_secs, "Auto-start monitor started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = cadence.tick() => {
                    self.check_all(CheckReason::Cadence).await;
                }
                _ = wake_interval.tick() => {
                    if detector.observe(Utc::now(), Instant::now()) {
                        info!("System wake detected");
                        self.check_all(CheckReason::Wake).await;
                    }
                }
            }
        }
        info!("Auto-start monitor stopped");
    }
}

#[cfg(test)]
#[path = "tests/monitor_tests.rs"]
mod tests;
