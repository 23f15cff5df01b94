//! Per-profile fetch execution: coalescing, retry, persistence and fan-out.
//!
//! Each profile is either idle or fetching. A trigger that arrives while a
//! fetch for the same profile is in flight is coalesced into it. Results are
//! written back by profile id, so a fetch that completes after an activation
//! still lands on the profile it was started for.

use super::circuit_breaker::{BreakerReport, CircuitBreaker};
use super::thresholds::{is_session_reset, ThresholdTracker};
use crate::config::RetryPolicy;
use crate::error::{ErrorDomain, MeterError};
use crate::events::{EngineEvent, EventBus, RefreshTrigger};
use crate::profiles::{Profile, ProfileId, ProfileStore};
use crate::secrets::run_blocking;
use crate::usage::{UsageFetcher, UsageSnapshot};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(UsageSnapshot),
    /// Another fetch for the profile was already in flight.
    Coalesced,
    Failed(MeterError),
    /// The profile was deleted before the result could be stored.
    ProfileGone,
}

/// Releases the in-flight mark when the fetch ends, however it ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<ProfileId>>,
    settled: &'a Notify,
    profile_id: ProfileId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(
        in_flight: &'a Mutex<HashSet<ProfileId>>,
        settled: &'a Notify,
        profile_id: ProfileId,
    ) -> Option<Self> {
        let inserted = lock(in_flight).insert(profile_id);
        inserted.then_some(Self {
            in_flight,
            settled,
            profile_id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.profile_id);
        self.settled.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RefreshEngine {
    store: Arc<ProfileStore>,
    fetcher: UsageFetcher,
    events: EventBus,
    retry: RetryPolicy,
    user_action_window: Duration,
    in_flight: Mutex<HashSet<ProfileId>>,
    /// Signalled whenever a profile leaves the in-flight set.
    settled: Notify,
    breaker: Mutex<CircuitBreaker>,
    thresholds: Mutex<ThresholdTracker>,
    user_actions: Mutex<HashMap<ProfileId, Instant>>,
}

impl RefreshEngine {
    pub fn new(
        store: Arc<ProfileStore>,
        fetcher: UsageFetcher,
        events: EventBus,
        retry: RetryPolicy,
        breaker_threshold: u32,
        user_action_window: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            events,
            retry,
            user_action_window,
            in_flight: Mutex::new(HashSet::new()),
            settled: Notify::new(),
            breaker: Mutex::new(CircuitBreaker::new(breaker_threshold)),
            thresholds: Mutex::new(ThresholdTracker::new()),
            user_actions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &UsageFetcher {
        &self.fetcher
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, profile_id: &ProfileId) -> bool {
        lock(&self.in_flight).contains(profile_id)
    }

    pub fn breaker_report(&self) -> Vec<BreakerReport> {
        lock(&self.breaker).report()
    }

    /// Drops tracking state for a deleted profile.
    pub fn forget(&self, profile_id: &ProfileId) {
        lock(&self.breaker).forget(profile_id);
        lock(&self.thresholds).forget(profile_id);
        lock(&self.user_actions).remove(profile_id);
    }

    /// Fetches, persists and publishes usage for one profile.
    pub async fn refresh(&self, profile_id: ProfileId, trigger: RefreshTrigger) -> RefreshOutcome {
        if trigger.is_user_initiated() {
            lock(&self.user_actions).insert(profile_id, Instant::now());
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &self.settled, profile_id) else {
            debug!(profile_id = %profile_id, trigger = trigger.as_str(), "Fetch already in flight; coalesced");
            return RefreshOutcome::Coalesced;
        };

        let Some(profile) = self.store.profile(&profile_id) else {
            debug!(profile_id = %profile_id, "Profile no longer exists; skipping fetch");
            return RefreshOutcome::ProfileGone;
        };
        debug!(profile_id = %profile_id, trigger = trigger.as_str(), "Fetching usage");

        let snapshot = match self.fetch_with_retry(&profile).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(&profile, trigger, e),
        };

        let store = self.store.clone();
        let stored = snapshot.clone();
        match run_blocking(move || store.record_snapshot(&profile_id, stored)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(profile_id = %profile_id, "Profile deleted during fetch; result dropped");
                return RefreshOutcome::ProfileGone;
            }
            Err(e) => return self.fail(&profile, trigger, e.into()),
        }

        lock(&self.breaker).record_success(profile_id);
        info!(
            profile_id = %profile_id,
            trigger = trigger.as_str(),
            session = snapshot.session_percent(),
            weekly = snapshot.weekly_percent(),
            "Usage updated"
        );
        self.events.publish(EngineEvent::SnapshotUpdated {
            profile_id,
            snapshot: snapshot.clone(),
        });
        self.publish_transitions(&profile, &snapshot);
        RefreshOutcome::Updated(snapshot)
    }

    /// Fetches usage without persisting it, holding the same per-profile
    /// in-flight mark as `refresh`. A fetch already running for the profile
    /// is waited out rather than joined, so the result is always fresh.
    pub async fn fetch_exclusive(&self, profile: &Profile) -> Result<UsageSnapshot, MeterError> {
        loop {
            let settled = self.settled.notified();
            if let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &self.settled, profile.id) {
                return self.fetcher.fetch(profile).await;
            }
            debug!(profile_id = %profile.id, "Waiting for in-flight fetch to finish");
            settled.await;
        }
    }

    /// Refreshes every current target concurrently; failures stay per profile.
    pub async fn refresh_targets(&self, trigger: RefreshTrigger) -> Vec<(ProfileId, RefreshOutcome)> {
        let targets = self.store.refresh_targets();
        let fetches = targets.iter().map(|p| async move {
            (p.id, self.refresh(p.id, trigger).await)
        });
        futures::future::join_all(fetches).await
    }

    async fn fetch_with_retry(&self, profile: &Profile) -> Result<UsageSnapshot, MeterError> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch(profile).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        profile_id = %profile.id,
                        attempt,
                        code = e.code(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish_transitions(&self, profile: &Profile, snapshot: &UsageSnapshot) {
        let Some(percent) = snapshot.session_reading() else {
            debug!(profile_id = %profile.id, "No session reading; thresholds not evaluated");
            return;
        };
        let crossed = lock(&self.thresholds).evaluate(profile.id, percent, &profile.thresholds);
        for threshold in crossed {
            info!(profile_id = %profile.id, threshold, percent, "Session threshold crossed");
            self.events.publish(EngineEvent::ThresholdCrossed {
                profile_id: profile.id,
                profile_name: profile.name.clone(),
                threshold,
                percent,
            });
        }

        let previous = profile.snapshot.as_ref().and_then(UsageSnapshot::session_reading);
        if is_session_reset(previous, percent) {
            info!(profile_id = %profile.id, "Session window reset");
            self.events.publish(EngineEvent::SessionReset {
                profile_id: profile.id,
                profile_name: profile.name.clone(),
            });
        }
    }

    /// Keeps the previous snapshot, counts the failure and decides visibility.
    fn fail(&self, profile: &Profile, trigger: RefreshTrigger, error: MeterError) -> RefreshOutcome {
        let domain = error.domain();
        let (failures, breaker_open, backoff_hint) = {
            let mut breaker = lock(&self.breaker);
            let failures = breaker.record_failure(profile.id, domain, Utc::now());
            let backoff = breaker.suggested_backoff(profile.id, domain, profile.refresh_interval());
            (failures, breaker.is_open(profile.id, domain), backoff)
        };
        let user_visible = match domain {
            ErrorDomain::Authorization => true,
            ErrorDomain::Credential | ErrorDomain::Storage => self.recent_user_action(&profile.id),
            _ => false,
        };
        warn!(
            profile_id = %profile.id,
            trigger = trigger.as_str(),
            code = error.code(),
            domain = domain.as_str(),
            consecutive_failures = failures,
            breaker_open,
            backoff_hint_secs = backoff_hint.as_secs(),
            needs_user_action = error.needs_user_action(),
            user_visible,
            error = %error,
            "Fetch failed; keeping previous snapshot"
        );
        self.events.publish(EngineEvent::RefreshFailed {
            profile_id: profile.id,
            code: error.code(),
            message: error.to_string(),
            user_visible,
        });
        RefreshOutcome::Failed(error)
    }

    fn recent_user_action(&self, profile_id: &ProfileId) -> bool {
        lock(&self.user_actions)
            .get(profile_id)
            .is_some_and(|at| at.elapsed() <= self.user_action_window)
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
