//! Periodic refresh timers for the current targets, driven by engine events.

use super::engine::RefreshEngine;
use crate::events::{EngineEvent, EventBus, RefreshTrigger};
use crate::profiles::{ProfileId, ProfileStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct Timer {
    interval: Duration,
    handle: JoinHandle<()>,
}

/// Owns one timer task per refresh target.
///
/// Timers are rebuilt when the target set or an interval changes. Explicit
/// `RefreshRequested` events spawn a one-off fetch; the engine coalesces it
/// with any fetch already running.
pub struct RefreshScheduler {
    engine: Arc<RefreshEngine>,
    store: Arc<ProfileStore>,
    events: EventBus,
    timers: HashMap<ProfileId, Timer>,
}

impl RefreshScheduler {
    pub fn new(engine: Arc<RefreshEngine>, events: EventBus) -> Self {
        let store = engine.store().clone();
        Self {
            engine,
            store,
            events,
            timers: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn active_timers(&self) -> Vec<(ProfileId, Duration)> {
        let mut timers: Vec<_> = self
            .timers
            .iter()
            .map(|(id, timer)| (*id, timer.interval))
            .collect();
        timers.sort();
        timers
    }

    /// Aligns timers with the store's current refresh targets.
    pub fn resync(&mut self) {
        let targets: HashMap<ProfileId, Duration> = self
            .store
            .refresh_targets()
            .into_iter()
            .map(|p| (p.id, p.refresh_interval()))
            .collect();

        let mut stopped = Vec::new();
        self.timers.retain(|id, timer| {
            let keep = targets.get(id) == Some(&timer.interval);
            if !keep {
                timer.handle.abort();
                stopped.push(*id);
            }
            keep
        });
        for id in stopped {
            if self.store.profile(&id).is_none() {
                self.engine.forget(&id);
            }
        }

        for (id, interval) in targets {
            if self.timers.contains_key(&id) {
                continue;
            }
            debug!(profile_id = %id, interval_secs = interval.as_secs(), "Starting refresh timer");
            let handle = spawn_timer(self.engine.clone(), id, interval);
            self.timers.insert(id, Timer { interval, handle });
        }
    }

    /// Runs until `shutdown` fires or the event bus closes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut rx = self.events.subscribe();
        self.resync();
        info!(targets = self.timers.len(), "Refresh scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = rx.recv() => match event {
                    Ok(EngineEvent::RefreshRequested { profile_id, trigger }) => {
                        let engine = self.engine.clone();
                        tokio::spawn(async move {
                            engine.refresh(profile_id, trigger).await;
                        });
                    }
                    Ok(EngineEvent::ProfileSwitched { .. }) | Ok(EngineEvent::ProfilesChanged) => {
                        self.resync();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Scheduler lagged behind engine events; resyncing");
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        info!("Refresh scheduler stopped");
    }
}

fn spawn_timer(engine: Arc<RefreshEngine>, profile_id: ProfileId, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.refresh(profile_id, RefreshTrigger::Timer).await;
        }
    })
}
