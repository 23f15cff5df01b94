//! Debounced redraw loop feeding the status item.

use super::bitmap::Bitmap;
use super::cache::RenderCache;
use super::key::RenderKey;
use super::Appearance;
use crate::events::EngineEvent;
use crate::profiles::{ProfileId, ProfileStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

pub const DEFAULT_REDRAW_WINDOW: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct Frame {
    pub profile_id: ProfileId,
    pub profile_name: String,
    pub key: RenderKey,
    pub bitmap: Arc<Bitmap>,
}

/// One icon per displayed profile, in display order.
#[derive(Debug, Clone, Default)]
pub struct RenderedFrames {
    pub generation: u64,
    pub frames: Vec<Frame>,
}

pub struct Redrawer {
    store: Arc<ProfileStore>,
    cache: Arc<RenderCache>,
    window: Duration,
    appearance: Appearance,
    generation: u64,
    tx: watch::Sender<RenderedFrames>,
}

impl Redrawer {
    pub fn new(
        store: Arc<ProfileStore>,
        cache: Arc<RenderCache>,
        appearance: Appearance,
        window: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(RenderedFrames::default());
        Self {
            store,
            cache,
            window,
            appearance,
            generation: 0,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderedFrames> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub fn appearance(&self) -> Appearance {
        self.appearance
    }

    /// Updates internal state for `event`; true when a redraw is due.
    pub fn apply(&mut self, event: &EngineEvent) -> bool {
        match event {
            EngineEvent::AppearanceChanged(appearance) => {
                if *appearance != self.appearance {
                    self.appearance = *appearance;
                    self.cache.clear();
                }
                true
            }
            EngineEvent::DisplaySettingsChanged { .. } => {
                self.cache.clear();
                true
            }
            EngineEvent::SnapshotUpdated { .. }
            | EngineEvent::ProfileSwitched { .. }
            | EngineEvent::ProfilesChanged => true,
            _ => false,
        }
    }

    /// Renders every displayed profile and publishes the result.
    pub fn redraw(&mut self) -> RenderedFrames {
        self.generation += 1;
        let frames = self
            .store
            .refresh_targets()
            .into_iter()
            .map(|profile| {
                let percent = profile
                    .snapshot
                    .as_ref()
                    .map(|s| s.session_percent())
                    .unwrap_or(0.0);
                let key = RenderKey::new(percent, self.appearance, &profile.display);
                Frame {
                    profile_id: profile.id,
                    profile_name: profile.name,
                    key,
                    bitmap: self.cache.render(&key),
                }
            })
            .collect();
        let rendered = RenderedFrames {
            generation: self.generation,
            frames,
        };
        tracing::trace!(
            generation = rendered.generation,
            frames = rendered.frames.len(),
            cached = self.cache.entry_count(),
            cache_hits = self.cache.hits(),
            cache_misses = self.cache.misses(),
            "Redrew status icons"
        );
        self.tx.send_replace(rendered.clone());
        rendered
    }

    /// Coalesces bursts of events into one redraw after `window` of quiet.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<EngineEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut deadline: Option<Instant> = None;
        self.redraw();
        loop {
            let pending = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = pending => {
                    deadline = None;
                    self.redraw();
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if self.apply(&event) {
                            deadline = Some(Instant::now() + self.window);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Redrawer lagged behind engine events");
                        self.cache.clear();
                        deadline = Some(Instant::now() + self.window);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Redrawer stopped");
    }
}
