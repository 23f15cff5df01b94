//! `statusline.json` export for external statusline scripts.

use crate::error::StorageError;
use crate::events::EngineEvent;
use crate::profiles::{Profile, ProfileStore};
use crate::render::{Appearance, RenderCache, RenderKey};
use crate::usage::{format_countdown, UsageSnapshot};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatuslineWindow {
    pub used_percent: f64,
    pub resets_at: Option<DateTime<Utc>>,
    pub resets_in: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatuslineExport {
    pub profile_id: String,
    pub profile_name: String,
    pub session: Option<StatuslineWindow>,
    pub weekly: Option<StatuslineWindow>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Base64-encoded PNG of the current icon.
    pub icon_png: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl StatuslineExport {
    pub fn build(profile: &Profile, icon_png: Option<&[u8]>, now: DateTime<Utc>) -> Self {
        let window = |w: &crate::usage::UsageWindow| StatuslineWindow {
            used_percent: w.utilization,
            resets_at: w.resets_at,
            resets_in: format_countdown(w.time_until_reset(now)),
        };
        let snapshot: Option<&UsageSnapshot> = profile.snapshot.as_ref();
        Self {
            profile_id: profile.id.to_string(),
            profile_name: profile.name.clone(),
            session: snapshot.map(|s| window(&s.session)),
            weekly: snapshot.map(|s| window(&s.weekly)),
            fetched_at: snapshot.map(|s| s.fetched_at),
            icon_png: icon_png.map(|png| base64::engine::general_purpose::STANDARD.encode(png)),
            generated_at: now,
        }
    }
}

pub struct StatuslineExporter {
    store: Arc<ProfileStore>,
    cache: Arc<RenderCache>,
    appearance: Appearance,
    path: PathBuf,
}

impl StatuslineExporter {
    pub fn new(
        store: Arc<ProfileStore>,
        cache: Arc<RenderCache>,
        appearance: Appearance,
        path: PathBuf,
    ) -> Self {
        Self {
            store,
            cache,
            appearance,
            path,
        }
    }

    /// Writes the export for the active profile; nothing is written without one.
    pub fn export(&self) -> Result<bool, StorageError> {
        let Some(profile) = self.store.active_profile() else {
            return Ok(false);
        };
        let percent = profile
            .snapshot
            .as_ref()
            .map(|s| s.session_percent())
            .unwrap_or(0.0);
        let key = RenderKey::new(percent, self.appearance, &profile.display);
        let png = match self.cache.render(&key).encode_png() {
            Ok(png) => Some(png),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode statusline icon");
                None
            }
        };
        let export = StatuslineExport::build(&profile, png.as_deref(), Utc::now());
        write_atomic(&self.path, &export)?;
        tracing::debug!(profile_id = %profile.id, path = %self.path.display(), "Wrote statusline export");
        Ok(true)
    }

    fn should_export(&self, event: &EngineEvent) -> bool {
        match event {
            EngineEvent::ProfileSwitched { .. } | EngineEvent::ProfilesChanged => true,
            EngineEvent::SnapshotUpdated { profile_id, .. } => {
                self.store.active_profile_id() == Some(*profile_id)
            }
            _ => false,
        }
    }

    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<EngineEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(EngineEvent::AppearanceChanged(appearance)) => {
                        self.appearance = appearance;
                    }
                    Ok(event) => {
                        if self.should_export(&event) {
                            if let Err(e) = self.export() {
                                tracing::warn!(code = e.code(), error = %e, "Statusline export failed");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Err(e) = self.export() {
                            tracing::warn!(code = e.code(), error = %e, "Statusline export failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

fn write_atomic(path: &Path, export: &StatuslineExport) -> Result<(), StorageError> {
    let content =
        serde_json::to_string_pretty(export).map_err(|e| StorageError::encode("statusline", e))?;
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::write(path, "path has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::write(path, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| StorageError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::write(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_paths::AppPaths;
    use crate::testing::snapshot;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AppPaths, Arc<ProfileStore>) {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let store = Arc::new(ProfileStore::open(&paths).unwrap());
        (dir, paths, store)
    }

    #[test]
    fn test_export_writes_active_profile() {
        let (_dir, paths, store) = setup();
        let mut profile = Profile::new("Work");
        profile.snapshot = Some(snapshot(42.0, 12.0));
        store.mutate(|s| s.profiles.push(profile)).unwrap();

        let exporter = StatuslineExporter::new(
            store,
            Arc::new(RenderCache::new()),
            Appearance::Dark,
            paths.statusline_path(),
        );
        assert!(exporter.export().unwrap());

        let raw = std::fs::read_to_string(paths.statusline_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["profile_name"], "Work");
        assert_eq!(json["session"]["used_percent"], 42.0);
        assert_eq!(json["weekly"]["used_percent"], 12.0);
        let png = base64::engine::general_purpose::STANDARD
            .decode(json["icon_png"].as_str().unwrap())
            .unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_no_profiles_writes_nothing() {
        let (_dir, paths, store) = setup();
        let exporter = StatuslineExporter::new(
            store,
            Arc::new(RenderCache::new()),
            Appearance::Light,
            paths.statusline_path(),
        );
        assert!(!exporter.export().unwrap());
        assert!(!paths.statusline_path().exists());
    }

    #[test]
    fn test_build_without_snapshot() {
        let profile = Profile::new("Empty");
        let export = StatuslineExport::build(&profile, None, Utc::now());
        assert!(export.session.is_none());
        assert!(export.icon_png.is_none());
    }

    #[test]
    fn test_only_active_snapshot_updates_export() {
        let (_dir, paths, store) = setup();
        let active = Profile::new("Active");
        let other = Profile::new("Other");
        let (active_id, other_id) = (active.id, other.id);
        store
            .mutate(|s| {
                s.profiles.push(active);
                s.profiles.push(other);
                s.active_profile_id = Some(active_id);
            })
            .unwrap();
        let exporter = StatuslineExporter::new(
            store,
            Arc::new(RenderCache::new()),
            Appearance::Light,
            paths.statusline_path(),
        );
        assert!(exporter.should_export(&EngineEvent::SnapshotUpdated {
            profile_id: active_id,
            snapshot: snapshot(1.0, 1.0),
        }));
        assert!(!exporter.should_export(&EngineEvent::SnapshotUpdated {
            profile_id: other_id,
            snapshot: snapshot(1.0, 1.0),
        }));
    }
}
