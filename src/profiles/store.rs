//! Persistent profile store backed by `settings.json`.
//!
//! Reads are served from an in-memory copy. Every mutation takes the
//! advisory lock, re-reads `settings.json` so edits made by another process
//! survive, applies the change, writes atomically and only then swaps the
//! result in. A failed write leaves memory and disk unchanged.

use super::migration::LegacySettings;
#[cfg(test)]
use super::types::DisplayMode;
use super::types::{Profile, ProfileId, SettingsFile};
use crate::app_paths::AppPaths;
use crate::error::StorageError;
use crate::usage::UsageSnapshot;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

struct StoreState {
    settings: SettingsFile,
    legacy: Option<LegacySettings>,
}

pub struct ProfileStore {
    settings_path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<StoreState>,
}

/// Result of reading `settings.json` from disk.
struct Loaded {
    settings: SettingsFile,
    legacy: Option<LegacySettings>,
}

impl ProfileStore {
    /// Opens the store, reading `settings.json` if it exists.
    pub fn open(paths: &AppPaths) -> Result<Self, StorageError> {
        let settings_path = paths.settings_path();
        let lock_path = paths.settings_lock_path();
        let loaded = read_settings(&settings_path, &lock_path)?;
        Ok(Self {
            settings_path,
            lock_path,
            state: Mutex::new(StoreState {
                settings: loaded.settings,
                legacy: loaded.legacy,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock still holds a consistent copy: mutations swap in
        // only after a successful write.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-reads `settings.json`, picking up writes made by other processes.
    pub fn reload(&self) -> Result<(), StorageError> {
        let loaded = read_settings(&self.settings_path, &self.lock_path)?;
        let mut state = self.lock();
        state.settings = loaded.settings;
        if loaded.legacy.is_some() {
            state.legacy = loaded.legacy;
        }
        Ok(())
    }

    /// Returns and clears the pre-profile settings found at open, if any.
    pub fn take_legacy(&self) -> Option<LegacySettings> {
        self.lock().legacy.take()
    }

    pub fn settings(&self) -> SettingsFile {
        self.lock().settings.clone()
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.lock().settings.profiles.clone()
    }

    pub fn profile(&self, id: &ProfileId) -> Option<Profile> {
        self.lock().settings.profile(id).cloned()
    }

    pub fn active_profile(&self) -> Option<Profile> {
        self.lock().settings.active_profile().cloned()
    }

    pub fn active_profile_id(&self) -> Option<ProfileId> {
        self.lock().settings.active_profile().map(|p| p.id)
    }

    #[cfg(test)]
    pub fn display_mode(&self) -> DisplayMode {
        self.lock().settings.display_mode
    }

    pub fn refresh_targets(&self) -> Vec<Profile> {
        self.lock()
            .settings
            .refresh_targets()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Applies `change` and persists the result atomically.
    ///
    /// Reserved for the lifecycle manager; other components use the narrow
    /// `record_*` write paths.
    pub(crate) fn mutate<F, R>(&self, change: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut SettingsFile) -> R,
    {
        self.try_mutate(|settings| Ok::<R, StorageError>(change(settings)))
    }

    /// Like `mutate`, but nothing is written when `change` fails.
    pub(crate) fn try_mutate<F, R, E>(&self, change: F) -> Result<R, E>
    where
        F: FnOnce(&mut SettingsFile) -> Result<R, E>,
        E: From<StorageError>,
    {
        let mut state = self.lock();
        let lock = open_lock(&self.lock_path)?;
        lock.lock_exclusive()
            .map_err(|e| StorageError::write(&self.lock_path, e))?;

        let current = match parse_settings_file(&self.settings_path) {
            Ok(loaded) => loaded.settings,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Could not re-read settings; applying change to cached copy");
                state.settings.clone()
            }
        };
        let mut next = current.clone();
        let result = match change(&mut next) {
            Ok(result) => result,
            Err(e) => {
                state.settings = current;
                return Err(e);
            }
        };
        write_settings(&self.settings_path, &next)?;
        drop(lock);
        state.settings = next;
        Ok(result)
    }

    /// Stores a fresh snapshot for the profile with this id.
    ///
    /// Returns `false` without writing when the profile no longer exists.
    pub fn record_snapshot(
        &self,
        id: &ProfileId,
        snapshot: UsageSnapshot,
    ) -> Result<bool, StorageError> {
        self.mutate(|settings| match settings.profile_mut(id) {
            Some(profile) => {
                profile.apply_snapshot(snapshot);
                true
            }
            None => false,
        })
    }

    /// Stores the session reset time captured by an auto-start.
    pub fn record_auto_start_reset(
        &self,
        id: &ProfileId,
        resets_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        self.mutate(|settings| match settings.profile_mut(id) {
            Some(profile) => {
                profile.auto_start_reset_at = resets_at;
                true
            }
            None => false,
        })
    }
}

fn open_lock(lock_path: &Path) -> Result<File, StorageError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::write(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .map_err(|e| StorageError::write(lock_path, e))
}

fn read_settings(path: &Path, lock_path: &Path) -> Result<Loaded, StorageError> {
    if !path.exists() {
        return Ok(Loaded {
            settings: SettingsFile::default(),
            legacy: None,
        });
    }

    let lock = open_lock(lock_path)?;
    lock.lock_shared()
        .map_err(|e| StorageError::read(lock_path, e))?;
    let loaded = parse_settings_file(path);
    drop(lock);
    loaded
}

/// Reads and decodes `settings.json`. The caller holds the advisory lock.
fn parse_settings_file(path: &Path) -> Result<Loaded, StorageError> {
    if !path.exists() {
        return Ok(Loaded {
            settings: SettingsFile::default(),
            legacy: None,
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| StorageError::read(path, e))?;

    if content.trim().is_empty() {
        return Ok(Loaded {
            settings: SettingsFile::default(),
            legacy: None,
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| StorageError::decode("settings", e))?;

    if let Some(legacy) = LegacySettings::detect(&value) {
        tracing::info!(path = %path.display(), "Found pre-profile settings");
        return Ok(Loaded {
            settings: SettingsFile::default(),
            legacy: Some(legacy),
        });
    }

    let settings: SettingsFile =
        serde_json::from_value(value).map_err(|e| StorageError::decode("settings", e))?;
    Ok(Loaded {
        settings,
        legacy: None,
    })
}

/// Atomically replaces `settings.json`. The caller holds the exclusive lock.
fn write_settings(path: &Path, settings: &SettingsFile) -> Result<(), StorageError> {
    let content =
        serde_json::to_string_pretty(settings).map_err(|e| StorageError::encode("settings", e))?;

    let dir = path
        .parent()
        .ok_or_else(|| StorageError::write(path, "path has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::write(path, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| StorageError::write(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::write(path, e.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
