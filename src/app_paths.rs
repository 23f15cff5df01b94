//! Storage paths for all meterbar persistence.
//!
//! Everything lives under one home directory (`~/.meterbar/` unless
//! `METERBAR_HOME` is set):
//! - `settings.json` - Profile list, active profile, display mode
//! - `settings.lock` - Advisory lock guarding settings writes
//! - `secrets/` - Per-profile credential sets (owner-only permissions)
//! - `config.yaml` - Engine tuning
//! - `statusline.json` - Export consumed by statusline scripts
//! - `logs/meterbar.log` - Background log

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the meterbar directory under the user's home.
const METERBAR_DIR: &str = ".meterbar";

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "METERBAR_HOME";

/// Resolved storage layout rooted at one directory.
///
/// Passed explicitly to every store so tests can point the whole engine at a
/// temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Uses `root` as the home directory without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the default home: `$METERBAR_HOME`, then `~/.meterbar/`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(dir)));
        }
        let home =
            dirs::home_dir().context("Could not determine home directory for meterbar storage")?;
        Ok(Self::new(home.join(METERBAR_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the home, secrets and logs directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.secrets_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Returns the settings path: `<home>/settings.json`
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Returns the settings lock path: `<home>/settings.lock`
    pub fn settings_lock_path(&self) -> PathBuf {
        self.root.join("settings.lock")
    }

    /// Returns the secrets directory: `<home>/secrets/`
    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    /// Returns the engine config path: `<home>/config.yaml`
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Returns the statusline export path: `<home>/statusline.json`
    pub fn statusline_path(&self) -> PathBuf {
        self.root.join("statusline.json")
    }

    /// Returns the logs directory: `<home>/logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Returns the background log path: `<home>/logs/meterbar.log`
    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join("meterbar.log")
    }
}

/// Returns the default path of the out-of-process tracker's snapshot file:
/// `~/.codex/usage_tracker/latest_snapshot.json`
pub fn default_external_snapshot_path() -> Option<PathBuf> {
    let codex_home = std::env::var("CODEX_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::home_dir().map(|h| h.join(".codex")))?;
    Some(codex_home.join("usage_tracker").join("latest_snapshot.json"))
}
