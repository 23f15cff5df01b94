//! Profile lifecycle: create, rename, delete, select, activate, and the
//! settings and credential edits that go with them.
//!
//! Identity and activation fields of a profile are written only from here.
//! Activation is serialized: a second activation while one is in flight is
//! rejected, never queued.

use super::migration::LEGACY_SECRET_ACCOUNT;
use super::store::ProfileStore;
use super::types::{
    clamp_refresh_interval, DisplayConfig, DisplayMode, NotificationThresholds, Profile, ProfileId,
};
use crate::error::{CredentialError, ProfileError, StorageError};
use crate::events::{EngineEvent, EventBus, RefreshTrigger};
use crate::secrets::{run_blocking, CliCredentialStore, CliOAuthBlob, CredentialVault, SessionKey};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 64;

pub struct ProfileManager {
    store: Arc<ProfileStore>,
    vault: CredentialVault,
    cli_store: Option<Arc<dyn CliCredentialStore>>,
    events: EventBus,
    activation: tokio::sync::Mutex<()>,
}

impl ProfileManager {
    pub fn new(
        store: Arc<ProfileStore>,
        vault: CredentialVault,
        cli_store: Option<Arc<dyn CliCredentialStore>>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            vault,
            cli_store,
            events,
            activation: tokio::sync::Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Guarantees at least one profile and a valid active id.
    ///
    /// Pre-profile settings found at open are migrated into a "Default"
    /// profile together with their legacy secret entry.
    pub fn bootstrap(&self) -> Result<Profile, ProfileError> {
        if let Some(legacy) = self.store.take_legacy() {
            let profile = legacy.into_profile();
            let id = profile.id;
            if let Some(set) = self.vault.load_account(LEGACY_SECRET_ACCOUNT)? {
                self.vault.save(&id, &set)?;
                if let Err(e) = self.vault.delete_account(LEGACY_SECRET_ACCOUNT) {
                    warn!(error = %e, "Failed to remove migrated legacy credentials");
                }
            }
            self.store.mutate(|settings| {
                settings.profiles.push(profile);
                settings.active_profile_id = Some(id);
            })?;
            info!(profile_id = %id, "Migrated pre-profile settings into Default profile");
        }

        let settings = self.store.settings();
        if settings.profiles.is_empty() {
            let profile = Profile {
                selected: true,
                last_used: Some(Utc::now()),
                ..Profile::new(super::migration::DEFAULT_PROFILE_NAME)
            };
            let id = profile.id;
            self.store.mutate(|settings| {
                settings.profiles.push(profile);
                settings.active_profile_id = Some(id);
            })?;
            info!(profile_id = %id, "Created initial profile");
        } else if settings
            .active_profile_id
            .and_then(|id| settings.profile(&id))
            .is_none()
        {
            let first = settings.profiles[0].id;
            warn!(profile_id = %first, "Active profile missing, falling back to first profile");
            self.store
                .mutate(|settings| settings.active_profile_id = Some(first))?;
        }

        self.store
            .active_profile()
            .ok_or_else(|| ProfileError::NotFound("active profile".to_string()))
    }

    fn validate_name(&self, name: &str, exclude: Option<ProfileId>) -> Result<String, ProfileError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
            return Err(ProfileError::InvalidName(name.to_string()));
        }
        let taken = self
            .store
            .profiles()
            .iter()
            .any(|p| Some(p.id) != exclude && p.name.eq_ignore_ascii_case(trimmed));
        if taken {
            return Err(ProfileError::InvalidName(format!("{} (already exists)", trimmed)));
        }
        Ok(trimmed.to_string())
    }

    fn generated_name(&self) -> String {
        let profiles = self.store.profiles();
        (profiles.len() + 1..)
            .map(|n| format!("Profile {}", n))
            .find(|candidate| !profiles.iter().any(|p| p.name.eq_ignore_ascii_case(candidate)))
            .unwrap_or_else(|| format!("Profile {}", ProfileId::new()))
    }

    /// Creates a profile, optionally copying settings (never credentials or
    /// usage) from an existing one.
    pub fn create(
        &self,
        name: Option<&str>,
        copy_from: Option<ProfileId>,
    ) -> Result<Profile, ProfileError> {
        let name = match name {
            Some(name) => self.validate_name(name, None)?,
            None => self.generated_name(),
        };
        let mut profile = Profile::new(&name);
        if let Some(source_id) = copy_from {
            let source = self
                .store
                .profile(&source_id)
                .ok_or_else(|| ProfileError::NotFound(source_id.to_string()))?;
            profile.display = source.display.clone();
            profile.refresh_interval_secs = source.refresh_interval_secs;
            profile.auto_start_session = source.auto_start_session;
            profile.thresholds = source.thresholds;
            profile.external_snapshot = source.external_snapshot.clone();
        }

        let created = profile.clone();
        self.store.mutate(|settings| settings.profiles.push(profile))?;
        info!(profile_id = %created.id, name = %created.name, "Created profile");
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(created)
    }

    pub fn rename(&self, id: ProfileId, name: &str) -> Result<(), ProfileError> {
        let name = self.validate_name(name, Some(id))?;
        self.edit_profile(id, |profile| profile.name = name)?;
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(())
    }

    /// Deletes a profile and purges its credential set.
    ///
    /// The last remaining profile cannot be deleted. Deleting the active
    /// profile hands activation to the first remaining one. Shares the
    /// activation lock, so it is rejected while a switch is in flight.
    pub async fn delete(&self, id: ProfileId) -> Result<(), ProfileError> {
        let _guard = self
            .activation
            .try_lock()
            .map_err(|_| ProfileError::ActivationInProgress)?;

        let successor = self.store.try_mutate(|settings| {
            if settings.profile(&id).is_none() {
                return Err(ProfileError::NotFound(id.to_string()));
            }
            if settings.profiles.len() <= 1 {
                return Err(ProfileError::LastProfile);
            }
            let was_active = settings.active_profile().map(|p| p.id) == Some(id);
            settings.profiles.retain(|p| p.id != id);
            if !was_active {
                return Ok(None);
            }
            settings.active_profile_id = settings.profiles.first().map(|p| p.id);
            Ok(settings.active_profile_id)
        })?;

        let vault = self.vault.clone();
        if let Err(e) = run_blocking(move || vault.delete(&id)).await {
            warn!(profile_id = %id, code = e.code(), error = %e, "Failed to purge credentials of deleted profile");
        }
        info!(profile_id = %id, "Deleted profile");
        self.events.publish(EngineEvent::ProfilesChanged);

        if let Some(to) = successor {
            // The deleted profile has nothing left to re-sync.
            self.hand_off(None, to).await?;
            self.announce_switch(Some(id), to);
        }
        Ok(())
    }

    /// Flips multi-display selection; returns the new state.
    pub fn toggle_selection(&self, id: ProfileId) -> Result<bool, ProfileError> {
        let selected = self.edit_profile(id, |profile| {
            profile.selected = !profile.selected;
            profile.selected
        })?;
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(selected)
    }

    pub fn set_display_mode(&self, mode: DisplayMode) -> Result<(), ProfileError> {
        self.store.mutate(|settings| settings.display_mode = mode)?;
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(())
    }

    /// Switches the active profile.
    ///
    /// Only the final persistence step is fatal; the credential hand-off
    /// steps log their failures and continue.
    pub async fn activate(&self, target: ProfileId) -> Result<(), ProfileError> {
        let _guard = self
            .activation
            .try_lock()
            .map_err(|_| ProfileError::ActivationInProgress)?;

        if self.store.profile(&target).is_none() {
            return Err(ProfileError::NotFound(target.to_string()));
        }
        let previous = self.store.active_profile_id();
        info!(from = ?previous.map(|id| id.to_string()), to = %target, "Activating profile");

        self.hand_off(previous.filter(|id| *id != target), target).await?;
        self.announce_switch(previous, target);
        Ok(())
    }

    /// Activation steps 1 to 4. The caller holds the activation lock.
    async fn hand_off(
        &self,
        outgoing: Option<ProfileId>,
        target: ProfileId,
    ) -> Result<(), ProfileError> {
        if let Some(outgoing) = outgoing {
            if let Err(e) = self.resync_outgoing_cli_credentials(outgoing).await {
                warn!(profile_id = %outgoing, code = e.code(), error = %e, "Could not re-sync CLI credentials before switching");
            }
        }

        let store = self.store.clone();
        if let Err(e) = run_blocking(move || store.reload()).await {
            warn!(code = e.code(), error = %e, "Could not reload settings during activation");
        }

        if let Err(e) = self.push_cli_credentials(target).await {
            warn!(profile_id = %target, code = e.code(), error = %e, "Could not hand CLI credentials to the system store");
        }

        self.store.try_mutate(|settings| {
            let profile = settings
                .profile_mut(&target)
                .ok_or_else(|| ProfileError::NotFound(target.to_string()))?;
            profile.last_used = Some(Utc::now());
            settings.active_profile_id = Some(target);
            Ok(())
        })
    }

    fn announce_switch(&self, from: Option<ProfileId>, to: ProfileId) {
        self.events.publish(EngineEvent::ProfileSwitched { from, to });
        self.events.publish(EngineEvent::RefreshRequested {
            profile_id: to,
            trigger: RefreshTrigger::Activation,
        });
        info!(profile_id = %to, "Profile activated");
    }

    /// Copies a newer CLI login from the system slot into the outgoing
    /// profile, so a login done outside the app is not lost on switch.
    async fn resync_outgoing_cli_credentials(&self, outgoing: ProfileId) -> Result<(), StorageError> {
        let Some(cli_store) = self.cli_store.clone() else {
            return Ok(());
        };
        let vault = self.vault.clone();
        run_blocking(move || {
            let set = vault.load(&outgoing)?;
            let Some(stored) = set.cli_credentials else {
                return Ok(());
            };
            let Some(current) = cli_store.read_blob()? else {
                debug!(profile_id = %outgoing, "System CLI slot empty, nothing to re-sync");
                return Ok(());
            };
            if current.trim() == stored.trim() || CliOAuthBlob::parse(&current).is_err() {
                return Ok(());
            }
            vault.update(&outgoing, |set| set.cli_credentials = Some(current))?;
            info!(profile_id = %outgoing, "Re-synced CLI credentials from system store");
            Ok(())
        })
        .await
    }

    async fn push_cli_credentials(&self, target: ProfileId) -> Result<(), StorageError> {
        let Some(cli_store) = self.cli_store.clone() else {
            return Ok(());
        };
        let vault = self.vault.clone();
        run_blocking(move || {
            let set = vault.load(&target)?;
            if let Some(blob) = set.cli_credentials {
                cli_store.write_blob(&blob)?;
                info!(profile_id = %target, "Wrote CLI credentials to system store");
            }
            Ok(())
        })
        .await
    }

    fn edit_profile<F, R>(&self, id: ProfileId, change: F) -> Result<R, ProfileError>
    where
        F: FnOnce(&mut Profile) -> R,
    {
        self.store
            .mutate(|settings| settings.profile_mut(&id).map(change))?
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    pub fn update_display<F>(&self, id: ProfileId, change: F) -> Result<DisplayConfig, ProfileError>
    where
        F: FnOnce(&mut DisplayConfig),
    {
        let display = self.edit_profile(id, |profile| {
            change(&mut profile.display);
            profile.display.clone()
        })?;
        self.events
            .publish(EngineEvent::DisplaySettingsChanged { profile_id: id });
        Ok(display)
    }

    /// Returns the interval actually stored after clamping.
    pub fn set_refresh_interval(&self, id: ProfileId, secs: u64) -> Result<u64, ProfileError> {
        let clamped = clamp_refresh_interval(secs);
        self.edit_profile(id, |profile| profile.refresh_interval_secs = clamped)?;
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(clamped)
    }

    pub fn set_auto_start(&self, id: ProfileId, enabled: bool) -> Result<(), ProfileError> {
        self.edit_profile(id, |profile| {
            profile.auto_start_session = enabled;
            if !enabled {
                profile.auto_start_reset_at = None;
            }
        })?;
        self.events.publish(EngineEvent::ProfilesChanged);
        Ok(())
    }

    pub fn set_threshold(&self, id: ProfileId, level: u8, enabled: bool) -> Result<(), ProfileError> {
        if !NotificationThresholds::LEVELS.contains(&level) {
            return Err(ProfileError::InvalidSetting(format!(
                "threshold {} (expected one of 75, 90, 95)",
                level
            )));
        }
        self.edit_profile(id, |profile| profile.thresholds.set(level, enabled))?;
        Ok(())
    }

    pub fn set_external_snapshot(
        &self,
        id: ProfileId,
        path: Option<PathBuf>,
    ) -> Result<(), ProfileError> {
        self.edit_profile(id, |profile| profile.external_snapshot = path)?;
        self.credentials_changed(id);
        Ok(())
    }

    fn credentials_changed(&self, id: ProfileId) {
        self.events
            .publish(EngineEvent::CredentialsChanged { profile_id: id });
        self.events.publish(EngineEvent::RefreshRequested {
            profile_id: id,
            trigger: RefreshTrigger::CredentialsChanged,
        });
    }

    fn require_profile(&self, id: ProfileId) -> Result<(), ProfileError> {
        self.store
            .profile(&id)
            .map(|_| ())
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    /// Validates and stores a web session key with its organization.
    pub async fn set_session_key(
        &self,
        id: ProfileId,
        raw_key: &str,
        organization_id: Option<String>,
    ) -> Result<(), ProfileError> {
        self.require_profile(id)?;
        let key = SessionKey::parse(raw_key)?;
        let vault = self.vault.clone();
        run_blocking(move || {
            vault.update(&id, |set| {
                set.session_key = Some(key);
                if organization_id.is_some() {
                    set.organization_id = organization_id;
                }
            })
        })
        .await?;
        info!(profile_id = %id, "Saved session key");
        self.credentials_changed(id);
        Ok(())
    }

    pub async fn set_organization(&self, id: ProfileId, organization_id: String) -> Result<(), ProfileError> {
        self.require_profile(id)?;
        let vault = self.vault.clone();
        run_blocking(move || vault.update(&id, |set| set.organization_id = Some(organization_id)))
            .await?;
        self.credentials_changed(id);
        Ok(())
    }

    pub async fn set_api_key(
        &self,
        id: ProfileId,
        api_key: &str,
        organization_id: Option<String>,
    ) -> Result<(), ProfileError> {
        self.require_profile(id)?;
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() || api_key.contains(char::is_whitespace) {
            return Err(CredentialError::InvalidFormat("API key is empty or has whitespace".to_string()).into());
        }
        let vault = self.vault.clone();
        run_blocking(move || {
            vault.update(&id, |set| {
                set.api_key = Some(api_key);
                set.api_organization_id = organization_id;
            })
        })
        .await?;
        info!(profile_id = %id, "Saved API key");
        self.events
            .publish(EngineEvent::CredentialsChanged { profile_id: id });
        Ok(())
    }

    /// Copies the current CLI login from the system slot into the profile.
    pub async fn import_cli_credentials(&self, id: ProfileId) -> Result<(), ProfileError> {
        self.require_profile(id)?;
        let cli_store = self
            .cli_store
            .clone()
            .ok_or(CredentialError::NotFound)?;
        let blob = run_blocking(move || cli_store.read_blob())
            .await?
            .ok_or(CredentialError::NotFound)?;
        let parsed = CliOAuthBlob::parse(&blob)?;
        parsed.usable_token(Utc::now())?;

        let vault = self.vault.clone();
        run_blocking(move || vault.update(&id, |set| set.cli_credentials = Some(blob))).await?;
        info!(profile_id = %id, "Imported CLI credentials");
        self.credentials_changed(id);
        Ok(())
    }

    pub async fn clear_credentials(&self, id: ProfileId) -> Result<(), ProfileError> {
        self.require_profile(id)?;
        let vault = self.vault.clone();
        run_blocking(move || vault.delete(&id)).await?;
        info!(profile_id = %id, "Cleared credentials");
        self.events
            .publish(EngineEvent::CredentialsChanged { profile_id: id });
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
mod tests;
