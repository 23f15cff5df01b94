//! CLI command handlers and the long-running engine wiring.

use crate::app_paths::AppPaths;
use crate::auth::AuthResolver;
use crate::auto_start::AutoStartMonitor;
use crate::cli::{Command, CredentialsCommand, ProfileCommand, SettingsCommand};
use crate::config::EngineConfig;
use crate::events::{EventBus, RefreshTrigger};
use crate::notifications::{default_notifier, NotificationDispatcher};
use crate::profiles::{DisplayMode, Profile, ProfileId, ProfileManager, ProfileStore};
use crate::refresh::{RefreshEngine, RefreshOutcome, RefreshScheduler};
use crate::render::appearance as system_appearance;
use crate::render::{Appearance, RenderCache, RenderKey, Redrawer};
use crate::secrets::system::detect_cli_store;
use crate::secrets::{
    detect_vault_store, run_blocking, CliCredentialStore, CredentialVault, SecretStore,
};
use crate::statusline::StatuslineExporter;
use crate::usage::{
    format_countdown, ClaudeApi, PaceStatus, Transport, UreqTransport, UsageFetcher,
    UsageSnapshot, UsageWindow,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Everything a command needs, wired once per process.
pub struct AppContext {
    pub paths: AppPaths,
    pub config: EngineConfig,
    pub events: EventBus,
    pub store: Arc<ProfileStore>,
    pub manager: ProfileManager,
    pub fetcher: UsageFetcher,
    pub engine: Arc<RefreshEngine>,
}

impl AppContext {
    /// Production wiring: the OS secret store (files as fallback), the
    /// platform CLI slot and ureq.
    pub fn open(paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = EngineConfig::load(&paths)?;
        let secrets = detect_vault_store(&paths.secrets_dir());
        let transport: Arc<dyn Transport> = Arc::new(UreqTransport::new(config.request_timeout()));
        Self::from_parts(paths, config, secrets, detect_cli_store(), transport)
    }

    pub fn from_parts(
        paths: AppPaths,
        config: EngineConfig,
        secrets: Arc<dyn SecretStore>,
        cli_store: Option<Arc<dyn CliCredentialStore>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let events = EventBus::new();
        let store = Arc::new(ProfileStore::open(&paths)?);
        let vault = CredentialVault::new(secrets);
        let manager = ProfileManager::new(store.clone(), vault.clone(), cli_store.clone(), events.clone());
        manager.bootstrap()?;

        let api = ClaudeApi::new(transport, config.api.clone(), config.request_timeout());
        let fetcher = UsageFetcher::new(
            api,
            AuthResolver::new(vault, cli_store),
            config.external_snapshot_max_age(),
        );
        let engine = Arc::new(RefreshEngine::new(
            store.clone(),
            fetcher.clone(),
            events.clone(),
            config.retry.clone(),
            config.breaker_threshold,
            config.user_action_window(),
        ));
        Ok(Self {
            paths,
            config,
            events,
            store,
            manager,
            fetcher,
            engine,
        })
    }

    /// Finds a profile by id or case-insensitive name; `None` means active.
    pub fn profile(&self, selector: Option<&str>) -> Result<Profile> {
        let Some(selector) = selector else {
            return self
                .store
                .active_profile()
                .context("No active profile");
        };
        let profiles = self.store.profiles();
        if let Some(id) = ProfileId::parse(selector) {
            if let Some(profile) = profiles.iter().find(|p| p.id == id) {
                return Ok(profile.clone());
            }
        }
        profiles
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(selector.trim()))
            .with_context(|| format!("No profile named '{}'", selector))
    }
}

#[derive(Debug, Serialize)]
struct StatusRow {
    id: ProfileId,
    name: String,
    active: bool,
    selected: bool,
    auto_start_session: bool,
    auto_start_reset_at: Option<DateTime<Utc>>,
    refresh_interval_secs: u64,
    snapshot: Option<UsageSnapshot>,
    history_len: usize,
}

fn pace_label(pace: PaceStatus) -> &'static str {
    match pace {
        PaceStatus::Ahead => "ahead of pace",
        PaceStatus::OnTrack => "on track",
        PaceStatus::Behind => "behind pace",
        PaceStatus::Unknown => "pace unknown",
    }
}

fn window_line(label: &str, window: &UsageWindow, now: DateTime<Utc>) -> String {
    format!(
        "    {:<8} {:>3.0}% used, resets in {} ({})",
        label,
        window.utilization,
        format_countdown(window.time_until_reset(now)),
        pace_label(window.pace(now))
    )
}

fn write_status(ctx: &AppContext, json: bool, out: &mut dyn Write) -> Result<()> {
    let settings = ctx.store.settings();
    let active = settings.active_profile().map(|p| p.id);
    if json {
        let rows: Vec<StatusRow> = settings
            .profiles
            .iter()
            .map(|p| StatusRow {
                id: p.id,
                name: p.name.clone(),
                active: Some(p.id) == active,
                selected: p.selected,
                auto_start_session: p.auto_start_session,
                auto_start_reset_at: p.auto_start_reset_at,
                refresh_interval_secs: p.refresh_interval().as_secs(),
                snapshot: p.snapshot.clone(),
                history_len: p.history.len(),
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    let now = Utc::now();
    let mode = match settings.display_mode {
        DisplayMode::Single => "single",
        DisplayMode::Multi => "multi",
    };
    writeln!(out, "Display mode: {}", mode)?;
    for profile in &settings.profiles {
        let marker = if Some(profile.id) == active { "*" } else { " " };
        let selected = if profile.selected { " [selected]" } else { "" };
        writeln!(out, "{} {}{}", marker, profile.name, selected)?;
        match &profile.snapshot {
            Some(snapshot) => {
                writeln!(out, "{}", window_line("session", &snapshot.session, now))?;
                writeln!(out, "{}", window_line("weekly", &snapshot.weekly, now))?;
                if profile.display.show_sub_metrics {
                    for metric in &snapshot.sub_metrics {
                        writeln!(out, "{}", window_line(&metric.label(), &metric.window, now))?;
                    }
                }
                if let Some(credits) = &snapshot.credits {
                    let balance = match (credits.unlimited, credits.balance) {
                        (true, _) => "unlimited".to_string(),
                        (false, Some(balance)) => format!("{:.2}", balance),
                        (false, None) if credits.has_credits => "available".to_string(),
                        (false, None) => "none".to_string(),
                    };
                    writeln!(out, "    credits  {}", balance)?;
                }
                let age = snapshot.age(now).num_seconds().max(0) as u64;
                writeln!(
                    out,
                    "    fetched {} ago",
                    format_countdown(Some(std::time::Duration::from_secs(age)))
                )?;
            }
            None => writeln!(out, "    no usage fetched yet")?,
        }
    }
    Ok(())
}

fn describe_outcome(name: &str, outcome: &RefreshOutcome) -> String {
    match outcome {
        RefreshOutcome::Updated(snapshot) => format!(
            "{}: session {:.0}%, weekly {:.0}%",
            name,
            snapshot.session_percent(),
            snapshot.weekly_percent()
        ),
        RefreshOutcome::Coalesced => format!("{}: refresh already in progress", name),
        RefreshOutcome::Failed(e) => format!("{}: {} ({})", name, e, e.code()),
        RefreshOutcome::ProfileGone => format!("{}: profile was deleted", name),
    }
}

/// Runs every command except `run`.
pub async fn execute(ctx: &AppContext, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Run { .. } => bail!("run is handled by run_engine"),
        Command::Status { json } => write_status(ctx, json, out)?,
        Command::Refresh { profile, all } => {
            let outcomes = if all {
                ctx.engine.refresh_targets(RefreshTrigger::Manual).await
            } else {
                let id = ctx.profile(profile.as_deref())?.id;
                vec![(id, ctx.engine.refresh(id, RefreshTrigger::Manual).await)]
            };
            let mut failed = false;
            for (id, outcome) in &outcomes {
                let name = ctx.store.profile(id).map(|p| p.name).unwrap_or_else(|| id.to_string());
                failed |= matches!(outcome, RefreshOutcome::Failed(_));
                writeln!(out, "{}", describe_outcome(&name, outcome))?;
            }
            if failed {
                bail!("One or more refreshes failed");
            }
        }
        Command::Render {
            profile,
            appearance,
            output,
        } => {
            let profile = ctx.profile(profile.as_deref())?;
            let percent = profile.snapshot.as_ref().map(|s| s.session_percent()).unwrap_or(0.0);
            let key = RenderKey::new(percent, appearance, &profile.display);
            RenderCache::new().render(&key).save_png(&output)?;
            writeln!(out, "Wrote {}", output.display())?;
        }
        Command::Orgs { profile } => {
            let profile = ctx.profile(profile.as_deref())?;
            let vault = ctx.manager.vault().clone();
            let set = run_blocking(move || vault.load(&profile.id)).await?;
            let key = set
                .session_key
                .context("Profile has no session key; set one with `credentials set --session-key`")?;
            for org in ctx.fetcher.api().list_organizations(&key).await? {
                writeln!(out, "{}  {}", org.uuid, org.name)?;
            }
        }
        Command::Billing { profile } => {
            let profile = ctx.profile(profile.as_deref())?;
            let vault = ctx.manager.vault().clone();
            let set = run_blocking(move || vault.load(&profile.id)).await?;
            let (Some(api_key), Some(org)) = (set.api_key, set.api_organization_id) else {
                bail!("Profile has no API key with an organization id");
            };
            let balance = ctx.fetcher.api().fetch_billing(&api_key, &org).await?;
            writeln!(
                out,
                "{:.2} {}",
                balance.balance,
                balance.currency.as_deref().unwrap_or("")
            )?;
        }
        Command::Profile(cmd) => profile_command(ctx, cmd, out).await?,
        Command::Credentials(cmd) => credentials_command(ctx, cmd, out).await?,
        Command::Settings(cmd) => settings_command(ctx, cmd, out)?,
    }
    Ok(())
}

async fn profile_command(ctx: &AppContext, cmd: ProfileCommand, out: &mut dyn Write) -> Result<()> {
    match cmd {
        ProfileCommand::List => {
            let active = ctx.store.active_profile_id();
            for p in ctx.store.profiles() {
                let marker = if Some(p.id) == active { "*" } else { " " };
                writeln!(out, "{} {}  {}", marker, p.id, p.name)?;
            }
        }
        ProfileCommand::Create { name, copy_from } => {
            let source = match copy_from {
                Some(selector) => Some(ctx.profile(Some(&selector))?.id),
                None => None,
            };
            let created = ctx.manager.create(name.as_deref(), source)?;
            writeln!(out, "Created {} ({})", created.name, created.id)?;
        }
        ProfileCommand::Rename { profile, name } => {
            let id = ctx.profile(Some(&profile))?.id;
            ctx.manager.rename(id, &name)?;
        }
        ProfileCommand::Delete { profile } => {
            let id = ctx.profile(Some(&profile))?.id;
            ctx.manager.delete(id).await?;
        }
        ProfileCommand::Activate { profile } => {
            let id = ctx.profile(Some(&profile))?.id;
            ctx.manager.activate(id).await?;
        }
        ProfileCommand::Select { profile } => {
            let id = ctx.profile(Some(&profile))?.id;
            let selected = ctx.manager.toggle_selection(id)?;
            writeln!(out, "{}", if selected { "selected" } else { "deselected" })?;
        }
    }
    Ok(())
}

async fn credentials_command(
    ctx: &AppContext,
    cmd: CredentialsCommand,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        CredentialsCommand::Set {
            profile,
            session_key,
            org,
            api_key,
            api_org,
        } => {
            let id = ctx.profile(profile.as_deref())?.id;
            if session_key.is_none() && org.is_none() && api_key.is_none() {
                bail!("Nothing to set; pass --session-key, --org or --api-key");
            }
            match (session_key, org) {
                (Some(key), org) => ctx.manager.set_session_key(id, &key, org).await?,
                (None, Some(org)) => ctx.manager.set_organization(id, org).await?,
                (None, None) => {}
            }
            if let Some(api_key) = api_key {
                ctx.manager.set_api_key(id, &api_key, api_org).await?;
            }
            writeln!(out, "Saved credentials")?;
        }
        CredentialsCommand::ImportCli { profile } => {
            let id = ctx.profile(profile.as_deref())?.id;
            ctx.manager.import_cli_credentials(id).await?;
            writeln!(out, "Imported CLI login")?;
        }
        CredentialsCommand::Clear { profile } => {
            let id = ctx.profile(profile.as_deref())?.id;
            ctx.manager.clear_credentials(id).await?;
        }
    }
    Ok(())
}

fn settings_command(ctx: &AppContext, cmd: SettingsCommand, out: &mut dyn Write) -> Result<()> {
    match cmd {
        SettingsCommand::Display {
            profile,
            style,
            monochrome,
            remaining,
            show_weekly,
            show_sub_metrics,
        } => {
            let id = ctx.profile(profile.as_deref())?.id;
            let display = ctx.manager.update_display(id, |d| {
                if let Some(style) = style {
                    d.style = style;
                }
                if let Some(v) = monochrome {
                    d.monochrome = v;
                }
                if let Some(v) = remaining {
                    d.remaining_mode = v;
                }
                if let Some(v) = show_weekly {
                    d.show_weekly = v;
                }
                if let Some(v) = show_sub_metrics {
                    d.show_sub_metrics = v;
                }
            })?;
            writeln!(out, "{}", serde_json::to_string(&display)?)?;
        }
        SettingsCommand::Interval { profile, secs } => {
            let id = ctx.profile(profile.as_deref())?.id;
            let stored = ctx.manager.set_refresh_interval(id, secs)?;
            writeln!(out, "Refresh interval: {}s", stored)?;
        }
        SettingsCommand::AutoStart { profile, enabled } => {
            let id = ctx.profile(profile.as_deref())?.id;
            ctx.manager.set_auto_start(id, enabled)?;
        }
        SettingsCommand::Thresholds {
            profile,
            level,
            enabled,
        } => {
            let id = ctx.profile(profile.as_deref())?.id;
            ctx.manager.set_threshold(id, level, enabled)?;
        }
        SettingsCommand::Mode { mode } => ctx.manager.set_display_mode(mode)?,
        SettingsCommand::External {
            profile,
            path,
            clear,
        } => {
            let id = ctx.profile(profile.as_deref())?.id;
            let path = if clear {
                None
            } else {
                Some(
                    path.or_else(crate::app_paths::default_external_snapshot_path)
                        .context("No snapshot path given and no default location")?,
                )
            };
            ctx.manager.set_external_snapshot(id, path)?;
        }
    }
    Ok(())
}

/// Runs the engine until Ctrl-C. Without a fixed appearance the icon
/// follows the system light/dark setting.
pub async fn run_engine(ctx: AppContext, fixed_appearance: Option<Appearance>) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let appearance = match fixed_appearance {
        Some(appearance) => appearance,
        None => system_appearance::detect_async().await.unwrap_or_default(),
    };
    let cache = Arc::new(RenderCache::new());

    let scheduler = RefreshScheduler::new(ctx.engine.clone(), ctx.events.clone());
    let monitor = Arc::new(AutoStartMonitor::new(
        ctx.store.clone(),
        ctx.engine.clone(),
        ctx.events.clone(),
        ctx.config.auto_start.clone(),
    ));
    let redrawer = Redrawer::new(
        ctx.store.clone(),
        cache.clone(),
        appearance,
        ctx.config.redraw_debounce(),
    );
    let mut frames = redrawer.subscribe();
    let dispatcher = NotificationDispatcher::new(ctx.store.clone(), default_notifier());
    let exporter = StatuslineExporter::new(
        ctx.store.clone(),
        cache,
        appearance,
        ctx.paths.statusline_path(),
    );
    if let Err(e) = exporter.export() {
        warn!(code = e.code(), error = %e, "Initial statusline export failed");
    }

    let mut tasks = vec![
        tokio::spawn(redrawer.run(ctx.events.subscribe(), shutdown_tx.subscribe())),
        tokio::spawn(dispatcher.run(ctx.events.subscribe(), shutdown_tx.subscribe())),
        tokio::spawn(exporter.run(ctx.events.subscribe(), shutdown_tx.subscribe())),
        tokio::spawn(scheduler.run(shutdown_tx.subscribe())),
        tokio::spawn(monitor.run(shutdown_tx.subscribe())),
    ];
    if fixed_appearance.is_none() {
        tasks.push(tokio::spawn(system_appearance::watch(
            appearance,
            ctx.events.clone(),
            system_appearance::APPEARANCE_POLL_INTERVAL,
            shutdown_tx.subscribe(),
        )));
    }

    let mut frames_shutdown = shutdown_tx.subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = frames_shutdown.recv() => break,
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let rendered = frames.borrow_and_update().clone();
                    for frame in &rendered.frames {
                        debug!(
                            generation = rendered.generation,
                            profile_id = %frame.profile_id,
                            profile = %frame.profile_name,
                            bucket = frame.key.bucket,
                            size = frame.bitmap.width(),
                            "Status icon updated"
                        );
                    }
                }
            }
        }
    }));

    info!(home = %ctx.paths.root().display(), "meterbar running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    for report in ctx.engine.breaker_report().iter().filter(|r| r.open) {
        warn!(
            profile_id = %report.profile_id,
            domain = report.domain.as_str(),
            consecutive_failures = report.consecutive_failures,
            last_failure = %report.last_failure,
            "Circuit breaker open at shutdown"
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
