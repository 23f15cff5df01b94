//! System light/dark detection for `run` without a fixed appearance.
//!
//! macOS reports dark mode through the global `AppleInterfaceStyle` default
//! (absent in light mode); GNOME-style desktops through the
//! `color-scheme` key read with `gsettings`.

use super::Appearance;
use crate::events::{EngineEvent, EventBus};
use std::process::Command;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub const APPEARANCE_POLL_INTERVAL: Duration = Duration::from_secs(5);

fn parse_macos_style(stdout: &str) -> Appearance {
    if stdout.trim().eq_ignore_ascii_case("dark") {
        Appearance::Dark
    } else {
        Appearance::Light
    }
}

fn parse_color_scheme(stdout: &str) -> Option<Appearance> {
    match stdout.trim().trim_matches('\'') {
        "prefer-dark" => Some(Appearance::Dark),
        "default" | "prefer-light" => Some(Appearance::Light),
        _ => None,
    }
}

/// Reads the current system appearance. Blocking; `None` when unknown.
pub fn detect() -> Option<Appearance> {
    if cfg!(target_os = "macos") {
        let output = Command::new("defaults")
            .args(["read", "-g", "AppleInterfaceStyle"])
            .output()
            .ok()?;
        return Some(parse_macos_style(&String::from_utf8_lossy(&output.stdout)));
    }
    let gsettings = which::which("gsettings").ok()?;
    let output = Command::new(gsettings)
        .args(["get", "org.gnome.desktop.interface", "color-scheme"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_color_scheme(&String::from_utf8_lossy(&output.stdout))
}

/// `detect` on the blocking pool.
pub async fn detect_async() -> Option<Appearance> {
    tokio::task::spawn_blocking(detect).await.ok().flatten()
}

/// Polls the system appearance and publishes `AppearanceChanged` on change.
pub async fn watch(
    mut current: Appearance,
    events: EventBus,
    poll: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    debug!(appearance = ?current, "Following system appearance");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let Some(detected) = detect_async().await else {
                    continue;
                };
                if detected != current {
                    info!(appearance = ?detected, "System appearance changed");
                    current = detected;
                    events.publish(EngineEvent::AppearanceChanged(detected));
                }
            }
        }
    }
}
