use super::*;
use crate::app_paths::AppPaths;
use crate::auth::AuthResolver;
use crate::config::ApiEndpoints;
use crate::error::{ApiError, CredentialError, NetworkError};
use crate::profiles::DisplayMode;
use crate::render::{Appearance, RenderCache, RenderKey};
use crate::secrets::memory_store::MemorySecretStore;
use crate::secrets::{CredentialVault, SessionKey};
use crate::testing::{usage_body, ScriptedTransport};
use crate::usage::api_client::Method;
use crate::usage::ClaudeApi;
use chrono::SecondsFormat;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Harness {
    _dir: TempDir,
    store: Arc<ProfileStore>,
    vault: CredentialVault,
    transport: Arc<ScriptedTransport>,
    events: EventBus,
    engine: Arc<RefreshEngine>,
    profile_id: ProfileId,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let paths = AppPaths::new(dir.path().to_path_buf());
    paths.ensure_dirs().unwrap();
    let store = Arc::new(ProfileStore::open(&paths).unwrap());
    let profile = Profile::new("Work");
    let profile_id = profile.id;
    store
        .mutate(|settings| {
            settings.profiles.push(profile);
            settings.active_profile_id = Some(profile_id);
        })
        .unwrap();

    let vault = CredentialVault::new(Arc::new(MemorySecretStore::new()));
    let transport = Arc::new(ScriptedTransport::new());
    let api = ClaudeApi::new(transport.clone(), ApiEndpoints::default(), Duration::from_secs(5));
    let fetcher = UsageFetcher::new(
        api,
        AuthResolver::new(vault.clone(), None),
        Duration::from_secs(300),
    );
    let events = EventBus::new();
    let retry = RetryPolicy {
        max_retries: 2,
        backoff_ms: 0,
        jitter_ms: 0,
    };
    let engine = Arc::new(RefreshEngine::new(
        store.clone(),
        fetcher,
        events.clone(),
        retry,
        3,
        Duration::from_secs(10),
    ));
    let h = Harness {
        _dir: dir,
        store,
        vault,
        transport,
        events,
        engine,
        profile_id,
    };
    h.give_session_key(profile_id);
    h
}

impl Harness {
    fn give_session_key(&self, id: ProfileId) {
        self.vault
            .update(&id, |set| {
                set.session_key = Some(SessionKey::parse("sk-ant-REDACTED").unwrap());
                set.organization_id = Some("org-1".to_string());
            })
            .unwrap();
    }

    fn stored_snapshot(&self) -> Option<UsageSnapshot> {
        self.store.profile(&self.profile_id).unwrap().snapshot
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_end_to_end_snapshot_and_render_bucket() {
    let h = harness();
    let resets_at = Utc::now() + chrono::Duration::hours(2);
    let body = format!(
        r#"{{"five_hour":{{"utilization":42,"resets_at":"{}"}}}}"#,
        resets_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    h.transport.respond(Method::Get, "/usage", 200, &body);
    let mut rx = h.events.subscribe();

    let outcome = h.engine.refresh(h.profile_id, RefreshTrigger::Manual).await;
    assert!(matches!(outcome, RefreshOutcome::Updated(_)));

    let stored = h.stored_snapshot().unwrap();
    assert_eq!(stored.session_percent(), 42.0);
    assert_eq!(
        stored.session.resets_at.map(|t| t.timestamp()),
        Some(resets_at.timestamp())
    );
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, EngineEvent::SnapshotUpdated { profile_id, .. } if *profile_id == h.profile_id)));

    let profile = h.store.profile(&h.profile_id).unwrap();
    let key = RenderKey::new(stored.session_percent(), Appearance::Light, &profile.display);
    assert_eq!(key.bucket, 8);
    let cache = RenderCache::new();
    cache.render(&key);
    assert_eq!(cache.misses(), 1);
}

#[tokio::test]
async fn test_concurrent_triggers_are_coalesced() {
    let h = harness();
    h.transport.respond(Method::Get, "/usage", 200, &usage_body(10.0, 1.0));
    h.transport.set_delay(Duration::from_millis(200));

    let (first, second) = tokio::join!(
        h.engine.refresh(h.profile_id, RefreshTrigger::Manual),
        h.engine.refresh(h.profile_id, RefreshTrigger::Timer),
    );
    assert!(matches!(first, RefreshOutcome::Updated(_)));
    assert_eq!(second, RefreshOutcome::Coalesced);
    assert_eq!(h.transport.count(Method::Get, "/usage"), 1);
    assert!(!h.engine.is_in_flight(&h.profile_id));

    let again = h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    assert!(matches!(again, RefreshOutcome::Updated(_)));
    assert_eq!(h.transport.count(Method::Get, "/usage"), 2);
}

#[tokio::test]
async fn test_failure_keeps_previous_snapshot() {
    let h = harness();
    h.transport.respond(Method::Get, "/usage", 200, &usage_body(33.0, 4.0));
    h.transport.respond(Method::Get, "/usage", 500, "");

    h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    let before = h.stored_snapshot().unwrap();
    let mut rx = h.events.subscribe();

    let outcome = h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    assert_eq!(outcome, RefreshOutcome::Failed(ApiError::Server(500).into()));
    assert_eq!(h.stored_snapshot().unwrap(), before);
    // One success, then the failing attempt plus two retries.
    assert_eq!(h.transport.count(Method::Get, "/usage"), 4);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::RefreshFailed { code: "API-003", user_visible: false, .. }
    )));
    let report = h.engine.breaker_report();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].domain, ErrorDomain::Server);
}

#[tokio::test]
async fn test_transient_failure_is_retried_in_place() {
    let h = harness();
    h.transport.fail(Method::Get, "/usage", NetworkError::Timeout);
    h.transport.respond(Method::Get, "/usage", 200, &usage_body(5.0, 1.0));

    let outcome = h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    assert!(matches!(outcome, RefreshOutcome::Updated(_)));
    assert_eq!(h.transport.count(Method::Get, "/usage"), 2);
    assert!(h.engine.breaker_report().is_empty());
}

#[tokio::test]
async fn test_threshold_notifications_fire_once_per_crossing() {
    let h = harness();
    for percent in [70.0, 76.0, 76.0, 76.0, 60.0, 80.0] {
        h.transport
            .respond(Method::Get, "/usage", 200, &usage_body(percent, 0.0));
    }
    let mut rx = h.events.subscribe();
    for _ in 0..6 {
        h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    }
    let fired_75 = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::ThresholdCrossed { threshold: 75, .. }))
        .count();
    assert_eq!(fired_75, 2);
}

#[tokio::test]
async fn test_session_reset_fires_once() {
    let h = harness();
    for percent in [40.0, 0.0, 0.0] {
        h.transport
            .respond(Method::Get, "/usage", 200, &usage_body(percent, 0.0));
    }
    let mut rx = h.events.subscribe();
    for _ in 0..3 {
        h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    }
    let resets = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SessionReset { .. }))
        .count();
    assert_eq!(resets, 1);
}

#[tokio::test]
async fn test_unreported_session_is_not_a_reset() {
    let h = harness();
    let unreported = r#"{"five_hour": null, "seven_day": {"utilization": 40}}"#;
    h.transport.respond(Method::Get, "/usage", 200, &usage_body(40.0, 0.0));
    h.transport.respond(Method::Get, "/usage", 200, unreported);
    h.transport.respond(Method::Get, "/usage", 200, &usage_body(0.0, 40.0));
    let mut rx = h.events.subscribe();

    h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    assert_eq!(h.stored_snapshot().unwrap().session_reading(), None);
    let resets = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SessionReset { .. }))
        .count();
    assert_eq!(resets, 0);

    // A real zero after an unreported reading has no positive predecessor.
    h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    let resets = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SessionReset { .. }))
        .count();
    assert_eq!(resets, 0);
}

#[tokio::test]
async fn test_missing_credentials_never_reach_network() {
    let h = harness();
    let other = Profile::new("Empty");
    let other_id = other.id;
    h.store.mutate(|s| s.profiles.push(other)).unwrap();
    let mut rx = h.events.subscribe();

    let outcome = h.engine.refresh(other_id, RefreshTrigger::Timer).await;
    assert_eq!(
        outcome,
        RefreshOutcome::Failed(CredentialError::NotFound.into())
    );
    assert!(h.transport.requests().is_empty());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        EngineEvent::RefreshFailed { user_visible: false, .. }
    )));

    h.engine.refresh(other_id, RefreshTrigger::Manual).await;
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        EngineEvent::RefreshFailed { code: "CRED-001", user_visible: true, .. }
    )));
}

#[tokio::test]
async fn test_unauthorized_is_always_visible() {
    let h = harness();
    h.transport.respond(Method::Get, "/usage", 401, "");
    let mut rx = h.events.subscribe();
    h.engine.refresh(h.profile_id, RefreshTrigger::Timer).await;
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        EngineEvent::RefreshFailed { code: "API-001", user_visible: true, .. }
    )));
    assert_eq!(h.transport.count(Method::Get, "/usage"), 1);
}

#[tokio::test]
async fn test_unknown_profile_is_gone() {
    let h = harness();
    let outcome = h.engine.refresh(ProfileId::new(), RefreshTrigger::Manual).await;
    assert_eq!(outcome, RefreshOutcome::ProfileGone);
}

#[tokio::test]
async fn test_multi_display_failures_are_isolated() {
    let h = harness();
    let second = Profile::new("Personal");
    let second_id = second.id;
    h.store
        .mutate(|s| {
            s.profiles.push(second);
            for p in s.profiles.iter_mut() {
                p.selected = true;
            }
            s.display_mode = DisplayMode::Multi;
        })
        .unwrap();
    h.transport
        .respond(Method::Get, "/usage", 200, &usage_body(20.0, 2.0));

    let outcomes = h.engine.refresh_targets(RefreshTrigger::Timer).await;
    assert_eq!(outcomes.len(), 2);
    for (id, outcome) in outcomes {
        if id == second_id {
            assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        } else {
            assert!(matches!(outcome, RefreshOutcome::Updated(_)));
        }
    }
    assert!(h.store.profile(&second_id).unwrap().snapshot.is_none());
}
