use super::*;
use crate::cli::Cli;
use crate::secrets::memory_store::MemorySecretStore;
use crate::testing::{usage_body, ScriptedTransport};
use crate::usage::api_client::Method;
use clap::Parser;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    transport: Arc<ScriptedTransport>,
    ctx: AppContext,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let paths = AppPaths::new(dir.path().to_path_buf());
    paths.ensure_dirs().unwrap();
    let mut config = EngineConfig::default();
    config.retry.max_retries = 0;
    let transport = Arc::new(ScriptedTransport::new());
    let ctx = AppContext::from_parts(
        paths,
        config,
        Arc::new(MemorySecretStore::new()),
        None,
        transport.clone(),
    )
    .unwrap();
    Harness {
        dir,
        transport,
        ctx,
    }
}

async fn run(ctx: &AppContext, args: &[&str]) -> Result<String> {
    let mut argv = vec!["meterbar"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv)?;
    let mut out = Vec::new();
    execute(ctx, cli.command, &mut out).await?;
    Ok(String::from_utf8(out)?)
}

#[tokio::test]
async fn test_bootstrap_and_profile_commands() {
    let h = harness();
    let listed = run(&h.ctx, &["profile", "list"]).await.unwrap();
    assert!(listed.contains("Default"));

    let created = run(&h.ctx, &["profile", "create", "Work"]).await.unwrap();
    assert!(created.starts_with("Created Work"));
    run(&h.ctx, &["profile", "activate", "work"]).await.unwrap();
    assert_eq!(h.ctx.store.active_profile().unwrap().name, "Work");

    run(&h.ctx, &["profile", "rename", "Work", "Office"]).await.unwrap();
    assert!(h.ctx.profile(Some("office")).is_ok());

    run(&h.ctx, &["profile", "delete", "Office"]).await.unwrap();
    assert!(run(&h.ctx, &["profile", "delete", "Default"]).await.is_err());
}

#[tokio::test]
async fn test_set_credentials_then_refresh() {
    let h = harness();
    run(
        &h.ctx,
        &[
            "credentials",
            "set",
            "--session-key",
            "sk-ant-REDACTED",
            "--org",
            "org-1",
        ],
    )
    .await
    .unwrap();
    h.transport
        .respond(Method::Get, "/organizations/org-1/usage", 200, &usage_body(42.0, 10.0));

    let out = run(&h.ctx, &["refresh"]).await.unwrap();
    assert_eq!(out.trim(), "Default: session 42%, weekly 10%");

    let status = run(&h.ctx, &["status"]).await.unwrap();
    assert!(status.contains("* Default"));
    assert!(status.contains(" 42% used"));

    let json = run(&h.ctx, &["status", "--json"]).await.unwrap();
    let rows: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(rows[0]["history_len"], 1);
    assert_eq!(rows[0]["active"], true);
}

#[tokio::test]
async fn test_refresh_without_credentials_fails() {
    let h = harness();
    let err = run(&h.ctx, &["refresh"]).await.unwrap_err();
    assert!(err.to_string().contains("failed"));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_render_writes_png() {
    let h = harness();
    let output = h.dir.path().join("icon.png");
    let out = run(
        &h.ctx,
        &["render", "--appearance", "dark", "--output", output.to_str().unwrap()],
    )
    .await
    .unwrap();
    assert!(out.starts_with("Wrote"));
    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[1..4], b"PNG");
}

#[tokio::test]
async fn test_orgs_lists_organizations() {
    let h = harness();
    run(
        &h.ctx,
        &["credentials", "set", "--session-key", "sk-ant-REDACTED"],
    )
    .await
    .unwrap();
    h.transport.respond(
        Method::Get,
        "/api/organizations",
        200,
        r#"[{"uuid":"org-1","name":"Personal"},{"uuid":"org-2","name":"Team"}]"#,
    );
    let out = run(&h.ctx, &["orgs"]).await.unwrap();
    assert_eq!(out, "org-1  Personal\norg-2  Team\n");
}

#[tokio::test]
async fn test_settings_commands() {
    let h = harness();
    let out = run(&h.ctx, &["settings", "interval", "1"]).await.unwrap();
    assert_eq!(out.trim(), "Refresh interval: 5s");

    run(&h.ctx, &["settings", "display", "--style", "percentage", "--remaining", "true"])
        .await
        .unwrap();
    let display = h.ctx.store.active_profile().unwrap().display;
    assert!(display.remaining_mode);

    run(&h.ctx, &["settings", "mode", "multi"]).await.unwrap();
    assert_eq!(h.ctx.store.display_mode(), DisplayMode::Multi);

    assert!(run(&h.ctx, &["settings", "thresholds", "80", "true"]).await.is_err());
    run(&h.ctx, &["settings", "thresholds", "90", "false"]).await.unwrap();
    assert!(!h.ctx.store.active_profile().unwrap().thresholds.at_90);
}

#[tokio::test]
async fn test_unknown_profile_selector() {
    let h = harness();
    let err = run(&h.ctx, &["refresh", "--profile", "Nope"]).await.unwrap_err();
    assert!(err.to_string().contains("No profile named 'Nope'"));
}
