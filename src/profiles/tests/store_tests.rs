use super::*;
use crate::usage::types::UsageSource;
use crate::usage::window::WindowSpan;
use crate::usage::UsageWindow;
use tempfile::TempDir;

fn open_store() -> (TempDir, AppPaths, ProfileStore) {
    let dir = TempDir::new().unwrap();
    let paths = AppPaths::new(dir.path().to_path_buf());
    paths.ensure_dirs().unwrap();
    let store = ProfileStore::open(&paths).unwrap();
    (dir, paths, store)
}

fn snapshot(pct: f64) -> UsageSnapshot {
    UsageSnapshot {
        session: UsageWindow::new(pct, None, WindowSpan::SESSION),
        session_unreported: false,
        weekly: UsageWindow::default(),
        sub_metrics: Vec::new(),
        cost: None,
        credits: None,
        fetched_at: Utc::now(),
        timezone: None,
        source: UsageSource::WebSession,
    }
}

#[test]
fn test_open_without_file_is_empty() {
    let (_dir, _paths, store) = open_store();
    assert!(store.profiles().is_empty());
    assert!(store.active_profile().is_none());
    assert!(store.take_legacy().is_none());
}

#[test]
fn test_mutation_persists_and_reopens() {
    let (_dir, paths, store) = open_store();
    let profile = Profile::new("Work");
    let id = profile.id;
    store
        .mutate(|settings| {
            settings.profiles.push(profile);
            settings.active_profile_id = Some(id);
        })
        .unwrap();

    let reopened = ProfileStore::open(&paths).unwrap();
    assert_eq!(reopened.active_profile_id(), Some(id));
    assert_eq!(reopened.profile(&id).unwrap().name, "Work");
}

#[test]
fn test_record_snapshot_targets_profile_by_id() {
    let (_dir, _paths, store) = open_store();
    let a = Profile::new("A");
    let b = Profile::new("B");
    let (a_id, b_id) = (a.id, b.id);
    store
        .mutate(|settings| {
            settings.profiles = vec![a, b];
            settings.active_profile_id = Some(b_id);
        })
        .unwrap();

    assert!(store.record_snapshot(&a_id, snapshot(33.0)).unwrap());
    assert_eq!(
        store.profile(&a_id).unwrap().snapshot.unwrap().session_percent(),
        33.0
    );
    assert!(store.profile(&b_id).unwrap().snapshot.is_none());
}

#[test]
fn test_record_snapshot_for_deleted_profile_is_noop() {
    let (_dir, _paths, store) = open_store();
    assert!(!store.record_snapshot(&ProfileId::new(), snapshot(1.0)).unwrap());
}

#[test]
fn test_reload_picks_up_external_write() {
    let (_dir, paths, store) = open_store();
    let other = ProfileStore::open(&paths).unwrap();
    let profile = Profile::new("External");
    let id = profile.id;
    other.mutate(|settings| settings.profiles.push(profile)).unwrap();

    assert!(store.profile(&id).is_none());
    store.reload().unwrap();
    assert!(store.profile(&id).is_some());
}

#[test]
fn test_legacy_file_is_detected() {
    let (_dir, paths, _store) = open_store();
    std::fs::write(
        paths.settings_path(),
        r#"{"refresh_interval": 60, "icon_style": "bar"}"#,
    )
    .unwrap();
    let store = ProfileStore::open(&paths).unwrap();
    let legacy = store.take_legacy().unwrap();
    assert_eq!(legacy.refresh_interval, Some(60));
    assert!(store.take_legacy().is_none());
    assert!(store.profiles().is_empty());
}

#[test]
fn test_corrupt_file_is_decode_error() {
    let (_dir, paths, _store) = open_store();
    std::fs::write(paths.settings_path(), "{not json").unwrap();
    let err = ProfileStore::open(&paths).err().unwrap();
    assert_eq!(err.code(), "STORE-004");
}

#[test]
fn test_background_write_keeps_other_process_edits() {
    let (_dir, paths, engine_side) = open_store();
    let existing = Profile::new("Work");
    let existing_id = existing.id;
    engine_side
        .mutate(|settings| {
            settings.profiles.push(existing);
            settings.active_profile_id = Some(existing_id);
        })
        .unwrap();

    // A second process adds a profile the first one has not seen.
    let cli_side = ProfileStore::open(&paths).unwrap();
    let added = Profile::new("Personal");
    let added_id = added.id;
    cli_side.mutate(|settings| settings.profiles.push(added)).unwrap();

    assert!(engine_side.record_snapshot(&existing_id, snapshot(12.0)).unwrap());

    let on_disk = ProfileStore::open(&paths).unwrap();
    assert_eq!(on_disk.profiles().len(), 2);
    assert!(on_disk.profile(&added_id).is_some());
    assert_eq!(
        on_disk.profile(&existing_id).unwrap().snapshot.unwrap().session_percent(),
        12.0
    );
    // The writer's cached copy now includes the other process's profile.
    assert!(engine_side.profile(&added_id).is_some());
}

#[test]
fn test_failed_change_writes_nothing() {
    let (_dir, paths, store) = open_store();
    store.mutate(|settings| settings.profiles.push(Profile::new("A"))).unwrap();
    let err = store
        .try_mutate(|settings| {
            settings.profiles.clear();
            Err::<(), StorageError>(StorageError::Command("refused".to_string()))
        })
        .unwrap_err();
    assert_eq!(err.code(), "STORE-005");
    assert_eq!(ProfileStore::open(&paths).unwrap().profiles().len(), 1);
    assert_eq!(store.profiles().len(), 1);
}
