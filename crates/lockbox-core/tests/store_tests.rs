use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};
use lockbox_core::envelope::MAGIC;
use lockbox_core::{
    KdfParams, ListOptions, NewRecord, RecordPatch, RecordStore, StoreConfig, StoreError,
};
use tempfile::tempdir;

const PASSWORD: &str = "p@ssw0rd123";

fn config(path: &Path) -> StoreConfig {
    let mut cfg = StoreConfig::with_path(path);
    cfg.kdf = KdfParams::fast_insecure();
    cfg
}

fn open(path: &Path) -> RecordStore {
    RecordStore::open(PASSWORD, config(path)).unwrap()
}

fn github() -> NewRecord {
    NewRecord::new("GitHub deploy", "api_key", "ghp_abcdefghijklmnop")
        .description("CI deploy key")
        .tag("Production")
        .tag("ci")
        .meta("owner", "platform-team")
}

#[test]
fn persists_across_reopen_and_rejects_wrong_password() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");

    let mut store = RecordStore::new(config(&path));
    store.initialize(PASSWORD, Some(&path)).unwrap();
    assert!(store.get_all().unwrap().is_empty());

    let id = store.add(NewRecord::new("X", "api_key", "abc")).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().name, "X");
    store.close().unwrap();

    store.initialize(PASSWORD, Some(&path)).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().name, "X");
    store.close().unwrap();

    let err = store.initialize("wrong", Some(&path)).unwrap_err();
    assert!(matches!(err, StoreError::Initialization { .. }));
    assert!(err.is_authentication_failure());
    assert!(!store.is_initialized());
}

#[test]
fn added_record_matches_input() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));

    let before = Utc::now();
    let id = store.add(github()).unwrap();
    let rec = store.get(&id).unwrap().unwrap();

    assert_eq!(rec.id, id);
    assert_eq!(rec.name, "GitHub deploy");
    assert_eq!(rec.kind.as_str(), "api_key");
    assert_eq!(rec.secret_value.expose(), "ghp_abcdefghijklmnop");
    assert_eq!(rec.description, "CI deploy key");
    assert_eq!(rec.tags, vec!["Production".to_string(), "ci".to_string()]);
    assert_eq!(rec.metadata["owner"], "platform-team");
    assert!(rec.created_at >= before);
    assert!(rec.expires_at.is_none());
}

#[test]
fn ids_are_unique() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));
    let a = store.add(NewRecord::new("a", "token", "1")).unwrap();
    let b = store.add(NewRecord::new("b", "token", "2")).unwrap();
    assert_ne!(a, b);
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn update_changes_fields_but_not_identity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    let id = store.add(github()).unwrap();
    let created_at = store.get(&id).unwrap().unwrap().created_at;

    let patch = RecordPatch {
        id: Some("something-else".into()),
        created_at: Some(created_at - Duration::days(365)),
        ..RecordPatch::default()
    }
    .description("x");
    store.update(&id, patch).unwrap();

    let rec = store.get(&id).unwrap().unwrap();
    assert_eq!(rec.description, "x");
    assert_eq!(rec.id, id);
    assert_eq!(rec.created_at, created_at);
    assert!(store.get("something-else").unwrap().is_none());

    store.close().unwrap();
    let reopened = open(&path);
    assert_eq!(reopened.get(&id).unwrap().unwrap().description, "x");
}

#[test]
fn update_can_clear_expiry_and_change_kind() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));
    let id = store
        .add(NewRecord::new("cert", "certificate", "-----BEGIN-----").expires_at(Utc::now()))
        .unwrap();

    store
        .update(&id, RecordPatch::default().expires_at(None).kind("TOKEN"))
        .unwrap();
    let rec = store.get(&id).unwrap().unwrap();
    assert!(rec.expires_at.is_none());
    assert_eq!(rec.kind.as_str(), "token");
}

#[test]
fn invalid_update_leaves_record_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    let id = store.add(github()).unwrap();
    let before = store.get(&id).unwrap().unwrap().clone();
    let file_before = fs::read(&path).unwrap();

    let err = store
        .update(&id, RecordPatch::default().kind("password").description("changed"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let err = store.update(&id, RecordPatch::default().name("   ")).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    assert_eq!(store.get(&id).unwrap().unwrap(), &before);
    assert_eq!(fs::read(&path).unwrap(), file_before);
}

#[test]
fn invalid_add_is_rejected_without_writing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);

    let err = store.add(NewRecord::new("n", "ssh_key", "x")).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let err = store.add(NewRecord::new("", "token", "x")).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.is_empty().unwrap());
    assert!(!path.exists());
}

#[test]
fn delete_removes_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    let id = store.add(github()).unwrap();

    store.delete(&id).unwrap();
    assert!(store.get(&id).unwrap().is_none());
    store.close().unwrap();
    assert!(open(&path).get(&id).unwrap().is_none());
}

#[test]
fn missing_ids_are_not_found() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));
    assert!(matches!(
        store.update("nope", RecordPatch::default().description("x")),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(store.delete("nope"), Err(StoreError::NotFound(_))));
    assert!(store.get("nope").unwrap().is_none());
}

#[test]
fn operations_after_close_fail_not_initialized() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));
    let id = store.add(github()).unwrap();
    store.close().unwrap();

    assert!(matches!(store.get(&id), Err(StoreError::NotInitialized)));
    assert!(matches!(store.get_all(), Err(StoreError::NotInitialized)));
    assert!(matches!(store.query(), Err(StoreError::NotInitialized)));
    assert!(matches!(store.add(github()), Err(StoreError::NotInitialized)));
    assert!(matches!(
        store.update(&id, RecordPatch::default()),
        Err(StoreError::NotInitialized)
    ));
    assert!(matches!(store.delete(&id), Err(StoreError::NotInitialized)));
    assert!(matches!(store.close(), Err(StoreError::NotInitialized)));
    assert!(store.path().is_none());
}

#[test]
fn uninitialized_store_refuses_reads() {
    let store = RecordStore::new(StoreConfig::default());
    assert!(matches!(store.get_all(), Err(StoreError::NotInitialized)));
}

#[test]
fn failed_add_rolls_back_and_keeps_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    let kept = store.add(github()).unwrap();
    let file_before = fs::read(&path).unwrap();

    // Occupy the staging path so the next write cannot be created.
    fs::create_dir(dir.path().join("store.bin.tmp")).unwrap();

    let err = store.add(NewRecord::new("doomed", "token", "t")).unwrap_err();
    assert!(matches!(err, StoreError::Persistence(_)));
    let all = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert!(all.contains_key(&kept));
    assert!(all.values().all(|r| r.name != "doomed"));
    assert_eq!(fs::read(&path).unwrap(), file_before);
}

#[test]
fn failed_update_and_delete_roll_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    let id = store.add(github()).unwrap();
    let before = store.get(&id).unwrap().unwrap().clone();
    fs::create_dir(dir.path().join("store.bin.tmp")).unwrap();

    assert!(matches!(
        store.update(&id, RecordPatch::default().description("lost")),
        Err(StoreError::Persistence(_))
    ));
    assert_eq!(store.get(&id).unwrap().unwrap(), &before);

    assert!(matches!(store.delete(&id), Err(StoreError::Persistence(_))));
    assert_eq!(store.get(&id).unwrap().unwrap(), &before);
}

#[test]
fn unwritable_location_rolls_back_add() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("store.bin");
    let mut store = open(&path);

    assert!(matches!(
        store.add(github()),
        Err(StoreError::Persistence(_))
    ));
    assert!(store.get_all().unwrap().is_empty());
    assert!(!path.exists());
}

#[test]
fn corrupt_file_never_opens_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    store.add(github()).unwrap();
    store.close().unwrap();

    let mut bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], MAGIC);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, &bytes).unwrap();
    let err = RecordStore::open(PASSWORD, config(&path)).unwrap_err();
    assert!(err.is_authentication_failure());

    fs::write(&path, &bytes[..30]).unwrap();
    let err = RecordStore::open(PASSWORD, config(&path)).unwrap_err();
    assert!(matches!(err.root_cause(), StoreError::MalformedEnvelope(_)));

    fs::write(&path, b"definitely not an envelope").unwrap();
    assert!(RecordStore::open(PASSWORD, config(&path)).is_err());
}

#[test]
fn empty_file_starts_empty_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    fs::write(&path, b"").unwrap();
    assert!(open(&path).get_all().unwrap().is_empty());
}

#[test]
fn flush_writes_an_empty_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    store.flush().unwrap();
    assert_eq!(&fs::read(&path).unwrap()[..4], MAGIC);
    store.close().unwrap();

    let err = RecordStore::open("not the password", config(&path)).unwrap_err();
    assert!(err.is_authentication_failure());
    assert!(open(&path).is_empty().unwrap());
}

#[test]
fn empty_password_rejected() {
    let dir = tempdir().unwrap();
    let err = RecordStore::open("", config(&dir.path().join("store.bin"))).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn reinitialize_switches_files() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");
    let mut store = open(&first);
    store.add(github()).unwrap();

    store.initialize(PASSWORD, Some(&second)).unwrap();
    assert!(store.get_all().unwrap().is_empty());
    assert_eq!(store.path(), Some(second.as_path()));
    assert_eq!(open(&first).len().unwrap(), 1);
}

#[test]
fn store_queries_are_case_insensitive() {
    let dir = tempdir().unwrap();
    let mut store = open(&dir.path().join("store.bin"));
    let id = store.add(github()).unwrap();
    store
        .add(NewRecord::new("Staging token", "token", "tok").tag("staging"))
        .unwrap();

    let q = store.query().unwrap();
    let hits = q.search("production");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    let hits = q.filter_by_tag("PRODUCTION");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!(q.filter_by_kind("API_KEY").len(), 1);
    assert_eq!(q.search("PLATFORM").len(), 1);

    let listed = q.list(&ListOptions {
        tag: Some("Staging".into()),
        ..ListOptions::default()
    });
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Staging token");

    let stats = q.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_tag["production"], 1);
}

#[test]
fn oversized_horizon_counts_everything_upcoming() {
    let dir = tempdir().unwrap();
    for days in [1_000_000_000, i64::MAX] {
        let path = dir.path().join(format!("horizon-{days}.bin"));
        let mut cfg = config(&path);
        cfg.expiry_horizon_days = days;
        let mut store = RecordStore::open(PASSWORD, cfg).unwrap();
        store
            .add(NewRecord::new("renewal", "license_key", "L-1").expires_at(Utc::now() + Duration::days(400)))
            .unwrap();

        let stats = store.query().unwrap().stats();
        assert_eq!(stats.expiring_soon, 1);
        assert_eq!(stats.expired, 0);
    }
}

#[test]
fn queries_do_not_touch_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let mut store = open(&path);
    store.add(github()).unwrap();
    let before = fs::read(&path).unwrap();

    let q = store.query().unwrap();
    let _ = q.search("git");
    let _ = q.list(&ListOptions::default());
    let _ = q.stats();
    assert_eq!(fs::read(&path).unwrap(), before);
}
