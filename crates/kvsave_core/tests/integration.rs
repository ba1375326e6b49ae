//! End-to-end tests for groups, registry and on-disk format.

use kvsave_core::{
    ArchiveError, ArchiveSetting, CancelToken, CoreError, GroupRegistry, SaveConfig,
    SaveOutcome, StaticSettingProvider, TypedValue,
};
use kvsave_storage::{stage, FileLockTable, TEMP_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn open(dir: &Path, provider: StaticSettingProvider) -> GroupRegistry {
    GroupRegistry::new(SaveConfig::new(dir), Arc::new(provider)).unwrap()
}

fn open_default(dir: &Path) -> GroupRegistry {
    open(dir, StaticSettingProvider::new())
}

fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().contains(TEMP_SUFFIX))
        .collect()
}

/// Writes a valid file for `group` and returns its path.
fn write_group(dir: &Path, group: &str) -> PathBuf {
    let registry = open_default(dir);
    registry.set_value(group, "hp", 100).unwrap();
    registry.set_value(group, "name", "alice").unwrap();
    assert!(registry.save(false).iter().all(|(_, o)| o.is_completed()));
    dir.join(format!("{group}.sav"))
}

#[test]
fn group_g_survives_restart_and_detects_corruption() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let registry = open_default(dir.path());
    registry.set_value("G", "hp", 100).unwrap();
    registry.set_value("G", "name", "Ada").unwrap();
    let outcomes = registry.save(false);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_completed());
    drop(registry);

    let registry = open_default(dir.path());
    assert_eq!(registry.load_all().unwrap(), 1);
    assert_eq!(registry.get_value("G", "hp", 0).unwrap(), 100);
    assert_eq!(
        registry.get_value("G", "name", String::new()).unwrap(),
        "Ada"
    );
    drop(registry);

    let path = dir.path().join("G.sav");
    let mut bytes = fs::read(&path).unwrap();
    bytes[4] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let registry = open_default(dir.path());
    let err = registry.load_group("G").unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn unsaved_change_is_lost_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "G");

    let registry = open_default(dir.path());
    registry.load_all().unwrap();
    registry.set_value("G", "hp", 101).unwrap();
    drop(registry);

    let registry = open_default(dir.path());
    registry.load_all().unwrap();
    assert_eq!(registry.get_value("G", "hp", 0).unwrap(), 100);
}

#[test]
fn interrupted_replace_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_group(dir.path(), "G");
    let locks = FileLockTable::new();
    let timeout = Duration::from_secs(1);

    let removed = stage(&path, b"replacement frame").unwrap();
    fs::remove_file(removed.temp_path()).unwrap();
    assert!(removed.commit(&locks, timeout).is_err());

    let truncated = stage(&path, b"replacement frame").unwrap();
    fs::OpenOptions::new()
        .write(true)
        .open(truncated.temp_path())
        .unwrap()
        .set_len(4)
        .unwrap();
    assert!(truncated.commit(&locks, timeout).is_err());

    let registry = open_default(dir.path());
    assert_eq!(registry.load_group("G").unwrap(), 2);
    assert_eq!(registry.get_value("G", "hp", 0).unwrap(), 100);
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[test]
fn all_value_types_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    registry.set_value("Mixed", "int", i32::MIN).unwrap();
    registry.set_value("Mixed", "float", -0.25f32).unwrap();
    registry.set_value("Mixed", "nan", f32::NAN).unwrap();
    registry.set_value("Mixed", "text", "héllo, wörld").unwrap();
    registry.set_value("Mixed", "", "").unwrap();
    registry.save(false);

    let fresh = open_default(dir.path());
    fresh.load_all().unwrap();
    let loaded = fresh.group("Mixed").unwrap().unwrap();
    let original = registry.group("Mixed").unwrap().unwrap();
    assert_eq!(loaded.snapshot(), original.snapshot());
    assert!(fresh.get_value("Mixed", "nan", 0.0f32).unwrap().is_nan());
    assert_eq!(loaded.value("int"), Some(TypedValue::Int(i32::MIN)));
}

#[test]
fn setting_same_value_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    registry.set_value("G", "hp", 100).unwrap();
    registry.save(false);

    assert!(!registry.set_value("G", "hp", 100).unwrap());
    assert!(registry.dirty_groups().is_empty());
    assert!(registry.save(false).is_empty());

    assert!(registry.set_value("G", "hp", "100").unwrap());
    assert_eq!(registry.dirty_groups(), vec!["G"]);
}

#[test]
fn corrupt_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_group(dir.path(), "G");
    let mut bytes = fs::read(&path).unwrap();
    bytes[13] = 0x02;
    fs::write(&path, bytes).unwrap();

    let registry = open_default(dir.path());
    let err = registry.load_group("G").unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(
        err,
        CoreError::Archive {
            source: ArchiveError::UnsupportedVersion { found: 2, .. },
            ..
        }
    ));
    assert!(registry.is_empty());
}

#[test]
fn shrunk_length_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_group(dir.path(), "G");
    let mut bytes = fs::read(&path).unwrap();
    let declared = i32::from_le_bytes(bytes[14..18].try_into().unwrap());
    bytes[14..18].copy_from_slice(&(declared - 1).to_le_bytes());
    fs::write(&path, bytes).unwrap();

    let registry = open_default(dir.path());
    assert!(registry.load_group("G").unwrap_err().is_corruption());
}

#[test]
fn corrupt_header_byte_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_group(dir.path(), "G");
    let mut bytes = fs::read(&path).unwrap();
    bytes[4] ^= 0x20;
    fs::write(&path, bytes).unwrap();

    let registry = open_default(dir.path());
    let err = registry.load_group("G").unwrap_err();
    assert!(matches!(
        err,
        CoreError::Archive {
            source: ArchiveError::BadHeader,
            ..
        }
    ));
}

#[test]
fn corrupt_group_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "Good");
    let bad = write_group(dir.path(), "Bad");
    fs::write(&bad, b"#FileArchive#").unwrap();

    let registry = open_default(dir.path());
    let err = registry.load_all().unwrap_err();
    assert!(matches!(
        err,
        CoreError::Archive { ref group, .. } if group == "Bad"
    ));
    assert_eq!(registry.group_names(), vec!["Good"]);
    assert_eq!(registry.get_value("Good", "hp", 0).unwrap(), 100);
}

#[test]
fn lazy_group_loads_on_first_access() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "Stats");
    write_group(dir.path(), "Player");

    let provider =
        StaticSettingProvider::new().with_group("Stats", ArchiveSetting::default().lazy_load(true));
    let registry = open(dir.path(), provider);
    assert_eq!(registry.load_all().unwrap(), 1);
    assert_eq!(registry.group_names(), vec!["Player"]);

    assert_eq!(registry.get_value("Stats", "hp", 0).unwrap(), 100);
    assert_eq!(registry.group_names(), vec!["Player", "Stats"]);
    assert!(registry.dirty_groups().is_empty());
}

#[test]
fn lazy_group_set_keeps_existing_keys() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "Stats");

    let provider =
        StaticSettingProvider::new().with_group("Stats", ArchiveSetting::default().lazy_load(true));
    let registry = open(dir.path(), provider.clone());
    registry.set_value("Stats", "wins", 3).unwrap();
    registry.save(false);

    let fresh = open(dir.path(), provider);
    assert_eq!(fresh.get_value("Stats", "hp", 0).unwrap(), 100);
    assert_eq!(fresh.get_value("Stats", "wins", 0).unwrap(), 3);
}

#[test]
fn corrupt_lazy_group_surfaces_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Stats.sav"), b"not an archive at all").unwrap();

    let provider =
        StaticSettingProvider::new().with_group("Stats", ArchiveSetting::default().lazy_load(true));
    let registry = open(dir.path(), provider);
    assert!(registry.get_value("Stats", "hp", 0).unwrap_err().is_corruption());
    assert!(registry.set_value("Stats", "hp", 1).is_err());
    assert!(registry.is_empty());
}

#[test]
fn user_scoped_groups_live_under_user_key() {
    let dir = tempfile::tempdir().unwrap();
    let provider = StaticSettingProvider::new()
        .with_group("Inventory", ArchiveSetting::default().user_scoped(true));
    let config = SaveConfig::new(dir.path()).user_key("player-7");

    let registry = GroupRegistry::new(config.clone(), Arc::new(provider.clone())).unwrap();
    registry.set_value("Inventory", "gold", 50).unwrap();
    registry.set_value("Audio", "volume", 0.5f32).unwrap();
    registry.save(false);

    assert!(dir.path().join("player-7").join("Inventory.sav").exists());
    assert!(dir.path().join("Audio.sav").exists());

    let fresh = GroupRegistry::new(config, Arc::new(provider)).unwrap();
    assert_eq!(fresh.load_all().unwrap(), 2);
    assert_eq!(fresh.get_value("Inventory", "gold", 0).unwrap(), 50);
}

#[test]
fn settings_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("settings.json");
    fs::write(
        &settings,
        r#"{ "groups": { "Stats": { "lazy_load": true, "sync_only": true } } }"#,
    )
    .unwrap();

    let provider = StaticSettingProvider::from_json_file(&settings).unwrap();
    let registry = open(&dir.path().join("save"), provider);
    let store = registry.group_or_create("Stats").unwrap();
    assert!(store.setting().sync_only);
    assert!(store.setting().lazy_load);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn newest_background_save_wins() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    let store = registry.group_or_create("G").unwrap();

    let mut tasks = Vec::new();
    for hp in 0..20 {
        store.set_data("hp", hp);
        tasks.push(store.save_async());
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.wait().await);
    }
    assert!(outcomes.last().unwrap().is_completed());
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, SaveOutcome::Completed { .. } | SaveOutcome::Cancelled)));
    assert!(!store.is_dirty());
    assert!(!store.is_saving());
    assert!(leftover_temp_files(dir.path()).is_empty());

    let fresh = open_default(dir.path());
    fresh.load_all().unwrap();
    assert_eq!(fresh.get_value("G", "hp", -1).unwrap(), 19);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_save_supersedes_background_save() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    let store = registry.group_or_create("G").unwrap();

    store.set_data("hp", 1);
    let background = store.save_async();
    store.set_data("hp", 2);
    assert!(store.save().is_completed());

    let outcome = background.wait().await;
    assert!(matches!(
        outcome,
        SaveOutcome::Completed { .. } | SaveOutcome::Cancelled
    ));

    let fresh = open_default(dir.path());
    fresh.load_all().unwrap();
    assert_eq!(fresh.get_value("G", "hp", 0).unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edits_during_background_save_stay_dirty() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    let store = registry.group_or_create("G").unwrap();

    store.set_data("hp", 1);
    let task = store.save_async();
    store.set_data("hp", 2);

    assert!(task.wait().await.is_completed());
    assert!(store.is_dirty());
    assert_eq!(registry.dirty_groups(), vec!["G"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_only_group_saves_inline() {
    let dir = tempfile::tempdir().unwrap();
    let provider =
        StaticSettingProvider::new().with_group("Audio", ArchiveSetting::default().sync_only(true));
    let registry = open(dir.path(), provider);
    registry.set_value("Audio", "volume", 0.75f32).unwrap();

    let tasks = registry.save_async_all(false);
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_finished());
    assert!(dir.path().join("Audio.sav").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_async_all_writes_every_dirty_group() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    for group in ["A", "B", "C"] {
        registry.set_value(group, "k", group).unwrap();
    }

    for task in registry.save_async_all(false) {
        let group = task.group().to_string();
        assert!(task.wait().await.is_completed(), "{group}");
    }
    assert!(registry.dirty_groups().is_empty());

    let fresh = open_default(dir.path());
    assert_eq!(fresh.load_all().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_load_and_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "G");

    let registry = open_default(dir.path());
    let store = registry.group_or_create("G").unwrap();
    store.set_data("local", 1);

    let token = CancelToken::new();
    token.cancel();
    assert!(matches!(
        store.load_async(token).await,
        Err(CoreError::Cancelled)
    ));
    assert_eq!(store.get_data("local", 0), 1);

    assert_eq!(store.load_async(CancelToken::new()).await.unwrap(), 2);
    assert_eq!(store.get_data("local", 0), 0);
    assert_eq!(store.get_data("hp", 0), 100);
    assert!(!store.is_dirty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_cancels_pending_save() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    registry.set_value("G", "hp", 1).unwrap();
    registry.save(false);

    let store = registry.group_or_create("G").unwrap();
    store.set_data("hp", 2);
    let task = store.save_async();
    registry.delete_group("G").unwrap();
    let _ = task.wait().await;

    assert!(registry.group("G").unwrap().is_none());
    assert!(!dir.path().join("G.sav").exists());
    assert!(leftover_temp_files(dir.path()).is_empty());
}

fn hp_on_disk(dir: &Path) -> i32 {
    let fresh = open_default(dir);
    fresh.load_group("G").unwrap();
    fresh.get_value("G", "hp", -1).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loads_racing_background_saves_keep_dirty_flag_honest() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let registry = open_default(dir.path());
    let store = registry.group_or_create("G").unwrap();
    store.set_data("hp", 0);
    assert!(store.save().is_completed());

    for hp in 1..30 {
        store.set_data("hp", hp);
        let task = store.save_async();
        let load = if hp % 2 == 0 {
            store.load_async(CancelToken::new()).await
        } else {
            let loader = Arc::clone(&store);
            tokio::task::spawn_blocking(move || loader.load())
                .await
                .unwrap()
        };
        load.unwrap();
        let outcome = task.wait().await;
        assert!(
            matches!(outcome, SaveOutcome::Completed { .. } | SaveOutcome::Cancelled),
            "{outcome:?}"
        );

        let in_memory = store.get_data("hp", -1);
        let on_disk = hp_on_disk(dir.path());
        assert!(
            store.is_dirty() || in_memory == on_disk,
            "clean group diverged: memory {in_memory}, disk {on_disk}"
        );
        assert!(!store.is_saving());
        assert!(!store.is_loading());
    }

    if store.is_dirty() {
        assert!(store.save().is_completed());
    }
    assert_eq!(store.get_data("hp", -1), hp_on_disk(dir.path()));
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn edits_from_many_threads_during_background_saves() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(open_default(dir.path()));
    let store = registry.group_or_create("G").unwrap();

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let registry = Arc::clone(&registry);
            tokio::task::spawn_blocking(move || {
                for i in 0..50 {
                    registry.set_value("G", &format!("w{writer}"), i).unwrap();
                    let _ = registry.get_value("G", "w0", 0).unwrap();
                }
            })
        })
        .collect();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        tasks.push(store.save_async());
        tokio::task::yield_now().await;
    }
    for writer in writers {
        writer.await.unwrap();
    }
    for task in tasks {
        let _ = task.wait().await;
    }

    if store.is_dirty() {
        assert!(store.save().is_completed());
    }
    let fresh = open_default(dir.path());
    fresh.load_all().unwrap();
    for writer in 0..4 {
        assert_eq!(fresh.get_value("G", &format!("w{writer}"), -1).unwrap(), 49);
    }
}
