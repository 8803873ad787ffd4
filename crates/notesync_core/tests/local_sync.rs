use notesync_core::{
    ConnectionStatus, LocalStore, ProviderRegistry, RecordDraft, RecordPatch, SqliteLocalStore,
    SyncCore, SyncError, Theme,
};
use std::collections::HashSet;

fn open_core() -> SyncCore<SqliteLocalStore> {
    SyncCore::open(
        SqliteLocalStore::in_memory().unwrap(),
        ProviderRegistry::with_defaults(),
    )
}

#[test]
fn fresh_core_is_local_and_unconfigured() {
    let core = open_core();
    assert_eq!(core.status(), ConnectionStatus::Unconfigured);
    assert!(!core.is_remote());
    assert!(core.owner_id().is_none());
    assert!(core.records().is_empty());
}

#[test]
fn created_records_have_unique_ids_and_equal_timestamps() {
    let mut core = open_core();
    let mut ids = HashSet::new();
    for index in 0..20 {
        let record = core
            .create_record(RecordDraft::new(format!("idea {index}")))
            .unwrap();
        assert_eq!(record.created_at, record.updated_at);
        assert!(ids.insert(record.id));
    }
    assert_eq!(core.records().len(), 20);
    assert_eq!(core.local_store().load_records().len(), 20);
}

#[test]
fn update_merges_fields_and_advances_updated_at() {
    let mut core = open_core();
    let created = core
        .create_record(
            RecordDraft::new("body")
                .title("title")
                .tags(["a"])
                .annotation("note"),
        )
        .unwrap();

    let updated = core
        .update_record(created.id, RecordPatch::default().content("new body"))
        .unwrap();
    assert_eq!(updated.content, "new body");
    assert_eq!(updated.title.as_deref(), Some("title"));
    assert_eq!(updated.tags, vec!["a".to_string()]);
    assert_eq!(updated.annotation.as_deref(), Some("note"));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);

    let again = core
        .update_record(created.id, RecordPatch::default().title(None))
        .unwrap();
    assert!(again.updated_at > updated.updated_at);
    assert_eq!(again.title, None);
    assert_eq!(core.local_store().load_records(), vec![again]);
}

#[test]
fn update_to_blank_content_is_rejected_and_nothing_changes() {
    let mut core = open_core();
    let created = core.create_record(RecordDraft::new("body")).unwrap();
    let err = core
        .update_record(created.id, RecordPatch::default().content("  "))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRecord(_)));
    assert_eq!(core.record(created.id), Some(&created));
}

#[test]
fn delete_is_idempotent() {
    let mut core = open_core();
    let keep = core.create_record(RecordDraft::new("keep")).unwrap();
    let gone = core.create_record(RecordDraft::new("gone")).unwrap();

    core.delete_record(gone.id).unwrap();
    core.delete_record(gone.id).unwrap();
    core.delete_record(uuid::Uuid::new_v4()).unwrap();

    assert_eq!(core.records(), &[keep.clone()]);
    assert_eq!(core.local_store().load_records(), vec![keep]);
}

#[test]
fn toggle_flag_flips_and_persists() {
    let mut core = open_core();
    let created = core.create_record(RecordDraft::new("body")).unwrap();

    assert!(core.toggle_flag(created.id).unwrap().flag);
    assert!(!core.toggle_flag(created.id).unwrap().flag);
    assert!(!core.local_store().load_records()[0].flag);
}

#[test]
fn add_tags_trims_and_ignores_known_names() {
    let mut core = open_core();
    assert_eq!(core.add_tag("  work ").unwrap(), Some("work".to_string()));
    assert_eq!(core.add_tag("work").unwrap(), None);
    assert_eq!(core.add_tag("   ").unwrap(), None);
    assert_eq!(
        core.add_tags(["home", "Work", "home"]).unwrap(),
        vec!["home".to_string(), "Work".to_string()]
    );
    assert_eq!(core.tags().names(), &["work", "home", "Work"]);
    assert_eq!(core.local_store().load_tags().names(), &["work", "home", "Work"]);
}

#[test]
fn delete_tag_cascades_into_every_record() {
    let mut core = open_core();
    core.add_tags(["x", "y"]).unwrap();
    let both = core
        .create_record(RecordDraft::new("both").tags(["x", "y"]))
        .unwrap();
    let only_x = core
        .create_record(RecordDraft::new("only x").tags(["x"]))
        .unwrap();
    let untouched = core
        .create_record(RecordDraft::new("only y").tags(["y"]))
        .unwrap();

    assert_eq!(core.delete_tag("x").unwrap(), 2);

    assert!(!core.tags().contains("x"));
    assert!(core.records().iter().all(|record| !record.has_tag("x")));
    assert_eq!(core.record(both.id).unwrap().tags, vec!["y".to_string()]);
    assert!(core.record(only_x.id).unwrap().tags.is_empty());
    assert!(core.record(only_x.id).unwrap().updated_at > only_x.updated_at);
    assert_eq!(core.record(untouched.id), Some(&untouched));

    let stored = core.local_store().load_records();
    assert!(stored.iter().all(|record| !record.has_tag("x")));
    assert_eq!(core.local_store().load_tags().names(), &["y"]);

    assert_eq!(core.delete_tag("x").unwrap(), 0);
}

#[test]
fn preferences_are_persisted() {
    let mut core = open_core();
    core.update_preferences(|prefs| {
        prefs.theme = Theme::Dark;
        prefs.auto_generate_title = false;
    })
    .unwrap();

    let stored = core.local_store().load_settings();
    assert_eq!(stored.preferences.theme, Theme::Dark);
    assert!(!stored.preferences.auto_generate_title);
    assert_eq!(core.settings(), &stored);
}

#[test]
fn migrate_requires_connected_remote() {
    let mut core = open_core();
    core.create_record(RecordDraft::new("body")).unwrap();
    assert!(matches!(core.migrate(), Err(SyncError::NotConnected)));
}

#[test]
fn reopening_restores_working_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notesync.db");

    let (record, tag) = {
        let store = SqliteLocalStore::open(&path).unwrap();
        let mut core = SyncCore::open(store, ProviderRegistry::new());
        let record = core
            .create_record(RecordDraft::new("persisted").flag(true))
            .unwrap();
        let tag = core.add_tag("kept").unwrap().unwrap();
        (record, tag)
    };

    let store = SqliteLocalStore::open(&path).unwrap();
    let core = SyncCore::open(store, ProviderRegistry::new());
    assert_eq!(core.records(), &[record]);
    assert_eq!(core.tags().names(), &[tag]);
}
