//! Creation, change, delete and unload for local (non-remote) map types.

use serde_json::json;
use sync_map::map::{sync_map, LoadState};
use sync_map::SyncMapError;

use super::support::*;

fn tasks() -> std::sync::Arc<sync_map::map::MapDef> {
    sync_map("tasks").offline(true).remote(false).build()
}

#[tokio::test]
async fn created_record_is_loaded_immediately() {
    let h = harness(&[tasks()]);
    let record = h
        .engine
        .create_record("tasks", "t1", fields(&[("title", json!("write docs"))]))
        .unwrap();

    assert_eq!(record.load_state(), LoadState::Loaded);
    assert_eq!(record.get("title"), Some(json!("write docs")));
    assert!(record.created_at().is_some());
    record.loading().await.unwrap();
}

#[tokio::test]
async fn creation_fields_are_retained_for_replay() {
    let h = harness(&[tasks()]);
    h.engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();
    assert_eq!(h.log.retained_by("tasks/t1/title").len(), 1);
}

#[tokio::test]
async fn change_supersedes_creation_in_the_log() {
    let h = harness(&[tasks()]);
    let record = h
        .engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();
    h.engine
        .request_change("tasks", "t1", fields(&[("title", json!("b"))]))
        .await
        .unwrap();

    assert_eq!(record.get("title"), Some(json!("b")));
    // The confirmed change is the new frontier; the creation entry no
    // longer holds the title reason.
    let retained = h.log.retained_by("tasks/t1/title");
    assert_eq!(retained.len(), 1, "only the frontier entry keeps the tag");
    let entries = h.log.entries();
    let (frontier, _) = entries
        .iter()
        .find(|(_, meta)| meta.id == retained[0])
        .unwrap();
    assert_eq!(frontier.fields().unwrap()["title"], json!("b"));
}

#[tokio::test]
async fn untouched_fields_keep_their_creation_entry() {
    let h = harness(&[tasks()]);
    h.engine
        .create_record(
            "tasks",
            "t1",
            fields(&[("title", json!("a")), ("done", json!(false))]),
        )
        .unwrap();
    h.engine
        .request_change("tasks", "t1", fields(&[("title", json!("b"))]))
        .await
        .unwrap();

    // The creation entry lost the title tag but still carries done.
    assert_eq!(h.log.retained_by("tasks/t1/done").len(), 1);
    assert_eq!(h.log.entries().len(), 2);
}

#[tokio::test]
async fn delete_releases_all_field_reasons() {
    let h = harness(&[tasks()]);
    h.engine
        .create_record(
            "tasks",
            "t1",
            fields(&[("title", json!("a")), ("done", json!(false))]),
        )
        .unwrap();
    h.engine
        .request_change("tasks", "t1", fields(&[("done", json!(true))]))
        .await
        .unwrap();

    h.engine.request_delete("tasks", "t1").await.unwrap();
    assert!(
        h.log.entries().is_empty(),
        "no entry may stay retained after a confirmed delete"
    );
}

#[tokio::test]
async fn field_change_notifications_follow_subscriptions() {
    let h = harness(&[tasks()]);
    let record = h
        .engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();

    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let unsub = record.subscribe(move |change| {
        sink.lock().push((change.field.clone(), change.value.clone()));
    });

    h.engine
        .request_change("tasks", "t1", fields(&[("title", json!("b"))]))
        .await
        .unwrap();
    unsub();
    h.engine
        .request_change("tasks", "t1", fields(&[("title", json!("c"))]))
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec![("title".to_string(), Some(json!("b")))]);
}

#[tokio::test]
async fn instantiate_is_idempotent_while_open() {
    let h = harness(&[tasks()]);
    let first = h
        .engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();
    let second = h.engine.instantiate("tasks", "t1").unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn unload_releases_reasons_for_non_offline_types() {
    let drafts = sync_map("drafts").remote(false).build();
    let h = harness(&[drafts]);
    let record = h
        .engine
        .create_record("drafts", "d1", fields(&[("body", json!("hi"))]))
        .unwrap();
    assert_eq!(h.log.retained_by("drafts/d1/body").len(), 1);

    h.engine.unload("drafts", "d1").unwrap();
    assert_eq!(record.load_state(), LoadState::Destroyed);
    assert!(
        h.log.entries().is_empty(),
        "a non-offline record must not leave retained entries behind"
    );
}

#[tokio::test]
async fn unload_keeps_reasons_for_offline_types() {
    let h = harness(&[tasks()]);
    h.engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();
    h.engine.unload("tasks", "t1").unwrap();
    assert_eq!(
        h.log.retained_by("tasks/t1/title").len(),
        1,
        "offline-capable records stay reconstructable after unload"
    );
}

#[tokio::test]
async fn instantiate_without_any_load_path_fails() {
    let drafts = sync_map("drafts").remote(false).build();
    let h = harness(&[drafts]);
    let record = h.engine.instantiate("drafts", "nope").unwrap();
    let err = record.loading().await.unwrap_err();
    assert!(matches!(err, SyncMapError::NotFound { .. }));
    assert_eq!(record.load_state(), LoadState::Failed);
}

#[tokio::test]
async fn unknown_map_type_is_a_typed_error() {
    let h = harness(&[tasks()]);
    let err = h.engine.instantiate("ghosts", "g1").unwrap_err();
    assert!(matches!(err, SyncMapError::UnknownMap(_)));
}

#[tokio::test]
async fn committed_change_is_not_provisional() {
    let h = harness(&[tasks()]);
    let record = h
        .engine
        .create_record("tasks", "t1", fields(&[("title", json!("a"))]))
        .unwrap();
    h.engine
        .request_change("tasks", "t1", fields(&[("title", json!("b"))]))
        .await
        .unwrap();
    assert!(
        !record.is_provisional("title"),
        "the committed change must have cleared the provisional tag"
    );
}
