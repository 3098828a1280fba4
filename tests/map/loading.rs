//! Remote subscription loading, the offline/remote race, and teardown
//! traffic.

use serde_json::json;
use sync_map::log::ActionLog;
use sync_map::map::{sync_map, LoadState};
use sync_map::{Action, SyncMapError, UndoReason};

use super::support::*;

#[tokio::test]
async fn subscribe_confirmation_loads_the_record() {
    let h = harness(&[sync_map("users").build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();
    assert_eq!(record.load_state(), LoadState::Loading);

    let subscribe_id = next_pending(&h.hub).await;
    h.hub.confirm(&subscribe_id);

    record.loading().await.unwrap();
    assert_eq!(record.load_state(), LoadState::Loaded);
}

#[tokio::test]
async fn subscribe_not_found_fails_with_typed_error() {
    let h = harness(&[sync_map("users").build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();

    let subscribe_id = next_pending(&h.hub).await;
    h.hub.reject(&subscribe_id, UndoReason::NotFound);

    let err = record.loading().await.unwrap_err();
    assert!(matches!(err, SyncMapError::NotFound { .. }), "got {err}");
    assert_eq!(record.load_state(), LoadState::Failed);
}

#[tokio::test]
async fn subscribe_denial_fails_with_access_denied() {
    let h = harness(&[sync_map("users").build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();

    let subscribe_id = next_pending(&h.hub).await;
    h.hub.reject(&subscribe_id, UndoReason::Denied);

    let err = record.loading().await.unwrap_err();
    assert!(matches!(err, SyncMapError::AccessDenied { .. }), "got {err}");
}

#[tokio::test]
async fn offline_replay_resolves_before_the_subscription() {
    let h = harness(&[sync_map("users").offline(true).build()]);

    // State left behind by an earlier session.
    let mut meta = remote_meta(500, 0, "earlier-session");
    meta.reasons = vec!["users/u1/name".to_string()];
    meta.indexes = vec!["users".to_string(), "users/u1".to_string()];
    h.log
        .append(
            &Action::Changed {
                plural: "users".to_string(),
                id: "u1".to_string(),
                fields: fields(&[("name", json!("Ann"))]),
            },
            meta,
        )
        .unwrap();

    let record = h.engine.instantiate("users", "u1").unwrap();
    // Loading resolves from the replay alone — the server never answered.
    record.loading().await.unwrap();
    assert_eq!(record.get("name"), Some(json!("Ann")));

    // The late subscription ack must not double-resolve anything.
    let subscribe_id = next_pending(&h.hub).await;
    h.hub.confirm(&subscribe_id);
    assert_eq!(record.load_state(), LoadState::Loaded);
}

#[tokio::test]
async fn empty_replay_leaves_loading_to_the_subscription() {
    let h = harness(&[sync_map("users").offline(true).build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();

    // Nothing in the log for this id: the record must stay Loading until
    // the server answers.
    let subscribe_id = next_pending(&h.hub).await;
    assert_eq!(record.load_state(), LoadState::Loading);
    h.hub.confirm(&subscribe_id);
    record.loading().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_is_issued_on_unload() {
    let h = recording_harness(&[sync_map("users").build()]);
    h.engine.instantiate("users", "u1").unwrap();
    let subscribe_id = next_pending(&h.hub).await;
    h.hub.confirm(&subscribe_id);

    h.engine.unload("users", "u1").unwrap();
    let unsubscribed = h
        .log
        .appended()
        .iter()
        .any(|(action, meta)| {
            matches!(action, Action::Unsubscribe { channel } if channel == "users/u1") && meta.sync
        });
    assert!(unsubscribed, "unload must unsubscribe the channel");
}

#[tokio::test]
async fn no_unsubscribe_after_a_failed_load() {
    let h = recording_harness(&[sync_map("users").build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();
    let subscribe_id = next_pending(&h.hub).await;
    h.hub.reject(&subscribe_id, UndoReason::NotFound);
    record.loading().await.unwrap_err();

    h.engine.unload("users", "u1").unwrap();
    let unsubscribed = h
        .log
        .appended()
        .iter()
        .any(|(action, _)| matches!(action, Action::Unsubscribe { .. }));
    assert!(!unsubscribed, "a failed load never subscribed successfully");
}

#[tokio::test]
async fn creation_subscribes_with_the_creating_flag() {
    let h = recording_harness(&[sync_map("users").build()]);
    h.engine
        .create_record("users", "u1", fields(&[("name", json!("Ann"))]))
        .unwrap();

    let flagged = h.log.appended().iter().any(|(action, meta)| {
        matches!(
            action,
            Action::Subscribe { channel, creating: true } if channel == "users/u1"
        ) && meta.sync
    });
    assert!(flagged, "creation must subscribe with the creating flag");
}

#[tokio::test]
async fn instantiation_from_a_known_creation_skips_the_subscribe() {
    let h = recording_harness(&[sync_map("users").build()]);
    let action = Action::Created {
        plural: "users".to_string(),
        id: "u1".to_string(),
        fields: fields(&[("name", json!("Ann"))]),
    };
    let meta = remote_meta(700, 0, "server");
    let record = h
        .engine
        .instantiate_from_creation("users", "u1", &action, &meta, true)
        .unwrap();

    assert_eq!(record.load_state(), LoadState::Loaded);
    assert_eq!(record.get("name"), Some(json!("Ann")));
    assert!(
        !h.log
            .appended()
            .iter()
            .any(|(action, _)| matches!(action, Action::Subscribe { .. })),
        "already-subscribed creation must not subscribe again"
    );
}
