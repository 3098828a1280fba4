//! Cross-process convergence: delivery order and redelivery must not
//! change the outcome.

use serde_json::json;
use sync_map::map::sync_map;
use sync_map::{Action, ActionMeta, Fields};

use super::support::*;

fn changed(field: &str, value: serde_json::Value) -> Action {
    let mut f = Fields::new();
    f.insert(field.to_string(), value);
    Action::Changed {
        plural: "users".to_string(),
        id: "u1".to_string(),
        fields: f,
    }
}

#[tokio::test]
async fn delivery_order_does_not_change_the_outcome() {
    let updates: Vec<(Action, ActionMeta)> = vec![
        (changed("name", json!("first")), remote_meta(3_000, 0, "a")),
        (changed("name", json!("second")), remote_meta(3_000, 0, "b")),
        (changed("name", json!("third")), remote_meta(4_000, 0, "a")),
        (changed("age", json!(30)), remote_meta(3_500, 0, "c")),
    ];

    let mut outcomes = Vec::new();
    for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
        let h = harness(&[sync_map("users").build()]);
        let record = h.engine.instantiate("users", "u1").unwrap();
        for i in order {
            let (action, meta) = updates[i].clone();
            h.engine.receive(action, meta).unwrap();
        }
        outcomes.push(record.fields());
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
    assert_eq!(outcomes[0]["name"], json!("third"));
    assert_eq!(outcomes[0]["age"], json!(30));
}

#[tokio::test]
async fn redelivery_of_the_same_entry_is_skipped() {
    let h = harness(&[sync_map("users").offline(true).build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();

    let meta = remote_meta(3_000, 0, "a");
    h.engine
        .receive(changed("name", json!("Ann")), meta.clone())
        .unwrap();
    h.engine
        .receive(changed("name", json!("Ann")), meta)
        .unwrap();

    assert_eq!(record.get("name"), Some(json!("Ann")));
    assert_eq!(
        h.log.retained_by("users/u1/name").len(),
        1,
        "redelivered entry must not be stored twice"
    );
}

#[tokio::test]
async fn a_late_stale_update_never_overwrites_a_newer_one() {
    let h = harness(&[sync_map("users").build()]);
    let record = h.engine.instantiate("users", "u1").unwrap();

    h.engine
        .receive(changed("name", json!("new")), remote_meta(5_000, 0, "a"))
        .unwrap();
    h.engine
        .receive(changed("name", json!("stale")), remote_meta(4_000, 0, "b"))
        .unwrap();

    assert_eq!(record.get("name"), Some(json!("new")));
}
