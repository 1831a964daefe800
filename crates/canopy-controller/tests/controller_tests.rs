//! End-to-end convergence of the controllers over an admitted in-memory store

use canopy_controller::lifecycle::CONFLICT_MESSAGE;
use canopy_controller::ReconcileError;
use canopy_model::{
    markers, ConditionStatus, Intent, IntentState, Object, ObjectKey, OwnerReference, PropagateMode, Role, Scope,
    CONDITION_STALLED, REASON_CONFLICT,
};
use canopy_store::{ObjectStore, ObjectStoreExt, StoreError};
use canopy_test_utils::{config_map, config_map_gvk, Harness, ACTOR};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn data(obj: &canopy_model::DynamicObject) -> serde_json::Value {
    obj.data["data"].clone()
}

/// Poll `check` until it holds, failing after a few seconds
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_intent_materializes_labelled_sub_scope() {
    let h = Harness::with_label_keys(&["team"]).await;
    h.create_scope(Scope::new("r").with_role(Role::Root).with_label("team", "neco"))
        .await
        .unwrap();
    h.create_intent(Intent::new("r", "sub1")).await.unwrap();
    h.converge().await;

    let sub = h.scope("sub1").await.unwrap();
    assert_eq!(sub.parent_ref(), Some("r"));
    assert_eq!(sub.metadata.label("team"), Some("neco"));
    assert_eq!(sub.metadata.label(markers::LABEL_CREATED_BY), Some(markers::CREATED_BY));

    let intent = h.intent("r", "sub1").await.unwrap();
    assert_eq!(intent.status.state, Some(IntentState::Ok));
    assert!(intent.status.conditions.is_empty());
    assert!(intent.finalizer_present());
}

#[tokio::test]
async fn test_parent_label_changes_fan_out() {
    let h = Harness::with_label_keys(&["team"]).await;
    h.create_scope(Scope::new("r").with_role(Role::Root).with_label("team", "neco"))
        .await
        .unwrap();
    h.create_intent(Intent::new("r", "s")).await.unwrap();
    h.converge().await;

    let patch = json!({"metadata": {"labels": {"team": "maneki"}}});
    h.store
        .merge_patch(&Scope::gvk(), &ObjectKey::cluster("r"), &patch, None, ACTOR)
        .await
        .unwrap();
    h.converge().await;
    assert_eq!(h.scope("s").await.unwrap().metadata.label("team"), Some("maneki"));

    let patch = json!({"metadata": {"labels": {"team": null}}});
    h.store
        .merge_patch(&Scope::gvk(), &ObjectKey::cluster("r"), &patch, None, ACTOR)
        .await
        .unwrap();
    h.converge().await;
    let sub = h.scope("s").await.unwrap();
    assert_eq!(sub.metadata.label("team"), None);
    assert_eq!(sub.parent_ref(), Some("r"));
}

#[tokio::test]
async fn test_intent_metadata_wins_over_parent() {
    let mut config = canopy_test_utils::config(&["team"]);
    config.sub_namespace_label_keys = vec!["team".into()];
    let h = Harness::new(config).await;
    h.create_scope(Scope::new("r").with_role(Role::Root).with_label("team", "neco"))
        .await
        .unwrap();
    h.create_intent(Intent::new("r", "s").with_label("team", "own")).await.unwrap();
    h.converge().await;

    assert_eq!(h.scope("s").await.unwrap().metadata.label("team"), Some("own"));
}

#[tokio::test]
async fn test_conflicting_intent_leaves_foreign_scope_alone() {
    let h = Harness::with_label_keys(&["team"]).await;
    h.root("a").await;
    h.create_scope(Scope::new("b").with_role(Role::Root).with_label("team", "b"))
        .await
        .unwrap();
    h.create_scope(Scope::new("x").with_parent("b")).await.unwrap();
    h.converge().await;
    let before = h.scope("x").await.unwrap();

    h.create_intent(Intent::new("a", "x")).await.unwrap();
    h.converge().await;

    let intent = h.intent("a", "x").await.unwrap();
    assert_eq!(intent.status.state, Some(IntentState::Conflict));
    let stalled = intent.status.condition(CONDITION_STALLED).unwrap();
    assert_eq!(stalled.status, ConditionStatus::True);
    assert_eq!(stalled.reason, REASON_CONFLICT);
    assert_eq!(stalled.message, CONFLICT_MESSAGE);
    assert_eq!(h.scope("x").await.unwrap(), before);

    // removing the losing intent must not take the foreign scope with it
    h.store
        .delete(&Intent::gvk(), &ObjectKey::namespaced("a", "x"))
        .await
        .unwrap();
    h.converge().await;
    assert!(h.intent("a", "x").await.is_none());
    assert_eq!(h.scope("x").await.unwrap(), before);
}

#[tokio::test]
async fn test_deleted_sub_scope_is_rematerialized() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;

    h.delete_scope("s").await.unwrap();
    assert!(h.scope("s").await.is_none());
    h.converge().await;

    let sub = h.scope("s").await.unwrap();
    assert_eq!(sub.parent_ref(), Some("r"));
}

#[tokio::test]
async fn test_create_mode_copies_are_provisioned_once() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.put(&config_map("r", "cm", "k", "v").with_propagate(PropagateMode::Create))
        .await;
    h.converge().await;

    let copy = h.object("s", "cm").await.unwrap();
    assert_eq!(copy.source_scope(), Some("r"));
    assert_eq!(data(&copy), json!({"k": "v"}));

    h.edit_data("s", "cm", json!({"k": "edited"})).await;
    h.edit_data("r", "cm", json!({"k": "v2"})).await;
    for _ in 0..3 {
        h.converge().await;
    }
    assert_eq!(data(&h.object("s", "cm").await.unwrap()), json!({"k": "edited"}));
}

#[tokio::test]
async fn test_update_mode_cascades_through_two_levels() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.create_intent(Intent::new("s", "t")).await.unwrap();
    h.converge().await;

    h.put(&config_map("r", "cm", "k", "v").with_propagate(PropagateMode::Update))
        .await;
    h.converge().await;
    assert_eq!(h.object("s", "cm").await.unwrap().source_scope(), Some("r"));
    assert_eq!(h.object("t", "cm").await.unwrap().source_scope(), Some("s"));

    // edits to an update-mode copy are reverted
    h.edit_data("t", "cm", json!({"k": "local"})).await;
    h.converge().await;
    assert_eq!(data(&h.object("t", "cm").await.unwrap()), json!({"k": "v"}));

    h.edit_data("r", "cm", json!({"k": "v2"})).await;
    h.converge().await;
    assert_eq!(data(&h.object("t", "cm").await.unwrap()), json!({"k": "v2"}));

    h.delete_object("s", "cm").await;
    h.converge().await;
    assert_eq!(data(&h.object("s", "cm").await.unwrap()), json!({"k": "v2"}));

    h.delete_object("r", "cm").await;
    h.converge().await;
    assert!(h.object("s", "cm").await.is_none());
    assert!(h.object("t", "cm").await.is_none());
}

#[tokio::test]
async fn test_copies_lose_their_origin_when_propagation_stops() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.put(&config_map("r", "cm", "k", "v").with_propagate(PropagateMode::Update))
        .await;
    h.converge().await;
    assert!(h.object("s", "cm").await.is_some());

    let patch = json!({"metadata": {"annotations": {(markers::ANN_PROPAGATE): null}}});
    h.store
        .merge_patch(&config_map_gvk(), &ObjectKey::namespaced("r", "cm"), &patch, None, ACTOR)
        .await
        .unwrap();
    h.converge().await;
    assert!(h.object("s", "cm").await.is_none());
    assert!(h.object("r", "cm").await.is_some());
}

#[tokio::test]
async fn test_templates_feed_instances() {
    let h = Harness::with_label_keys(&["team"]).await;
    h.create_scope(Scope::new("tpl").with_role(Role::Template).with_label("team", "neco"))
        .await
        .unwrap();
    h.put(&config_map("tpl", "cm", "k", "v").with_propagate(PropagateMode::Update))
        .await;
    h.create_scope(Scope::new("inst").with_template("tpl")).await.unwrap();
    h.converge().await;

    let inst = h.scope("inst").await.unwrap();
    assert_eq!(inst.metadata.label("team"), Some("neco"));
    assert_eq!(h.object("inst", "cm").await.unwrap().source_scope(), Some("tpl"));

    // detaching the instance drops what it received
    let patch = json!({"metadata": {"labels": {(markers::LABEL_TEMPLATE): null}}});
    h.store
        .merge_patch(&Scope::gvk(), &ObjectKey::cluster("inst"), &patch, None, ACTOR)
        .await
        .unwrap();
    h.converge().await;
    assert!(h.object("inst", "cm").await.is_none());
    assert_eq!(h.scope("inst").await.unwrap().metadata.label("team"), None);
}

#[tokio::test]
async fn test_generated_objects_inherit_mode_from_owner() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.put(&config_map("r", "owner", "k", "v").with_annotation(markers::ANN_PROPAGATE_GENERATED, "update"))
        .await;
    h.put(&config_map("r", "plain-owner", "k", "v")).await;

    let owned_by = |name: &str| OwnerReference {
        api_version: "v1".into(),
        kind: "ConfigMap".into(),
        name: name.into(),
        uid: None,
        controller: true,
    };
    let mut generated = config_map("r", "gen", "k", "v");
    generated.metadata.owner_references.push(owned_by("owner"));
    h.put(&generated).await;
    let mut plain = config_map("r", "plain", "k", "v");
    plain.metadata.owner_references.push(owned_by("plain-owner"));
    h.put(&plain).await;
    h.converge().await;

    let gen = h.object("r", "gen").await.unwrap();
    assert_eq!(gen.propagate_mode(), Some(PropagateMode::Update));
    assert!(h.object("s", "gen").await.is_some());

    let plain = h.object("r", "plain").await.unwrap();
    assert!(plain.marked_not_generated());
    assert!(h.object("s", "plain").await.is_none());
    assert!(h.object("s", "owner").await.is_none());
}

#[tokio::test]
async fn test_scopes_with_children_cannot_be_deleted() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;

    let err = h.delete_scope("r").await.unwrap_err();
    assert!(matches!(err, StoreError::Admission(_)), "{err}");
    assert!(!h.scope("r").await.unwrap().deletion_pending());

    h.store
        .delete(&Intent::gvk(), &ObjectKey::namespaced("r", "s"))
        .await
        .unwrap();
    h.converge().await;
    assert!(h.scope("s").await.is_none());
    assert!(h.intent("r", "s").await.is_none());

    h.delete_scope("r").await.unwrap();
    assert!(h.scope("r").await.is_none());
}

#[tokio::test]
async fn test_template_with_instances_cannot_be_deleted() {
    let h = Harness::with_label_keys(&[]).await;
    h.create_scope(Scope::new("tpl").with_role(Role::Template)).await.unwrap();
    h.create_scope(Scope::new("inst").with_template("tpl")).await.unwrap();

    assert!(matches!(h.delete_scope("tpl").await, Err(StoreError::Admission(_))));
    h.delete_scope("inst").await.unwrap();
    h.delete_scope("tpl").await.unwrap();
}

#[tokio::test]
async fn test_finalization_waits_for_grandchildren() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.create_intent(Intent::new("s", "t")).await.unwrap();
    h.converge().await;

    h.store
        .delete(&Intent::gvk(), &ObjectKey::namespaced("r", "s"))
        .await
        .unwrap();
    let err = h.try_converge().await.unwrap_err();
    assert!(matches!(err, ReconcileError::NotQuiescent(_)));

    let intent = h.intent("r", "s").await.unwrap();
    assert!(intent.deletion_pending());
    assert!(intent.finalizer_present());
    assert!(!h.scope("s").await.unwrap().deletion_pending());

    // once the grandchild is gone the blocked finalization goes through
    h.store
        .delete(&Intent::gvk(), &ObjectKey::namespaced("s", "t"))
        .await
        .unwrap();
    h.converge().await;
    assert!(h.scope("t").await.is_none());
    assert!(h.scope("s").await.is_none());
    assert!(h.intent("r", "s").await.is_none());
}

#[tokio::test]
async fn test_role_exclusivity_is_enforced() {
    let h = Harness::with_label_keys(&[]).await;
    h.root("p").await;
    h.create_scope(Scope::new("tpl").with_role(Role::Template)).await.unwrap();

    let both = Scope::new("c").with_parent("p").with_template("tpl");
    assert!(matches!(h.create_scope(both).await, Err(StoreError::Admission(_))));

    h.root_with_sub("r", "s").await;
    let mut root = h.scope("r").await.unwrap();
    root.metadata
        .labels
        .insert(markers::LABEL_PARENT.to_string(), "p".to_string());
    let err = h.store.update(&Scope::gvk(), &root, ACTOR).await.unwrap_err();
    assert!(matches!(err, StoreError::Admission(_)), "{err}");
    assert_eq!(h.scope("r").await.unwrap().parent_ref(), None);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::with_label_keys(&[]).await;
    h.root("r").await;
    h.create_intent(Intent::new("r", "s")).await.unwrap();
    h.inner.fail_next_writes(2);
    h.converge().await;

    assert_eq!(h.scope("s").await.unwrap().parent_ref(), Some("r"));
    assert_eq!(h.intent("r", "s").await.unwrap().status.state, Some(IntentState::Ok));
}

#[tokio::test]
async fn test_scope_deletion_survives_list_failures() {
    let h = Harness::with_label_keys(&[]).await;
    h.root("r").await;
    h.create_scope(Scope::new("s")).await.unwrap();
    h.create_intent(Intent::new("r", "s")).await.unwrap();
    h.converge().await;
    assert_eq!(h.intent("r", "s").await.unwrap().status.state, Some(IntentState::Conflict));

    // only the deletion event of the foreign scope points back at the intent
    h.delete_scope("s").await.unwrap();
    h.inner.fail_next_lists(1);
    h.converge().await;

    assert_eq!(h.scope("s").await.unwrap().parent_ref(), Some("r"));
    assert_eq!(h.intent("r", "s").await.unwrap().status.state, Some(IntentState::Ok));
}

#[tokio::test]
async fn test_running_manager_fans_out_and_drops_stale_copies() {
    let h = Harness::with_label_keys(&["team"]).await;
    let (stop, stopped) = watch::channel(false);

    let scenario = async {
        let h = &h;
        h.create_scope(Scope::new("r").with_role(Role::Root).with_label("team", "neco"))
            .await
            .unwrap();
        h.create_intent(Intent::new("r", "s")).await.unwrap();
        h.put(&config_map("r", "cm", "k", "v").with_propagate(PropagateMode::Update))
            .await;
        eventually("the copy in s", move || async move { h.object("s", "cm").await.is_some() }).await;

        let patch = json!({"metadata": {"labels": {"team": "maneki"}}});
        h.store
            .merge_patch(&Scope::gvk(), &ObjectKey::cluster("r"), &patch, None, ACTOR)
            .await
            .unwrap();
        eventually("the new label on s", move || async move {
            h.scope("s").await.is_some_and(|s| s.metadata.label("team") == Some("maneki"))
        })
        .await;

        let patch = json!({"metadata": {"annotations": {(markers::ANN_PROPAGATE): null}}});
        h.store
            .merge_patch(&config_map_gvk(), &ObjectKey::namespaced("r", "cm"), &patch, None, ACTOR)
            .await
            .unwrap();
        eventually("the stale copy to go", move || async move { h.object("s", "cm").await.is_none() }).await;
        assert!(h.object("r", "cm").await.is_some());

        stop.send(true).unwrap();
    };
    tokio::join!(h.manager.run(stopped), scenario);
}

#[tokio::test]
async fn test_copies_follow_their_scope_name() {
    let h = Harness::with_label_keys(&[]).await;
    h.root_with_sub("r", "s").await;
    h.put(&config_map("r", "cm", "k", "v").with_propagate(PropagateMode::Update))
        .await;
    h.converge().await;

    let copy = h.object("s", "cm").await.unwrap();
    assert_eq!(copy.key(), ObjectKey::namespaced("s", "cm"));
    assert!(copy.metadata.owner_references.is_empty());
    let listed = h
        .inner
        .list_json(&config_map_gvk(), &Default::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
}
