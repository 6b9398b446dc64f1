//! Integration tests for relation attributes: mirroring, queued edge operations and
//! lazy fetching

use akira::prelude::*;
use std::sync::Arc;

async fn setup() -> (Session, Arc<MemoryStore>, EntityType) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let session = Session::new(OgmConfig::default()).unwrap();
    let store = Arc::new(MemoryStore::new());
    session.connect(store.clone());
    let person = session
        .register(
            EntityType::builder("Person")
                .property("name", ScalarKind::String)
                .property("age", ScalarKind::Integer)
                .relation(
                    RelationDescriptor::many("spouses", "Person")
                        .bidirectional()
                        .with_edge_property(PropertyDescriptor::new("since", ScalarKind::String)),
                )
                .relation(RelationDescriptor::many("follows", "Person")),
        )
        .await
        .unwrap();
    (session, store, person)
}

async fn persisted(session: &Session, person: &EntityType, name: &str) -> Instance {
    let instance = session.instantiate(person, [("name", name)]).unwrap();
    instance.create().await.unwrap();
    instance
}

#[tokio::test]
async fn test_spouses_are_mirrored() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("spouses")
        .unwrap()
        .add(&senpai, Some(property_map([("since", "2024-01-01")])))
        .unwrap();

    // mirrored locally before any flush
    assert!(senpai.relation("spouses").unwrap().targets().contains(&nana));
    assert_eq!(nana.pending_operations(), 2);
    assert_eq!(senpai.pending_operations(), 0);

    nana.save().await.unwrap();
    assert_eq!(nana.pending_operations(), 0);
    assert_eq!(store.edge_count("default"), 2);

    // both directions are readable from fresh instances
    let fresh_senpai = session.fetch_by_id(&person, &senpai.id().unwrap()).await.unwrap();
    let spouses = fresh_senpai.relation("spouses").unwrap().get().await.unwrap();
    assert_eq!(spouses.len(), 1);
    let edge = spouses.one().unwrap();
    assert!(edge.target.same_node(&nana));
    assert_eq!(edge.property("since"), Some(&Value::from("2024-01-01")));

    let fresh_nana = session.fetch_by_id(&person, &nana.id().unwrap()).await.unwrap();
    assert!(fresh_nana
        .relation("spouses")
        .unwrap()
        .get()
        .await
        .unwrap()
        .contains(&senpai));
}

#[tokio::test]
async fn test_target_reads_mirrored_edge() {
    let (session, _store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("spouses")
        .unwrap()
        .add(&senpai, Some(property_map([("since", "2024-01-01")])))
        .unwrap();

    // the first read of the target fetches, and the unflushed mirror survives it
    let spouses = senpai.relation("spouses").unwrap().get().await.unwrap();
    assert!(spouses.contains(&nana));
    assert_eq!(spouses.one().unwrap().property("since"), Some(&Value::from("2024-01-01")));

    nana.save().await.unwrap();
    assert!(senpai.relation("spouses").unwrap().get().await.unwrap().contains(&nana));
    assert!(senpai.relation("spouses").unwrap().reload().await.unwrap().contains(&nana));
}

#[tokio::test]
async fn test_target_reads_mirror_of_unsaved_source() {
    let (session, _store, person) = setup().await;
    let senpai = persisted(&session, &person, "Senpai").await;
    let nana = session.instantiate(&person, [("name", "Nana")]).unwrap();

    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    assert!(senpai.relation("spouses").unwrap().get().await.unwrap().contains(&nana));

    nana.create().await.unwrap();
    assert!(senpai.relation("spouses").unwrap().reload().await.unwrap().contains(&nana));
    nana.save().await.unwrap();
    assert!(senpai.relation("spouses").unwrap().reload().await.unwrap().contains(&nana));
}

#[tokio::test]
async fn test_target_reads_unflushed_removal() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;
    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    nana.save().await.unwrap();

    let fresh = session.fetch_by_id(&person, &senpai.id().unwrap()).await.unwrap();
    nana.relation("spouses").unwrap().remove(&fresh).unwrap();
    assert!(fresh.relation("spouses").unwrap().get().await.unwrap().is_empty());
    assert_eq!(store.edge_count("default"), 2);

    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);
    assert!(fresh.relation("spouses").unwrap().reload().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_clears_both_sides() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 2);

    nana.relation("spouses").unwrap().remove(&senpai).unwrap();
    assert!(senpai.relation("spouses").unwrap().targets().is_empty());
    assert!(nana.relation("spouses").unwrap().targets().is_empty());

    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);

    // removing again is a no-op locally and in the store
    nana.relation("spouses").unwrap().remove(&senpai).unwrap();
    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);
}

#[tokio::test]
async fn test_one_directional_relation() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("follows").unwrap().add(&senpai, None).unwrap();
    assert!(senpai.relation("follows").unwrap().targets().is_empty());
    assert_eq!(nana.pending_operations(), 1);
    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 1);

    assert!(matches!(
        nana.relation("follows")
            .unwrap()
            .add(&senpai, Some(property_map([("since", "x")]))),
        Err(OgmError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_get_fetches_once() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;
    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    nana.save().await.unwrap();

    let fresh = session.fetch_by_id(&person, &nana.id().unwrap()).await.unwrap();
    let before = store.statement_count();
    let first = fresh.relation("spouses").unwrap().get().await.unwrap();
    assert_eq!(store.statement_count(), before + 1);
    let second = fresh.relation("spouses").unwrap().get().await.unwrap();
    assert_eq!(store.statement_count(), before + 1);
    assert_eq!(first.len(), second.len());

    fresh.relation("spouses").unwrap().reload().await.unwrap();
    assert_eq!(store.statement_count(), before + 2);
}

#[tokio::test]
async fn test_get_includes_unflushed_additions() {
    let (session, _store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("follows").unwrap().add(&senpai, None).unwrap();
    let follows = nana.relation("follows").unwrap().get().await.unwrap();
    assert!(follows.contains(&senpai));
}

#[tokio::test]
async fn test_get_on_unpersisted_owner() {
    let (session, _store, person) = setup().await;
    let nana = session.instantiate(&person, [("name", "Nana")]).unwrap();
    assert!(matches!(
        nana.relation("spouses").unwrap().get().await,
        Err(OgmError::UnknownNode)
    ));
}

#[tokio::test]
async fn test_additions_before_create_are_queued_on_create() {
    let (session, store, person) = setup().await;
    let senpai = persisted(&session, &person, "Senpai").await;
    let nana = session.instantiate(&person, [("name", "Nana")]).unwrap();

    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    assert_eq!(nana.pending_operations(), 0);
    assert!(nana.relation("spouses").unwrap().targets().contains(&senpai));

    nana.create().await.unwrap();
    assert_eq!(nana.pending_operations(), 2);
    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 2);
}

#[tokio::test]
async fn test_flush_to_unsaved_target_is_unknown_node() {
    let (session, _store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let ghost = session.instantiate(&person, [("name", "Ghost")]).unwrap();

    nana.relation("follows").unwrap().add(&ghost, None).unwrap();
    assert!(matches!(nana.save().await, Err(OgmError::UnknownNode)));
    assert_eq!(nana.pending_operations(), 1);

    ghost.create().await.unwrap();
    nana.save().await.unwrap();
    assert_eq!(nana.pending_operations(), 0);
}

#[tokio::test]
async fn test_failed_flush_keeps_queue_and_changes() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    nana.set("age", 30).unwrap();
    store.fail_when("MERGE (s)");

    assert!(matches!(nana.save().await, Err(OgmError::Store(_))));
    assert_eq!(nana.pending_operations(), 2);
    assert!(nana.is_dirty());
    assert_eq!(store.edge_count("default"), 0);
    let stored = session.fetch_by_id(&person, &nana.id().unwrap()).await.unwrap();
    assert_eq!(stored.get("age").unwrap(), Value::Null);

    store.clear_failures();
    nana.save().await.unwrap();
    assert_eq!(nana.pending_operations(), 0);
    assert!(!nana.is_dirty());
    assert_eq!(store.edge_count("default"), 2);
}

#[tokio::test]
async fn test_repeated_changes_collapse_per_edge() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    let spouses = nana.relation("spouses").unwrap();
    spouses.add(&senpai, None).unwrap();
    spouses.add(&senpai, None).unwrap();
    assert_eq!(nana.pending_operations(), 2);

    spouses.remove(&senpai).unwrap();
    assert_eq!(nana.pending_operations(), 2);
    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);
}

#[tokio::test]
async fn test_load_discards_pending_operations() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;

    nana.relation("follows").unwrap().add(&senpai, None).unwrap();
    assert_eq!(nana.pending_operations(), 1);
    nana.load().await.unwrap();
    assert_eq!(nana.pending_operations(), 0);

    nana.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);
    assert!(nana.relation("follows").unwrap().get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_valued_relation_replaces_target() {
    let (session, store, person) = setup().await;
    let pet = session
        .register(
            EntityType::builder("Pet")
                .property("name", ScalarKind::String)
                .relation(RelationDescriptor::one("owner", "Person")),
        )
        .await
        .unwrap();
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;
    let cat = persisted(&session, &pet, "Cat").await;

    let owner = cat.relation("owner").unwrap();
    owner.add(&nana, None).unwrap();
    cat.save().await.unwrap();
    owner.add(&senpai, None).unwrap();
    cat.save().await.unwrap();

    assert_eq!(store.edge_count("default"), 1);
    let current = owner.reload().await.unwrap();
    assert!(current.one().unwrap().target.same_node(&senpai));

    // a Pet is not a Person
    assert!(matches!(
        owner.add(&cat, None),
        Err(OgmError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_single_valued_relation_replaces_unread_target() {
    let (session, store, person) = setup().await;
    let pet = session
        .register(
            EntityType::builder("Pet")
                .property("name", ScalarKind::String)
                .relation(RelationDescriptor::one("owner", "Person")),
        )
        .await
        .unwrap();
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;
    let cat = persisted(&session, &pet, "Cat").await;
    cat.relation("owner").unwrap().add(&nana, None).unwrap();
    cat.save().await.unwrap();

    // a fresh handle has never read its owner back
    let fresh = session.fetch_by_id(&pet, &cat.id().unwrap()).await.unwrap();
    let owner = fresh.relation("owner").unwrap();
    owner.add(&senpai, None).unwrap();
    let current = owner.get().await.unwrap();
    assert_eq!(current.len(), 1);
    assert!(current.contains(&senpai));
    assert!(!current.contains(&nana));

    fresh.save().await.unwrap();
    assert_eq!(store.edge_count("default"), 1);
    let current = owner.reload().await.unwrap();
    assert!(current.one().unwrap().target.same_node(&senpai));
}

#[tokio::test]
async fn test_delete_removes_edges() {
    let (session, store, person) = setup().await;
    let nana = persisted(&session, &person, "Nana").await;
    let senpai = persisted(&session, &person, "Senpai").await;
    nana.relation("spouses").unwrap().add(&senpai, None).unwrap();
    nana.save().await.unwrap();

    senpai.delete().await.unwrap();
    assert_eq!(store.edge_count("default"), 0);
    assert!(nana.relation("spouses").unwrap().reload().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_relation() {
    let (session, _store, person) = setup().await;
    let nana = session.instantiate(&person, [("name", "Nana")]).unwrap();
    assert!(matches!(
        nana.relation("enemies"),
        Err(OgmError::UnknownRelation { .. })
    ));
}
