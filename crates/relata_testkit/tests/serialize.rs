//! Serializer output shape tests.

use relata_core::{CoreError, SerializeOptions, Serializer};
use relata_testkit::prelude::*;
use serde_json::json;

#[test]
fn new_entity_emits_non_key_fields() {
    let domain = Domain::new();
    let simple = domain.simple(1);
    simple.set("title", "hello").unwrap();

    let doc = Serializer::default().serialize_entity(&simple).unwrap();
    let entry = &doc["Simple"][simple.uuid()];
    assert_eq!(entry["title"], json!("hello"));
    assert_eq!(entry["value"], json!(0.0));
    assert_eq!(entry["flag"], json!(false));
    assert!(entry.get("id").is_none());
}

#[test]
fn new_entity_skips_default_foreign_keys() {
    let domain = Domain::new();
    let card = domain.card(10);
    card.set("number", "4111").unwrap();

    let doc = Serializer::default().serialize_entity(&card).unwrap();
    let entry = &doc["Card"][card.uuid()];
    assert_eq!(entry["number"], json!("4111"));
    // userId and accountId sit at their defaults and are foreign keys.
    assert!(entry.get("userId").is_none());
    assert!(entry.get("accountId").is_none());
}

#[test]
fn clean_entity_collapses_to_a_reference() {
    let domain = Domain::new();
    let simple = domain.simple(1);
    simple.flush();

    let doc = Serializer::default().serialize_entity(&simple).unwrap();
    assert_eq!(doc, json!({}));
}

#[test]
fn dirty_entity_emits_key_and_changed_fields() {
    let domain = Domain::new();
    let simple = domain.simple(5);
    simple.flush();
    simple.set("title", "changed").unwrap();

    let doc = Serializer::default().serialize_entity(&simple).unwrap();
    let entry = &doc["Simple"][simple.uuid()];
    assert_eq!(entry["id"], json!(5));
    assert_eq!(entry["title"], json!("changed"));
    assert!(entry.get("value").is_none());
    assert!(entry.get("flag").is_none());
}

#[test]
fn full_option_emits_the_whole_state() {
    let domain = Domain::new();
    let simple = domain.simple(5);
    simple.flush();

    let serializer = Serializer::new(SerializeOptions {
        full: true,
        ..Default::default()
    });
    let doc = serializer.serialize_entity(&simple).unwrap();
    let entry = &doc["Simple"][simple.uuid()];
    assert_eq!(entry["id"], json!(5));
    assert_eq!(entry["value"], json!(0.0));
    assert_eq!(entry["flag"], json!(false));
    assert_eq!(entry["title"], json!(""));
}

#[test]
fn deep_traversal_includes_related_entities() {
    let domain = Domain::new();
    let user = domain.user(1, "Ada");
    let card = domain.card(10);
    card.set_related("user", Some(user.clone().into())).unwrap();

    let serializer = Serializer::new(SerializeOptions {
        deep: true,
        rel: true,
        ..Default::default()
    });
    let doc = serializer.serialize_entity(&user).unwrap();

    let user_entry = &doc["User"][user.uuid()];
    assert_eq!(user_entry["name"], json!("Ada"));
    assert_eq!(user_entry["card"], json!([card.uuid()]));
    assert!(doc["Card"].get(card.uuid()).is_some());
}

#[test]
fn owning_relations_need_back_rel_to_be_followed() {
    let domain = Domain::new();
    let user = domain.user(1, "Ada");
    let card = domain.card(10);
    card.set_related("user", Some(user.clone().into())).unwrap();

    let shallow = Serializer::new(SerializeOptions {
        deep: true,
        ..Default::default()
    });
    let doc = shallow.serialize_entity(&card).unwrap();
    assert!(doc.get("User").is_none());

    let full = Serializer::new(SerializeOptions {
        deep: true,
        back_rel: true,
        ..Default::default()
    });
    let doc = full.serialize_entity(&card).unwrap();
    assert!(doc["User"].get(user.uuid()).is_some());
}

#[test]
fn prefix_is_applied_idempotently() {
    let domain = Domain::new();
    let simple = domain.simple(5);
    simple.flush();
    simple.set("title", "x").unwrap();

    let serializer = Serializer::new(SerializeOptions {
        prefix: Some("srv:".to_owned()),
        ..Default::default()
    });
    let doc = serializer.serialize_entity(&simple).unwrap();
    let key = format!("srv:{}", simple.uuid());
    assert!(doc["Simple"].get(&key).is_some());
}

#[test]
fn open_transactions_block_serialization() {
    let domain = Domain::new();
    let simple = domain.simple(1);
    let tx = simple.begin_transaction(None, false).unwrap();

    let err = Serializer::default().serialize_entity(&simple).unwrap_err();
    assert!(matches!(err, CoreError::TransactionInProgress { .. }));
    tx.rollback().unwrap();
}

#[test]
fn collections_serialize_their_members() {
    let domain = Domain::new();
    let a = domain.card(1);
    let b = domain.card(2);
    for card in [&a, &b] {
        card.set("number", "4111").unwrap();
    }
    let collection = domain.card_collection(vec![a.clone(), b.clone()]);

    let doc = Serializer::default().serialize_collection(&collection).unwrap();
    assert!(doc["Card"].get(a.uuid()).is_some());
    assert!(doc["Card"].get(b.uuid()).is_some());
}

#[test]
fn shared_entities_are_serialized_once() {
    let domain = Domain::new();
    let user = domain.user(1, "Ada");
    let a = domain.card(1);
    let b = domain.card(2);
    let collection = domain.card_collection(vec![a.clone(), b.clone()]);
    user.set_related("card", Some(collection.into())).unwrap();

    let serializer = Serializer::new(SerializeOptions {
        deep: true,
        back_rel: true,
        rel: true,
        ..Default::default()
    });
    // Both cards point back at the user; the graph is cyclic but each
    // object appears exactly once.
    let doc = serializer.serialize_entity(&user).unwrap();
    assert_eq!(doc["User"].as_object().unwrap().len(), 1);
    assert_eq!(doc["Card"].as_object().unwrap().len(), 2);
}
