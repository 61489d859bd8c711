use super::*;
use crate::error::CoreError;
use crate::event::{entity as entity_topics, relation as relation_topics};
use crate::meta::{FieldDef, MetaRegistry, Relation};
use std::cell::Cell;
use std::collections::HashMap;

fn registry() -> Rc<MetaRegistry> {
    let registry = MetaRegistry::new();
    let user = EntityMeta::new(
        "User",
        ["id"],
        vec![
            FieldDef::new("id", "integer", 0),
            FieldDef::new("name", "string", ""),
            FieldDef::new("age", "integer", 0),
        ],
        vec![Relation::new(
            "cards",
            RelationKind::HasMany,
            "Card",
            vec![("id".to_owned(), "userId".to_owned())],
            false,
        )],
    )
    .unwrap();
    let card = EntityMeta::new(
        "Card",
        ["id"],
        vec![
            FieldDef::new("id", "integer", 0),
            FieldDef::new("userId", "integer", 0),
            FieldDef::new("label", "string", ""),
        ],
        vec![Relation::new(
            "user",
            RelationKind::BelongsTo,
            "User",
            vec![("userId".to_owned(), "id".to_owned())],
            false,
        )],
    )
    .unwrap();
    registry.register(user, false).unwrap();
    registry.register(card, false).unwrap();
    registry
}

fn user(registry: &MetaRegistry, id: i64) -> Entity {
    let meta = registry.entity("User").unwrap();
    let mut state = HashMap::new();
    state.insert("id".to_owned(), Value::Int(id));
    Entity::new(meta, state, EntityOptions::default()).unwrap()
}

fn card(registry: &MetaRegistry, id: i64) -> Entity {
    let meta = registry.entity("Card").unwrap();
    let mut state = HashMap::new();
    state.insert("id".to_owned(), Value::Int(id));
    Entity::new(meta, state, EntityOptions::default()).unwrap()
}

#[test]
fn defaults_fill_unspecified_fields() {
    let registry = registry();
    let user = user(&registry, 7);
    assert_eq!(user.get("id").unwrap(), Value::Int(7));
    assert_eq!(user.get("name").unwrap(), Value::Str(String::new()));
    assert_eq!(user.get("age").unwrap(), Value::Int(0));
    assert!(user.is_new());
    assert!(!user.is_dirty());
}

#[test]
fn constructor_rejects_unknown_field() {
    let registry = registry();
    let meta = registry.entity("User").unwrap();
    let mut state = HashMap::new();
    state.insert("nope".to_owned(), Value::Int(1));
    let err = Entity::new(meta, state, EntityOptions::default());
    assert!(matches!(err, Err(CoreError::UnknownField { .. })));
}

#[test]
fn constructor_creates_empty_to_many_collections() {
    let registry = registry();
    let user = user(&registry, 1);
    let related = user.get_related("cards").unwrap().unwrap();
    let collection = related.as_collection().unwrap();
    assert!(collection.is_empty());
}

#[test]
fn set_tracks_dirty_fields_and_revert_clears_them() {
    let registry = registry();
    let user = user(&registry, 1);
    user.flush();
    assert!(user.set("name", "Ada").unwrap());
    assert_eq!(user.changed_fields(), vec!["name".to_owned()]);
    assert!(user.is_dirty());
    user.revert();
    assert!(!user.is_dirty());
    assert_eq!(user.get("name").unwrap(), Value::Str(String::new()));
}

#[test]
fn noop_set_skips_events_and_read_only_check() {
    let registry = registry();
    let meta = registry.entity("User").unwrap();
    let user = Entity::new(
        meta,
        HashMap::new(),
        EntityOptions {
            read_only: true,
            ..Default::default()
        },
    )
    .unwrap();
    let fired = Rc::new(Cell::new(false));
    let seen = Rc::clone(&fired);
    user.channel().add_listener(
        EventTopic::plain(entity_topics::BEFORE_CHANGE),
        move |_| seen.set(true),
    );
    // Same value as the default: no-op even though read-only.
    assert!(user.set("age", 0).unwrap());
    assert!(!fired.get());
    // A real change is blocked, silently.
    assert!(!user.set("age", 30).unwrap());
    // Force bypasses the guard.
    assert!(user.set_opts("age", 30, Notify::Events, true).unwrap());
    assert_eq!(user.get("age").unwrap(), Value::Int(30));
}

#[test]
fn before_change_cancellation_keeps_state() {
    let registry = registry();
    let user = user(&registry, 1);
    user.channel().add_listener(
        EventTopic::plain(entity_topics::BEFORE_CHANGE),
        |event| event.prevent_default(),
    );
    assert!(!user.set("name", "Ada").unwrap());
    assert_eq!(user.get("name").unwrap(), Value::Str(String::new()));
}

#[test]
fn changed_event_carries_fields_and_states() {
    let registry = registry();
    let user = user(&registry, 1);
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&seen);
    user.channel().add_listener(
        EventTopic::plain(entity_topics::CHANGED),
        move |event| {
            let (fields, old_state, new_state) = event.data().as_field_change().unwrap();
            assert_eq!(old_state.get("name"), Some(&Value::Str(String::new())));
            assert_eq!(new_state.get("name"), Some(&Value::Str("Ada".to_owned())));
            sink.borrow_mut().extend(fields.iter().cloned());
        },
    );
    user.set("name", "Ada").unwrap();
    assert_eq!(seen.borrow().as_slice(), ["name".to_owned()]);
}

#[test]
fn silent_set_dispatches_nothing() {
    let registry = registry();
    let user = user(&registry, 1);
    let fired = Rc::new(Cell::new(false));
    let seen = Rc::clone(&fired);
    user.channel().add_listener(
        EventTopic::any_of([entity_topics::BEFORE_CHANGE, entity_topics::CHANGED]),
        move |_| seen.set(true),
    );
    assert!(user.set_opts("name", "Ada", Notify::Silent, false).unwrap());
    assert!(!fired.get());
    assert_eq!(user.get("name").unwrap(), Value::Str("Ada".to_owned()));
}

#[test]
fn flush_promotes_state_and_clears_is_new() {
    let registry = registry();
    let user = user(&registry, 1);
    user.set("name", "Ada").unwrap();
    user.flush();
    assert!(!user.is_new());
    assert!(!user.is_dirty());
    assert_eq!(user.get_initial("name").unwrap(), Value::Str("Ada".to_owned()));
}

#[test]
fn field_filters_coerce_assigned_values() {
    let registry = registry();
    let user = user(&registry, 1);
    user.set("age", "42").unwrap();
    assert_eq!(user.get("age").unwrap(), Value::Int(42));
}

#[test]
fn id_returns_primary_key_values() {
    let registry = registry();
    let user = user(&registry, 9);
    assert_eq!(user.id(), vec![Value::Int(9)]);
}

#[test]
fn belongs_to_assignment_copies_foreign_key_and_joins_collection() {
    let registry = registry();
    let user = user(&registry, 5);
    let card = card(&registry, 1);
    assert!(card
        .set_related("user", Some(Related::Entity(user.clone())))
        .unwrap());
    assert_eq!(card.get("userId").unwrap(), Value::Int(5));
    let cards = user.get_related("cards").unwrap().unwrap();
    assert!(cards.as_collection().unwrap().contains(&card));
}

#[test]
fn belongs_to_reassignment_moves_membership() {
    let registry = registry();
    let first = user(&registry, 1);
    let second = user(&registry, 2);
    let card = card(&registry, 1);
    card.set_related("user", Some(Related::Entity(first.clone())))
        .unwrap();
    card.set_related("user", Some(Related::Entity(second.clone())))
        .unwrap();
    let first_cards = first.get_related("cards").unwrap().unwrap();
    let second_cards = second.get_related("cards").unwrap().unwrap();
    assert!(!first_cards.as_collection().unwrap().contains(&card));
    assert!(second_cards.as_collection().unwrap().contains(&card));
    assert_eq!(card.get("userId").unwrap(), Value::Int(2));
}

#[test]
fn foreign_key_changes_mirror_into_linked_entities() {
    let registry = registry();
    let user = user(&registry, 5);
    let card = card(&registry, 1);
    card.set_related("user", Some(Related::Entity(user.clone())))
        .unwrap();
    user.set("id", 6).unwrap();
    assert_eq!(card.get("userId").unwrap(), Value::Int(6));
}

#[test]
fn has_many_assignment_links_members_back() {
    let registry = registry();
    let user = user(&registry, 3);
    let a = card(&registry, 1);
    let b = card(&registry, 2);
    let collection_meta = registry.collection("Card").unwrap();
    let collection = Collection::new(
        collection_meta,
        vec![a.clone(), b.clone()],
        crate::collection::CollectionOptions::default(),
    )
    .unwrap();
    assert!(user
        .set_related("cards", Some(Related::Collection(collection)))
        .unwrap());
    for card in [&a, &b] {
        let related = card.get_related("user").unwrap().unwrap();
        assert_eq!(related.uuid(), user.uuid());
        assert_eq!(card.get("userId").unwrap(), Value::Int(3));
    }
}

#[test]
fn direct_collection_add_sets_backlink() {
    let registry = registry();
    let user = user(&registry, 4);
    let card = card(&registry, 1);
    let related = user.get_related("cards").unwrap().unwrap();
    let collection = related.as_collection().unwrap().clone();
    assert!(collection.add(vec![card.clone()]).unwrap());
    let back = card.get_related("user").unwrap().unwrap();
    assert_eq!(back.uuid(), user.uuid());
    assert_eq!(card.get("userId").unwrap(), Value::Int(4));
}

#[test]
fn direct_collection_remove_clears_backlink() {
    let registry = registry();
    let user = user(&registry, 4);
    let card = card(&registry, 1);
    card.set_related("user", Some(Related::Entity(user.clone())))
        .unwrap();
    let related = user.get_related("cards").unwrap().unwrap();
    let collection = related.as_collection().unwrap().clone();
    assert!(collection.remove(vec![card.clone()]).unwrap());
    assert!(card.get_related("user").unwrap().is_none());
}

#[test]
fn cancelled_relation_change_rolls_everything_back() {
    let registry = registry();
    let user = user(&registry, 5);
    let card = card(&registry, 1);
    card.channel().add_listener(
        EventTopic::plain(relation_topics::BEFORE_CHANGE),
        |event| event.prevent_default(),
    );
    assert!(!card
        .set_related("user", Some(Related::Entity(user.clone())))
        .unwrap());
    assert!(card.get_related("user").unwrap().is_none());
    assert_eq!(card.get("userId").unwrap(), Value::Int(0));
    let cards = user.get_related("cards").unwrap().unwrap();
    assert!(cards.as_collection().unwrap().is_empty());
}

#[test]
fn relation_type_mismatch_is_rejected() {
    let registry = registry();
    let user_a = user(&registry, 1);
    let user_b = user(&registry, 2);
    let err = user_a.set_related("cards", Some(Related::Entity(user_b)));
    assert!(matches!(err, Err(CoreError::RelationTypeMismatch { .. })));
}

#[test]
fn transaction_defers_changed_events_until_commit() {
    let registry = registry();
    let user = user(&registry, 1);
    let seen: Rc<RefCell<Vec<Vec<String>>>> = Rc::default();
    let sink = Rc::clone(&seen);
    user.channel().add_listener(
        EventTopic::plain(entity_topics::CHANGED),
        move |event| {
            let (fields, _, _) = event.data().as_field_change().unwrap();
            sink.borrow_mut().push(fields.to_vec());
        },
    );
    let tx = user.begin_transaction(None, false).unwrap();
    user.set("name", "Ada").unwrap();
    user.set("age", 36).unwrap();
    assert!(seen.borrow().is_empty());
    tx.commit().unwrap();
    assert_eq!(
        seen.borrow().as_slice(),
        [vec!["name".to_owned(), "age".to_owned()]]
    );
}

#[test]
fn transaction_rollback_restores_the_snapshot() {
    let registry = registry();
    let user = user(&registry, 1);
    user.set("name", "Ada").unwrap();
    let tx = user.begin_transaction(None, false).unwrap();
    user.set("name", "Grace").unwrap();
    user.set("age", 36).unwrap();
    tx.rollback().unwrap();
    assert!(!user.has_transaction());
    assert_eq!(user.get("name").unwrap(), Value::Str("Ada".to_owned()));
    assert_eq!(user.get("age").unwrap(), Value::Int(0));
}

#[test]
fn joining_a_second_transaction_fails() {
    let registry = registry();
    let user = user(&registry, 1);
    let _first = user.begin_transaction(None, false).unwrap();
    let second = Transaction::new(None);
    let err = user.begin_transaction(Some(&second), false);
    assert!(matches!(err, Err(CoreError::TransactionAlreadyActive { .. })));
}

#[test]
fn deep_transaction_joins_related_objects() {
    let registry = registry();
    let user = user(&registry, 1);
    let card = card(&registry, 1);
    card.set_related("user", Some(Related::Entity(user.clone())))
        .unwrap();
    let tx = user.begin_transaction(None, true).unwrap();
    assert!(card.has_transaction());
    assert_eq!(card.transaction().unwrap(), tx);
    tx.commit().unwrap();
    assert!(!card.has_transaction());
}

#[test]
fn relation_assignment_is_atomic_when_a_member_cancels() {
    let registry = registry();
    let user = user(&registry, 5);
    let card = card(&registry, 1);
    // Cancelling the foreign-key copy on the card aborts the whole
    // assignment.
    card.channel().add_listener(
        EventTopic::plain(entity_topics::BEFORE_CHANGE),
        |event| event.prevent_default(),
    );
    assert!(!card
        .set_related("user", Some(Related::Entity(user.clone())))
        .unwrap());
    assert!(card.get_related("user").unwrap().is_none());
    let cards = user.get_related("cards").unwrap().unwrap();
    assert!(cards.as_collection().unwrap().is_empty());
}

#[test]
fn clear_resets_to_defaults() {
    let registry = registry();
    let user = user(&registry, 9);
    user.set("name", "Ada").unwrap();
    user.clear();
    assert_eq!(user.get("id").unwrap(), Value::Int(0));
    assert_eq!(user.get("name").unwrap(), Value::Str(String::new()));
    assert!(!user.is_dirty());
}
