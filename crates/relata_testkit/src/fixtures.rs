//! Fixture schemas and entity factories.
//!
//! The domain mirrors a small billing model: a `User` has many
//! `Card`s, each `Card` belongs to a `User` and an `Account`, and an
//! `Account` has one `Card`. `Simple` is a relation-free schema for
//! field-level tests.

use relata_core::{
    Collection, CollectionOptions, Entity, EntityMeta, EntityOptions, Event, EventChannel,
    EventData, EventTopic, FieldDef, MetaRegistry, Relation, RelationKind, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

fn fk(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(local, remote)| ((*local).to_owned(), (*remote).to_owned()))
        .collect()
}

/// A registry pre-loaded with the fixture schemas.
pub struct Domain {
    registry: Rc<MetaRegistry>,
}

impl Domain {
    /// Builds and registers the fixture schemas.
    pub fn new() -> Self {
        let registry = MetaRegistry::new();

        let simple = EntityMeta::new(
            "Simple",
            ["id"],
            vec![
                FieldDef::new("id", "integer", 0),
                FieldDef::new("value", "float", 0.0),
                FieldDef::new("flag", "boolean", false),
                FieldDef::new("title", "string", ""),
            ],
            vec![],
        )
        .expect("Simple schema");

        let user = EntityMeta::new(
            "User",
            ["userId"],
            vec![
                FieldDef::new("userId", "integer", 0),
                FieldDef::new("name", "string", ""),
            ],
            vec![Relation::new(
                "card",
                RelationKind::HasMany,
                "Card",
                fk(&[("userId", "userId")]),
                true,
            )],
        )
        .expect("User schema");

        let card = EntityMeta::new(
            "Card",
            ["cardId"],
            vec![
                FieldDef::new("cardId", "integer", 0),
                FieldDef::new("userId", "integer", 0),
                FieldDef::new("accountId", "integer", 0),
                FieldDef::new("number", "string", ""),
            ],
            vec![
                Relation::new(
                    "user",
                    RelationKind::BelongsTo,
                    "User",
                    fk(&[("userId", "userId")]),
                    true,
                ),
                Relation::new(
                    "account",
                    RelationKind::BelongsTo,
                    "Account",
                    fk(&[("accountId", "accountId")]),
                    true,
                ),
            ],
        )
        .expect("Card schema");

        let account = EntityMeta::new(
            "Account",
            ["accountId"],
            vec![
                FieldDef::new("accountId", "integer", 0),
                FieldDef::new("balance", "float", 0.0),
            ],
            vec![Relation::new(
                "card",
                RelationKind::HasOne,
                "Card",
                fk(&[("accountId", "accountId")]),
                true,
            )],
        )
        .expect("Account schema");

        registry.register(simple, false).expect("register Simple");
        registry.register(user, false).expect("register User");
        registry.register(card, false).expect("register Card");
        registry.register(account, false).expect("register Account");

        Self { registry }
    }

    /// The underlying schema registry.
    pub fn registry(&self) -> &Rc<MetaRegistry> {
        &self.registry
    }

    /// A new `Simple` entity.
    pub fn simple(&self, id: i64) -> Entity {
        let meta = self.registry.entity("Simple").expect("Simple registered");
        let mut state = HashMap::new();
        state.insert("id".to_owned(), Value::Int(id));
        Entity::new(meta, state, EntityOptions::default()).expect("Simple entity")
    }

    /// A new `User` entity.
    pub fn user(&self, id: i64, name: &str) -> Entity {
        let meta = self.registry.entity("User").expect("User registered");
        let mut state = HashMap::new();
        state.insert("userId".to_owned(), Value::Int(id));
        state.insert("name".to_owned(), Value::Str(name.to_owned()));
        Entity::new(meta, state, EntityOptions::default()).expect("User entity")
    }

    /// A new `Card` entity.
    pub fn card(&self, id: i64) -> Entity {
        let meta = self.registry.entity("Card").expect("Card registered");
        let mut state = HashMap::new();
        state.insert("cardId".to_owned(), Value::Int(id));
        Entity::new(meta, state, EntityOptions::default()).expect("Card entity")
    }

    /// A new `Account` entity.
    pub fn account(&self, id: i64, balance: f64) -> Entity {
        let meta = self.registry.entity("Account").expect("Account registered");
        let mut state = HashMap::new();
        state.insert("accountId".to_owned(), Value::Int(id));
        state.insert("balance".to_owned(), Value::Float(balance));
        Entity::new(meta, state, EntityOptions::default()).expect("Account entity")
    }

    /// A new `Card` collection with the given members.
    pub fn card_collection(&self, cards: Vec<Entity>) -> Collection {
        let meta = self.registry.collection("Card").expect("Card registered");
        Collection::new(meta, cards, CollectionOptions::default()).expect("Card collection")
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

/// Records dispatched events for later assertions.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<RecordedEvent>>>,
}

/// One observed event.
#[derive(Clone)]
pub struct RecordedEvent {
    /// The concrete topic, rendered as `scope:name`.
    pub topic: String,
    /// Uuid of the dispatching object.
    pub source: String,
    /// Field names, for field change events.
    pub fields: Vec<String>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the recorder to a channel with the given selector.
    pub fn subscribe(&self, channel: &EventChannel, selector: EventTopic) {
        let sink = Rc::clone(&self.events);
        channel.add_listener(selector, move |event: &Event| {
            let fields = match event.data() {
                EventData::FieldChange { fields, .. } => fields.clone(),
                _ => Vec::new(),
            };
            sink.borrow_mut().push(RecordedEvent {
                topic: event.topic().to_string(),
                source: event.source().to_owned(),
                fields,
            });
        });
    }

    /// All recorded topics, in dispatch order.
    pub fn topics(&self) -> Vec<String> {
        self.events.borrow().iter().map(|e| e.topic.clone()).collect()
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.borrow().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Drops everything recorded so far.
    pub fn reset(&self) {
        self.events.borrow_mut().clear();
    }
}
