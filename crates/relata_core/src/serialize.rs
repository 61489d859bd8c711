//! Serialization of entity graphs into a schema-keyed JSON document.

use crate::collection::Collection;
use crate::entity::{Entity, Related};
use crate::error::{CoreError, CoreResult};
use crate::meta::RelationKind;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

/// Output shaping options for [`Serializer`].
///
/// The document is keyed by schema name, then by uuid, with a partial
/// field map per entity. What lands in the field map depends on the
/// entity's lifecycle: new entities emit their non-default payload,
/// dirty entities emit their primary key plus changed fields, and
/// clean entities collapse to a bare uuid reference.
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Follow relations into related entities and collections.
    pub deep: bool,
    /// Emit the full current state instead of a change-oriented
    /// subset.
    pub full: bool,
    /// Embed uuid references for traversed non-owning relations.
    pub rel: bool,
    /// Also traverse owning (`BelongsTo`) relations.
    pub back_rel: bool,
    /// Prefix prepended to every emitted uuid (idempotently).
    pub prefix: Option<String>,
}

/// Turns entities and collections into a JSON document.
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    options: SerializeOptions,
}

impl Serializer {
    /// Creates a serializer with the given options.
    #[must_use]
    pub fn new(options: SerializeOptions) -> Self {
        Self { options }
    }

    /// Serializes one entity (and, with `deep`, its relation graph).
    ///
    /// Fails with `TransactionInProgress` when any visited object
    /// still has an open transaction.
    pub fn serialize_entity(&self, entity: &Entity) -> CoreResult<JsonValue> {
        let mut run = Run {
            options: &self.options,
            output: Map::new(),
            processed: HashSet::new(),
        };
        run.entity(entity)?;
        Ok(JsonValue::Object(run.output))
    }

    /// Serializes every member of a collection.
    pub fn serialize_collection(&self, collection: &Collection) -> CoreResult<JsonValue> {
        let mut run = Run {
            options: &self.options,
            output: Map::new(),
            processed: HashSet::new(),
        };
        run.collection(collection)?;
        Ok(JsonValue::Object(run.output))
    }
}

/// Uuid reference(s) produced when a relation slot is traversed.
enum SlotRef {
    One(String),
    Many(Vec<String>),
}

struct Run<'a> {
    options: &'a SerializeOptions,
    output: Map<String, JsonValue>,
    processed: HashSet<String>,
}

impl Run<'_> {
    fn entity(&mut self, entity: &Entity) -> CoreResult<String> {
        if let Some(tx) = entity.transaction() {
            return Err(CoreError::transaction_in_progress(
                tx.uuid(),
                format!("{}[{}]", entity.meta().name(), entity.uuid()),
            ));
        }
        if !self.processed.insert(entity.uuid().to_owned()) {
            return Ok(entity.uuid().to_owned());
        }

        let meta = entity.meta().clone();
        let mut obj = Map::new();

        if entity.is_new() {
            let fk_fields = meta.foreign_key_fields();
            for field in meta.fields() {
                if meta.is_primary_key(field.name()) {
                    continue;
                }
                let value = entity.get(field.name())?;
                if fk_fields.contains(&field.name()) && value == *field.default_value() {
                    continue;
                }
                obj.insert(field.name().to_owned(), JsonValue::from(&value));
            }
        } else if self.options.full {
            for field in meta.fields() {
                let value = entity.get(field.name())?;
                obj.insert(field.name().to_owned(), JsonValue::from(&value));
            }
        } else if !entity.is_dirty() {
            if !self.options.deep {
                return Ok(entity.uuid().to_owned());
            }
            // Deep traversal keeps clean entities addressable through
            // their non-default primary key.
            for key in meta.primary_key() {
                let value = entity.get_initial(key)?;
                if value != *meta.field(key)?.default_value() {
                    obj.insert(key.clone(), JsonValue::from(&value));
                }
            }
        } else {
            for field in meta.fields() {
                if meta.is_primary_key(field.name()) {
                    let value = entity.get_initial(field.name())?;
                    if value != *field.default_value() {
                        obj.insert(field.name().to_owned(), JsonValue::from(&value));
                    }
                    continue;
                }
                let value = entity.get(field.name())?;
                if entity.get_initial(field.name())? != value {
                    obj.insert(field.name().to_owned(), JsonValue::from(&value));
                }
            }
        }

        if self.options.deep {
            for relation in meta.relations() {
                if !self.options.back_rel && relation.kind() == RelationKind::BelongsTo {
                    continue;
                }
                let Some(related) = entity.get_related(relation.name())? else {
                    continue;
                };
                let refs = self.related(&related)?;
                if self.options.rel && relation.kind() != RelationKind::BelongsTo {
                    let value = match refs {
                        SlotRef::One(uuid) => JsonValue::String(self.prefixed(&uuid)),
                        SlotRef::Many(uuids) => JsonValue::Array(
                            uuids
                                .iter()
                                .map(|u| JsonValue::String(self.prefixed(u)))
                                .collect(),
                        ),
                    };
                    obj.insert(relation.name().to_owned(), value);
                }
            }
        }

        let key = self.prefixed(entity.uuid());
        let bucket = self
            .output
            .entry(meta.name().to_owned())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(bucket) = bucket {
            bucket.insert(key, JsonValue::Object(obj));
        }
        Ok(entity.uuid().to_owned())
    }

    fn collection(&mut self, collection: &Collection) -> CoreResult<Vec<String>> {
        if let Some(tx) = collection.transaction() {
            return Err(CoreError::transaction_in_progress(
                tx.uuid(),
                format!("{}[{}]", collection.meta().name(), collection.uuid()),
            ));
        }
        if !self.processed.insert(collection.uuid().to_owned()) {
            return Ok(collection
                .entities()
                .iter()
                .map(|e| e.uuid().to_owned())
                .collect());
        }

        let mut refs = Vec::new();
        for member in collection.entities() {
            refs.push(self.entity(&member)?);
        }
        Ok(refs)
    }

    fn related(&mut self, related: &Related) -> CoreResult<SlotRef> {
        match related {
            Related::Entity(entity) => Ok(SlotRef::One(self.entity(entity)?)),
            Related::Collection(collection) => Ok(SlotRef::Many(self.collection(collection)?)),
        }
    }

    fn prefixed(&self, uuid: &str) -> String {
        match self.options.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                let stripped = uuid.strip_prefix(prefix).unwrap_or(uuid);
                format!("{prefix}{stripped}")
            }
            _ => uuid.to_owned(),
        }
    }
}
