//! Entity schema descriptors.

use crate::error::{CoreError, CoreResult};
use crate::meta::field::FieldDef;
use crate::meta::relation::{Relation, RelationKind};
use std::collections::HashMap;
use std::rc::Rc;

/// Immutable description of an entity type: fields, primary key and
/// relations.
///
/// Created once per type at startup and registered in a
/// [`MetaRegistry`](crate::meta::MetaRegistry); relation targets may
/// resolve lazily after registration when schemas forward-reference
/// each other.
#[derive(Debug)]
pub struct EntityMeta {
    name: String,
    primary_key: Vec<String>,
    fields: Vec<Rc<FieldDef>>,
    field_index: HashMap<String, usize>,
    relations: Vec<Rc<Relation>>,
    relation_index: HashMap<String, usize>,
}

impl EntityMeta {
    /// Creates and validates a schema descriptor.
    ///
    /// Construction fails on duplicate field names, duplicate relation
    /// names, a relation named like a field, a primary key naming an
    /// undeclared field, or a foreign key naming an undeclared local
    /// field. These are programming errors and surface immediately.
    pub fn new(
        name: impl Into<String>,
        primary_key: impl IntoIterator<Item = impl Into<String>>,
        fields: Vec<FieldDef>,
        relations: Vec<Relation>,
    ) -> CoreResult<Rc<Self>> {
        let name = name.into();
        let primary_key: Vec<String> = primary_key.into_iter().map(Into::into).collect();

        let mut field_index = HashMap::new();
        let fields: Vec<Rc<FieldDef>> = fields.into_iter().map(Rc::new).collect();
        for (i, field) in fields.iter().enumerate() {
            if field_index.insert(field.name().to_owned(), i).is_some() {
                return Err(CoreError::DuplicateSchemaField {
                    schema: name,
                    field: field.name().to_owned(),
                });
            }
        }

        for key in &primary_key {
            if !field_index.contains_key(key) {
                return Err(CoreError::PrimaryKeyMismatch {
                    schema: name,
                    field: key.clone(),
                });
            }
        }

        let mut relation_index = HashMap::new();
        let relations: Vec<Rc<Relation>> = relations.into_iter().map(Rc::new).collect();
        for (i, relation) in relations.iter().enumerate() {
            let rel_name = relation.name().to_owned();
            if field_index.contains_key(&rel_name) {
                return Err(CoreError::NameCollision {
                    schema: name,
                    name: rel_name,
                });
            }
            if relation_index.insert(rel_name.clone(), i).is_some() {
                return Err(CoreError::DuplicateSchemaRelation {
                    schema: name,
                    relation: rel_name,
                });
            }
            for (local, _) in relation.foreign_key() {
                if !field_index.contains_key(local) {
                    return Err(CoreError::UnknownForeignKeyField {
                        schema: name,
                        relation: relation.name().to_owned(),
                        field: local.clone(),
                    });
                }
            }
        }

        Ok(Rc::new(Self {
            name,
            primary_key,
            fields,
            field_index,
            relations,
            relation_index,
        }))
    }

    /// The unique type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The primary key field names.
    #[must_use]
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Whether the field is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_key.iter().any(|k| k == field)
    }

    /// The declared fields, in order.
    #[must_use]
    pub fn fields(&self) -> &[Rc<FieldDef>] {
        &self.fields
    }

    /// The declared field names, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    /// Whether a field with the given name is declared.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field_index.contains_key(name)
    }

    /// Looks up a field declaration.
    pub fn field(&self, name: &str) -> CoreResult<&Rc<FieldDef>> {
        self.field_index
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| CoreError::unknown_field(&self.name, name))
    }

    /// The declared relations, in order.
    #[must_use]
    pub fn relations(&self) -> &[Rc<Relation>] {
        &self.relations
    }

    /// Whether a relation with the given name is declared.
    #[must_use]
    pub fn has_relation(&self, name: &str) -> bool {
        self.relation_index.contains_key(name)
    }

    /// Looks up a relation declaration.
    pub fn relation(&self, name: &str) -> CoreResult<Rc<Relation>> {
        self.relation_index
            .get(name)
            .map(|&i| Rc::clone(&self.relations[i]))
            .ok_or_else(|| CoreError::unknown_relation(&self.name, name))
    }

    /// Local fields that are part of some `BelongsTo` foreign key.
    #[must_use]
    pub fn foreign_key_fields(&self) -> Vec<&str> {
        let mut ret = Vec::new();
        for relation in &self.relations {
            if relation.kind() == RelationKind::BelongsTo {
                for (local, _) in relation.foreign_key() {
                    if !ret.contains(&local.as_str()) {
                        ret.push(local.as_str());
                    }
                }
            }
        }
        ret
    }

    /// Finds the first declared relation matching kind, target schema
    /// name and foreign key.
    #[must_use]
    pub fn find_relation(
        &self,
        kinds: &[RelationKind],
        target_name: &str,
        foreign_key: &[(String, String)],
    ) -> Option<Rc<Relation>> {
        self.relations
            .iter()
            .find(|rel| {
                kinds.contains(&rel.kind())
                    && rel.related_name() == target_name
                    && rel.foreign_key_eq(foreign_key)
            })
            .cloned()
    }

    /// The inverse of a declared relation on the related schema, if
    /// one is declared there.
    ///
    /// A `BelongsTo` pairs with a `HasOne` or `HasMany` (and vice
    /// versa) on the related schema whose foreign key is the mirror
    /// image of this one. When several candidates match, the first in
    /// declaration order wins. The result is computed once per
    /// relation and cached.
    pub fn backward_relation(&self, relation: &Rc<Relation>) -> CoreResult<Option<Rc<Relation>>> {
        if !self
            .relations
            .iter()
            .any(|r| Rc::ptr_eq(r, relation))
        {
            return Ok(None);
        }

        if let Some(cached) = relation.backward_cache().get() {
            return Ok(cached.clone());
        }

        let kinds: &[RelationKind] = match relation.kind() {
            RelationKind::BelongsTo => &[RelationKind::HasMany, RelationKind::HasOne],
            RelationKind::HasOne | RelationKind::HasMany => &[RelationKind::BelongsTo],
        };

        let inverted: Vec<(String, String)> = relation
            .foreign_key()
            .iter()
            .map(|(local, remote)| (remote.clone(), local.clone()))
            .collect();

        let related = relation.related_entity_meta()?;
        let found = related.find_relation(kinds, &self.name, &inverted);
        let _ = relation.backward_cache().set(found.clone());
        Ok(found)
    }
}
