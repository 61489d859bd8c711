//! Relation declarations.

use crate::error::{CoreError, CoreResult};
use crate::meta::{CollectionMeta, EntityMeta};
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

/// The shape of a relation between two schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The local entity references one related entity and mirrors its
    /// key fields in local foreign-key fields.
    BelongsTo,
    /// Inverse of `BelongsTo`; one related entity, no local foreign
    /// key.
    HasOne,
    /// Inverse of `BelongsTo`; the local entity owns a collection of
    /// related entities.
    HasMany,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelongsTo => write!(f, "BelongsTo"),
            Self::HasOne => write!(f, "HasOne"),
            Self::HasMany => write!(f, "HasMany"),
        }
    }
}

/// The resolved target descriptor of a relation.
#[derive(Debug, Clone)]
pub enum RelatedMeta {
    /// A single-entity target (`BelongsTo`, `HasOne`).
    Entity(Rc<EntityMeta>),
    /// A collection target (`HasMany`).
    Collection(Rc<CollectionMeta>),
}

impl RelatedMeta {
    /// The entity schema behind the target, unwrapping collections.
    #[must_use]
    pub fn entity(&self) -> Rc<EntityMeta> {
        match self {
            Self::Entity(meta) => Rc::clone(meta),
            Self::Collection(meta) => meta.entity(),
        }
    }
}

/// A declared relation on an entity schema.
///
/// The target schema is referenced by name and resolved lazily through
/// the meta registry, so mutually-referencing schemas can be declared
/// in any order. The backward relation is found once on first use and
/// cached.
#[derive(Debug)]
pub struct Relation {
    name: String,
    kind: RelationKind,
    related_name: String,
    foreign_key: Vec<(String, String)>,
    relay_events: bool,
    resolved: OnceCell<RelatedMeta>,
    backward: OnceCell<Option<Rc<Relation>>>,
}

impl Relation {
    /// Creates a relation declaration.
    ///
    /// `foreign_key` maps local field names to field names on the
    /// related schema, in declaration order. For `HasMany` the map is
    /// read from the member's perspective inverted: local fields here
    /// are the owner's key fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        related_name: impl Into<String>,
        foreign_key: Vec<(String, String)>,
        relay_events: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            related_name: related_name.into(),
            foreign_key,
            relay_events,
            resolved: OnceCell::new(),
            backward: OnceCell::new(),
        }
    }

    /// The relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The relation shape.
    #[must_use]
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Name of the related schema (entity name; collection schemas are
    /// registered under their entity's name).
    #[must_use]
    pub fn related_name(&self) -> &str {
        &self.related_name
    }

    /// Local-to-remote field name pairs.
    #[must_use]
    pub fn foreign_key(&self) -> &[(String, String)] {
        &self.foreign_key
    }

    /// Whether related objects' events are relayed through the owner.
    #[must_use]
    pub fn relay_events(&self) -> bool {
        self.relay_events
    }

    /// The resolved target descriptor.
    ///
    /// Fails with `NotRegistered` while the target schema has not been
    /// registered yet.
    pub fn related_meta(&self) -> CoreResult<RelatedMeta> {
        self.resolved
            .get()
            .cloned()
            .ok_or_else(|| match self.kind {
                RelationKind::HasMany => {
                    CoreError::not_registered("collection schema", self.related_name.clone())
                }
                _ => CoreError::not_registered("entity schema", self.related_name.clone()),
            })
    }

    /// The entity schema on the far side of the relation.
    pub fn related_entity_meta(&self) -> CoreResult<Rc<EntityMeta>> {
        Ok(self.related_meta()?.entity())
    }

    /// The collection schema for a `HasMany` relation.
    pub fn related_collection_meta(&self) -> CoreResult<Rc<CollectionMeta>> {
        match self.related_meta()? {
            RelatedMeta::Collection(meta) => Ok(meta),
            RelatedMeta::Entity(_) => Err(CoreError::relation_type_mismatch(
                self.name.clone(),
                format!("collection of \"{}\"", self.related_name),
                format!("entity schema \"{}\"", self.related_name),
            )),
        }
    }

    /// Whether the foreign key equals `other` as an unordered map.
    #[must_use]
    pub fn foreign_key_eq(&self, other: &[(String, String)]) -> bool {
        self.foreign_key.len() == other.len()
            && self
                .foreign_key
                .iter()
                .all(|(local, remote)| other.iter().any(|(l, r)| l == local && r == remote))
    }

    /// Resolves the target to an entity schema, checking that every
    /// remote foreign-key field exists on it.
    pub(crate) fn resolve_entity(&self, meta: &Rc<EntityMeta>) -> CoreResult<()> {
        self.check_remote_fields(meta)?;
        let _ = self.resolved.set(RelatedMeta::Entity(Rc::clone(meta)));
        Ok(())
    }

    /// Resolves the target to a collection schema.
    pub(crate) fn resolve_collection(&self, meta: &Rc<CollectionMeta>) -> CoreResult<()> {
        self.check_remote_fields(&meta.entity())?;
        let _ = self.resolved.set(RelatedMeta::Collection(Rc::clone(meta)));
        Ok(())
    }

    fn check_remote_fields(&self, meta: &Rc<EntityMeta>) -> CoreResult<()> {
        for (_, remote) in &self.foreign_key {
            if !meta.has_field(remote) {
                return Err(CoreError::UnknownForeignKeyField {
                    schema: meta.name().to_owned(),
                    relation: self.name.clone(),
                    field: remote.clone(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn backward_cache(&self) -> &OnceCell<Option<Rc<Relation>>> {
        &self.backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(l, r)| ((*l).to_owned(), (*r).to_owned()))
            .collect()
    }

    #[test]
    fn unresolved_target_reports_not_registered() {
        let rel = Relation::new("user", RelationKind::BelongsTo, "User", fk(&[]), false);
        assert!(matches!(
            rel.related_meta(),
            Err(CoreError::NotRegistered { .. })
        ));
    }

    #[test]
    fn foreign_key_equality_is_unordered() {
        let rel = Relation::new(
            "user",
            RelationKind::BelongsTo,
            "User",
            fk(&[("userId", "userId"), ("realm", "realm")]),
            false,
        );
        assert!(rel.foreign_key_eq(&fk(&[("realm", "realm"), ("userId", "userId")])));
        assert!(!rel.foreign_key_eq(&fk(&[("userId", "userId")])));
        assert!(!rel.foreign_key_eq(&fk(&[("userId", "id"), ("realm", "realm")])));
    }

    #[test]
    fn kind_display() {
        assert_eq!(format!("{}", RelationKind::HasMany), "HasMany");
    }
}
