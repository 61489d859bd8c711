//! Schema registry with deferred resolution for forward references.

use crate::error::{CoreError, CoreResult};
use crate::meta::field_type::FieldTypeRegistry;
use crate::meta::relation::RelationKind;
use crate::meta::{CollectionMeta, EntityMeta};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

type EntityCallback = Box<dyn FnOnce(&Rc<EntityMeta>) -> CoreResult<()>>;
type CollectionCallback = Box<dyn FnOnce(&Rc<CollectionMeta>) -> CoreResult<()>>;

/// Resolves named schema descriptors, possibly after registration
/// completes.
///
/// Schemas may reference each other by name before both are
/// registered; the registry parks continuations per name and runs them
/// once the named schema shows up. Registering an entity schema also
/// resolves its field declarations against the field type registry and
/// schedules resolution of its relation targets.
pub struct MetaRegistry {
    field_types: FieldTypeRegistry,
    entities: RefCell<HashMap<String, Rc<EntityMeta>>>,
    collections: RefCell<HashMap<String, Rc<CollectionMeta>>>,
    pending_entities: RefCell<HashMap<String, Vec<EntityCallback>>>,
    pending_collections: RefCell<HashMap<String, Vec<CollectionCallback>>>,
}

impl MetaRegistry {
    /// Creates a registry with the built-in field types.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Self::with_field_types(FieldTypeRegistry::with_builtins())
    }

    /// Creates a registry with a custom field type registry.
    #[must_use]
    pub fn with_field_types(field_types: FieldTypeRegistry) -> Rc<Self> {
        Rc::new(Self {
            field_types,
            entities: RefCell::new(HashMap::new()),
            collections: RefCell::new(HashMap::new()),
            pending_entities: RefCell::new(HashMap::new()),
            pending_collections: RefCell::new(HashMap::new()),
        })
    }

    /// The field type registry consulted for field declarations.
    #[must_use]
    pub fn field_types(&self) -> &FieldTypeRegistry {
        &self.field_types
    }

    /// Whether an entity schema with the given name is registered.
    #[must_use]
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.borrow().contains_key(name)
    }

    /// Whether a collection schema with the given name is registered.
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.borrow().contains_key(name)
    }

    /// Looks up an entity schema by name.
    pub fn entity(&self, name: &str) -> CoreResult<Rc<EntityMeta>> {
        self.entities
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_registered("entity schema", name))
    }

    /// Looks up a collection schema by name.
    pub fn collection(&self, name: &str) -> CoreResult<Rc<CollectionMeta>> {
        self.collections
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_registered("collection schema", name))
    }

    /// Looks up an entity schema, deferring until it is registered.
    ///
    /// The callback fires immediately when the schema is already
    /// known, otherwise when it is later registered. Callback errors
    /// surface from this call or from the registering call.
    pub fn entity_deferred(
        &self,
        name: &str,
        callback: impl FnOnce(&Rc<EntityMeta>) -> CoreResult<()> + 'static,
    ) -> CoreResult<()> {
        let existing = self.entities.borrow().get(name).cloned();
        match existing {
            Some(meta) => callback(&meta),
            None => {
                self.pending_entities
                    .borrow_mut()
                    .entry(name.to_owned())
                    .or_default()
                    .push(Box::new(callback));
                Ok(())
            }
        }
    }

    /// Looks up a collection schema, deferring until registered.
    pub fn collection_deferred(
        &self,
        name: &str,
        callback: impl FnOnce(&Rc<CollectionMeta>) -> CoreResult<()> + 'static,
    ) -> CoreResult<()> {
        let existing = self.collections.borrow().get(name).cloned();
        match existing {
            Some(meta) => callback(&meta),
            None => {
                self.pending_collections
                    .borrow_mut()
                    .entry(name.to_owned())
                    .or_default()
                    .push(Box::new(callback));
                Ok(())
            }
        }
    }

    /// Registers an entity schema.
    ///
    /// Resolves the schema's field types (deferred until the type
    /// registers), schedules resolution of its relation targets, and
    /// runs any continuations parked on the schema name.
    pub fn register_entity(&self, meta: Rc<EntityMeta>, force: bool) -> CoreResult<()> {
        let name = meta.name().to_owned();
        if !force && self.has_entity(&name) {
            return Err(CoreError::already_registered("entity schema", name));
        }
        debug!(schema = %name, "registering entity schema");
        self.entities.borrow_mut().insert(name.clone(), Rc::clone(&meta));

        for field in meta.fields() {
            let field = Rc::clone(field);
            let type_name = field.type_name().to_owned();
            self.field_types.get_deferred(&type_name, move |field_type| {
                field.resolve(Rc::clone(field_type));
            });
        }

        for relation in meta.relations() {
            let relation = Rc::clone(relation);
            let related_name = relation.related_name().to_owned();
            match relation.kind() {
                RelationKind::HasMany => {
                    self.collection_deferred(&related_name, move |target| {
                        relation.resolve_collection(target)
                    })?;
                }
                RelationKind::BelongsTo | RelationKind::HasOne => {
                    self.entity_deferred(&related_name, move |target| {
                        relation.resolve_entity(target)
                    })?;
                }
            }
        }

        let callbacks = self
            .pending_entities
            .borrow_mut()
            .remove(&name)
            .unwrap_or_default();
        for callback in callbacks {
            callback(&meta)?;
        }
        Ok(())
    }

    /// Registers a collection schema under its entity's name.
    pub fn register_collection(&self, meta: Rc<CollectionMeta>, force: bool) -> CoreResult<()> {
        let name = meta.name().to_owned();
        if !force && self.has_collection(&name) {
            return Err(CoreError::already_registered("collection schema", name));
        }
        debug!(schema = %name, "registering collection schema");
        self.collections
            .borrow_mut()
            .insert(name.clone(), Rc::clone(&meta));

        let callbacks = self
            .pending_collections
            .borrow_mut()
            .remove(&name)
            .unwrap_or_default();
        for callback in callbacks {
            callback(&meta)?;
        }
        Ok(())
    }

    /// Registers an entity schema together with its collection schema.
    pub fn register(&self, meta: Rc<EntityMeta>, force: bool) -> CoreResult<()> {
        self.register_entity(Rc::clone(&meta), force)?;
        self.register_collection(CollectionMeta::new(meta), force)
    }
}

impl std::fmt::Debug for MetaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaRegistry")
            .field("entities", &self.entities.borrow().len())
            .field("collections", &self.collections.borrow().len())
            .finish_non_exhaustive()
    }
}
