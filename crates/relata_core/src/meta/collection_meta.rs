//! Collection schema descriptors.

use crate::meta::EntityMeta;
use std::rc::Rc;

/// Describes a collection type: an ordered, duplicate-free list of one
/// entity schema's records.
///
/// Collection schemas are registered under their entity's name, so a
/// `HasMany` relation can reference the collection by the same name a
/// `BelongsTo` uses for the entity.
#[derive(Debug, Clone)]
pub struct CollectionMeta {
    entity: Rc<EntityMeta>,
}

impl CollectionMeta {
    /// Creates a collection descriptor for the given entity schema.
    #[must_use]
    pub fn new(entity: Rc<EntityMeta>) -> Rc<Self> {
        Rc::new(Self { entity })
    }

    /// The member entity schema.
    #[must_use]
    pub fn entity(&self) -> Rc<EntityMeta> {
        Rc::clone(&self.entity)
    }

    /// The schema name (the entity's name).
    #[must_use]
    pub fn name(&self) -> &str {
        self.entity.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_entity_meta() {
        let entity = EntityMeta::new("User", Vec::<String>::new(), vec![], vec![]).unwrap();
        let meta = CollectionMeta::new(Rc::clone(&entity));
        assert_eq!(meta.name(), "User");
        assert!(Rc::ptr_eq(&meta.entity(), &entity));
    }
}
