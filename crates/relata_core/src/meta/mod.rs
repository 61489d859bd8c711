//! Schema descriptors: field types, fields, relations, entity and
//! collection metadata, and the registry that resolves them by name.

mod collection_meta;
mod entity_meta;
mod field;
mod field_type;
mod registry;
mod relation;

pub use collection_meta::CollectionMeta;
pub use entity_meta::EntityMeta;
pub use field::FieldDef;
pub use field_type::{
    boolean_type, float_type, integer_type, string_type, FieldType, FieldTypeRegistry, FilterFn,
    ValidateFn,
};
pub use registry::MetaRegistry;
pub use relation::{RelatedMeta, Relation, RelationKind};
