//! # Relata Core
//!
//! In-memory transactional object-relational state layer.
//!
//! This crate provides:
//! - Schema metadata: field types with filter/validate chains,
//!   entity and collection schemas, relations with foreign keys
//! - Entities with dirty tracking and cancelable change events
//! - Ordered, identity-deduplicated collections
//! - Relations (`BelongsTo`, `HasOne`, `HasMany`) kept
//!   bidirectionally consistent by an atomic assignment cascade
//! - Multi-object transactions with snapshot rollback
//! - Event relaying between object channels
//! - Graph serialization into a schema-keyed JSON document
//!
//! ## Example
//!
//! ```
//! use relata_core::{
//!     Entity, EntityMeta, EntityOptions, FieldDef, MetaRegistry, Value,
//! };
//! use std::collections::HashMap;
//!
//! let registry = MetaRegistry::new();
//! let meta = EntityMeta::new(
//!     "User",
//!     ["id"],
//!     vec![
//!         FieldDef::new("id", "integer", Value::Null),
//!         FieldDef::new("name", "string", Value::Null),
//!     ],
//!     vec![],
//! )
//! .unwrap();
//! registry.register(meta.clone(), false).unwrap();
//!
//! let user = Entity::new(meta, HashMap::new(), EntityOptions::default()).unwrap();
//! user.set("name", "Ada").unwrap();
//! assert!(user.is_dirty());
//! user.flush();
//! assert!(!user.is_dirty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod entity;
mod error;
pub mod event;
mod ident;
mod meta;
mod serialize;
mod transaction;
mod value;

pub use collection::{Collection, CollectionOptions};
pub use entity::{Entity, EntityOptions, Notify, Related};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventChannel, EventData, EventTopic, ListenerId};
pub use ident::{IdGenerator, UuidGenerator};
pub use meta::{
    boolean_type, float_type, integer_type, string_type, CollectionMeta, EntityMeta, FieldDef,
    FieldType, FieldTypeRegistry, FilterFn, MetaRegistry, RelatedMeta, Relation, RelationKind,
    ValidateFn,
};
pub use serialize::{SerializeOptions, Serializer};
pub use transaction::Transaction;
pub use value::Value;
