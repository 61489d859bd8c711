//! Field declarations.

use crate::meta::field_type::FieldType;
use crate::value::Value;
use std::cell::OnceCell;
use std::rc::Rc;

/// A field declaration on an entity schema.
///
/// The field type is referenced by name and resolved through the field
/// type registry when the schema is registered; until then (or if the
/// type never registers) values pass through unfiltered.
#[derive(Debug)]
pub struct FieldDef {
    name: String,
    type_name: String,
    default_value: Value,
    resolved: OnceCell<Rc<FieldType>>,
}

impl FieldDef {
    /// Creates a field declaration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        default_value: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            default_value: default_value.into(),
            resolved: OnceCell::new(),
        }
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The default value for unspecified state.
    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    /// The resolved field type, if registration has resolved it.
    #[must_use]
    pub fn field_type(&self) -> Option<&Rc<FieldType>> {
        self.resolved.get()
    }

    /// Runs an incoming value through the type's filter chain.
    #[must_use]
    pub fn filter(&self, value: Value) -> Value {
        match self.resolved.get() {
            Some(field_type) => field_type.filter(value),
            None => value,
        }
    }

    /// Whether the value passes the type's validators. Unresolved
    /// types accept everything.
    #[must_use]
    pub fn is_valid(&self, value: &Value) -> bool {
        self.resolved
            .get()
            .is_none_or(|field_type| field_type.is_valid(value))
    }

    pub(crate) fn resolve(&self, field_type: Rc<FieldType>) {
        let _ = self.resolved.set(field_type);
    }
}
