//! Field types: named filter/validation behavior for field values.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Filter callback: coerces an incoming value before it reaches state.
pub type FilterFn = Rc<dyn Fn(Value) -> Value>;

/// Validation callback: returns an error message for invalid values.
pub type ValidateFn = Rc<dyn Fn(&Value) -> Result<(), String>>;

/// A named field type with a filter chain and a validator chain.
///
/// Field declarations reference field types by name ("integer",
/// "string", ...); the concrete type is resolved through the
/// [`FieldTypeRegistry`], possibly after the schema was declared.
pub struct FieldType {
    name: String,
    filters: Vec<FilterFn>,
    validators: Vec<ValidateFn>,
}

impl FieldType {
    /// Creates a field type with the given filter and validator chains.
    #[must_use]
    pub fn new(name: impl Into<String>, filters: Vec<FilterFn>, validators: Vec<ValidateFn>) -> Self {
        Self {
            name: name.into(),
            filters,
            validators,
        }
    }

    /// The type name used for registry lookup.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the value through the filter chain.
    #[must_use]
    pub fn filter(&self, value: Value) -> Value {
        self.filters.iter().fold(value, |v, f| f(v))
    }

    /// Runs the validator chain, collecting error messages.
    #[must_use]
    pub fn validate(&self, value: &Value) -> Vec<String> {
        self.validators
            .iter()
            .filter_map(|v| v(value).err())
            .collect()
    }

    /// Whether the value passes every validator.
    #[must_use]
    pub fn is_valid(&self, value: &Value) -> bool {
        self.validators.iter().all(|v| v(value).is_ok())
    }
}

impl std::fmt::Debug for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldType")
            .field("name", &self.name)
            .field("filters", &self.filters.len())
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// The built-in "integer" type: coerces bools, floats and numeric
/// strings to `Int`, everything else to `Int(0)`.
#[must_use]
pub fn integer_type() -> FieldType {
    FieldType::new(
        "integer",
        vec![Rc::new(|value| {
            Value::Int(match value {
                Value::Int(i) => i,
                Value::Bool(b) => i64::from(b),
                Value::Float(f) => f as i64,
                Value::Str(s) => s.trim().parse().unwrap_or(0),
                Value::Null => 0,
            })
        })],
        vec![Rc::new(|value| match value {
            Value::Int(_) => Ok(()),
            other => Err(format!("expected integer, got {other}")),
        })],
    )
}

/// The built-in "float" type.
#[must_use]
pub fn float_type() -> FieldType {
    FieldType::new(
        "float",
        vec![Rc::new(|value| {
            Value::Float(match value {
                Value::Float(f) => f,
                Value::Int(i) => i as f64,
                Value::Bool(b) => f64::from(u8::from(b)),
                Value::Str(s) => s.trim().parse().unwrap_or(0.0),
                Value::Null => 0.0,
            })
        })],
        vec![Rc::new(|value| match value {
            Value::Float(_) => Ok(()),
            other => Err(format!("expected float, got {other}")),
        })],
    )
}

/// The built-in "boolean" type: zero, empty and null are false.
#[must_use]
pub fn boolean_type() -> FieldType {
    FieldType::new(
        "boolean",
        vec![Rc::new(|value| {
            Value::Bool(match value {
                Value::Bool(b) => b,
                Value::Int(i) => i != 0,
                Value::Float(f) => f != 0.0,
                Value::Str(s) => !s.is_empty() && s != "false" && s != "0",
                Value::Null => false,
            })
        })],
        vec![Rc::new(|value| match value {
            Value::Bool(_) => Ok(()),
            other => Err(format!("expected boolean, got {other}")),
        })],
    )
}

/// The built-in "string" type: stringifies everything, null becomes
/// the empty string.
#[must_use]
pub fn string_type() -> FieldType {
    FieldType::new(
        "string",
        vec![Rc::new(|value| {
            Value::Str(match value {
                Value::Str(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
        })],
        vec![Rc::new(|value| match value {
            Value::Str(_) => Ok(()),
            other => Err(format!("expected string, got {other}")),
        })],
    )
}

type FieldTypeCallback = Box<dyn FnOnce(&Rc<FieldType>)>;

/// Name to field type lookup with deferred resolution.
///
/// A schema may be declared before the field types it references are
/// registered; [`FieldTypeRegistry::get_deferred`] parks a callback
/// that fires as soon as the type shows up.
#[derive(Default)]
pub struct FieldTypeRegistry {
    types: RefCell<HashMap<String, Rc<FieldType>>>,
    pending: RefCell<HashMap<String, Vec<FieldTypeCallback>>>,
}

impl FieldTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in types
    /// (integer, float, boolean, string).
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for field_type in [integer_type(), float_type(), boolean_type(), string_type()] {
            registry
                .register(field_type, false)
                .unwrap_or_else(|_| unreachable!("builtins registered once"));
        }
        registry
    }

    /// Whether a type with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.types.borrow().contains_key(name)
    }

    /// Looks up a type by name.
    pub fn get(&self, name: &str) -> CoreResult<Rc<FieldType>> {
        self.types
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_registered("field type", name))
    }

    /// Looks up a type by name, deferring until it is registered.
    ///
    /// The callback fires immediately when the type is already known,
    /// otherwise at registration time.
    pub fn get_deferred(&self, name: &str, callback: impl FnOnce(&Rc<FieldType>) + 'static) {
        let existing = self.types.borrow().get(name).cloned();
        match existing {
            Some(field_type) => callback(&field_type),
            None => self
                .pending
                .borrow_mut()
                .entry(name.to_owned())
                .or_default()
                .push(Box::new(callback)),
        }
    }

    /// Registers a field type; `force` replaces an existing entry.
    pub fn register(&self, field_type: FieldType, force: bool) -> CoreResult<()> {
        let name = field_type.name().to_owned();
        if !force && self.has(&name) {
            return Err(CoreError::already_registered("field type", name));
        }
        let field_type = Rc::new(field_type);
        self.types.borrow_mut().insert(name.clone(), Rc::clone(&field_type));

        let callbacks = self.pending.borrow_mut().remove(&name).unwrap_or_default();
        for callback in callbacks {
            callback(&field_type);
        }
        Ok(())
    }
}
