//! Property-based test generators using proptest.

use proptest::prelude::*;
use relata_core::Value;
use std::collections::HashMap;

/// Strategy for generating any scalar value.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Str),
    ]
}

/// Strategy for generating valid schema identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating a partial state map for the `Simple`
/// fixture schema. Values are raw and may need filtering on
/// assignment.
pub fn simple_state_strategy() -> impl Strategy<Value = HashMap<String, Value>> {
    let field = prop_oneof![
        Just("value".to_owned()),
        Just("flag".to_owned()),
        Just("title".to_owned()),
    ];
    prop::collection::hash_map(field, value_strategy(), 0..3)
}

/// Strategy for generating a filtered `Simple` state: values already
/// of their field's type, so assignment preserves them verbatim.
pub fn typed_simple_state_strategy() -> impl Strategy<Value = HashMap<String, Value>> {
    (
        proptest::option::of((-1.0e9f64..1.0e9).prop_map(Value::Float)),
        proptest::option::of(any::<bool>().prop_map(Value::Bool)),
        proptest::option::of("[a-zA-Z0-9 ]{0,24}".prop_map(Value::Str)),
    )
        .prop_map(|(value, flag, title)| {
            let mut state = HashMap::new();
            if let Some(value) = value {
                state.insert("value".to_owned(), value);
            }
            if let Some(flag) = flag {
                state.insert("flag".to_owned(), flag);
            }
            if let Some(title) = title {
                state.insert("title".to_owned(), title);
            }
            state
        })
}
