//! Property-based invariants over the fixture domain.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use relata_core::{EventTopic, Value};
use relata_testkit::prelude::*;

proptest! {
    /// Typed values survive assignment verbatim.
    #[test]
    fn typed_state_is_stored_verbatim(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        prop_assert!(simple.set_state(state.clone()).unwrap());
        for (field, value) in &state {
            prop_assert_eq!(&simple.get(field).unwrap(), value);
        }
    }

    /// Re-applying the same state is a no-op and never dirties
    /// further.
    #[test]
    fn set_state_is_idempotent(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        simple.set_state(state.clone()).unwrap();
        let changed = simple.changed_fields();
        prop_assert!(simple.set_state(state).unwrap());
        prop_assert_eq!(simple.changed_fields(), changed);
    }

    /// Revert always lands back on the initial state.
    #[test]
    fn revert_restores_the_initial_state(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        let before = simple.get_state();
        simple.set_state(state).unwrap();
        simple.revert();
        prop_assert_eq!(simple.get_state(), before);
        prop_assert!(!simple.is_dirty());
    }

    /// Flush promotes current state and clears both dirtiness and
    /// newness.
    #[test]
    fn flush_settles_the_entity(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        simple.set_state(state).unwrap();
        simple.flush();
        prop_assert!(!simple.is_dirty());
        prop_assert!(!simple.is_new());
        prop_assert_eq!(simple.get_state(), simple.get_initial_state());
    }

    /// Raw values are filtered into the field's type on assignment.
    #[test]
    fn assigned_values_match_the_field_type(state in simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        simple.set_state(state).unwrap();
        prop_assert!(matches!(simple.get("flag").unwrap(), Value::Bool(_)));
    }

    /// `changed` always reports fields in schema declaration order,
    /// however the incoming state map happens to iterate.
    #[test]
    fn changed_fields_follow_declaration_order(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        let seen: Rc<RefCell<Vec<Vec<String>>>> = Rc::default();
        let sink = Rc::clone(&seen);
        simple.channel().add_listener(EventTopic::plain("changed"), move |event| {
            let (fields, _, _) = event.data().as_field_change().unwrap();
            sink.borrow_mut().push(fields.to_vec());
        });

        simple.set_state(state).unwrap();

        let declared = ["id", "value", "flag", "title"];
        for fields in seen.borrow().iter() {
            let expected: Vec<String> = declared
                .iter()
                .filter(|d| fields.iter().any(|f| f == *d))
                .map(|d| (*d).to_owned())
                .collect();
            prop_assert_eq!(fields.clone(), expected);
        }
    }

    /// A rolled-back transaction leaves no trace.
    #[test]
    fn rollback_is_exact(state in typed_simple_state_strategy()) {
        let domain = Domain::new();
        let simple = domain.simple(1);
        let before = simple.get_state();
        let tx = simple.begin_transaction(None, false).unwrap();
        simple.set_state(state).unwrap();
        tx.rollback().unwrap();
        prop_assert_eq!(simple.get_state(), before);
    }
}
