//! Event topics and selector matching.

use std::fmt;

/// Entity field-change lifecycle topics.
pub mod entity {
    /// Cancelable, fired before field state is applied.
    pub const BEFORE_CHANGE: &str = "beforeChange";
    /// Fired after field state changed (deferred under a transaction).
    pub const CHANGED: &str = "changed";
}

/// Relation-assignment lifecycle topics.
pub mod relation {
    /// Cancelable, fired before a relation slot is reassigned.
    pub const BEFORE_CHANGE: &str = "beforeRelationChange";
    /// Fired after a relation slot changed (deferred under a transaction).
    pub const CHANGED: &str = "relationChanged";
}

/// Collection membership lifecycle topics.
pub mod collection {
    /// Cancelable, fired before entities are added.
    pub const BEFORE_ADD: &str = "beforeAdd";
    /// Fired after entities were added.
    pub const ADDED: &str = "added";
    /// Cancelable, fired before entities are removed.
    pub const BEFORE_REMOVE: &str = "beforeRemove";
    /// Fired after entities were removed.
    pub const REMOVED: &str = "removed";
    /// Cancelable, fired before the collection is cleared.
    pub const BEFORE_CLEAR: &str = "beforeClear";
    /// Fired after the collection was cleared.
    pub const CLEARED: &str = "cleared";
    /// Cancelable, fired before the collection reverts to its initial list.
    pub const BEFORE_REVERT: &str = "beforeRevert";
    /// Fired after the collection reverted.
    pub const REVERTED: &str = "reverted";
}

/// Transaction lifecycle topics.
pub mod transaction {
    /// Fired when a transaction is opened.
    pub const BEGIN: &str = "transactionBegin";
    /// Fired when a transaction commits.
    pub const COMMIT: &str = "transactionCommit";
    /// Fired when a transaction rolls back.
    pub const ROLLBACK: &str = "transactionRollback";
}

/// An event type, either concrete (on a dispatched event) or used as a
/// listener selector.
///
/// Entity and collection events are dispatched under a topic scoped by
/// their schema name, e.g. `Scoped("User", Plain("changed"))`, so a
/// listener on a relay target can subscribe to one schema's events
/// only. A plain selector matches the scoped concrete topic as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTopic {
    /// A bare event name.
    Plain(String),
    /// An event name qualified by a sub-scope, usually a schema name.
    Scoped(String, Box<EventTopic>),
    /// Any of the nested selectors.
    AnyOf(Vec<EventTopic>),
}

impl EventTopic {
    /// Creates a plain topic.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self::Plain(name.into())
    }

    /// Creates a scoped topic.
    #[must_use]
    pub fn scoped(scope: impl Into<String>, inner: EventTopic) -> Self {
        Self::Scoped(scope.into(), Box::new(inner))
    }

    /// Creates a selector matching any of the given plain names.
    #[must_use]
    pub fn any_of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(names.into_iter().map(|n| Self::Plain(n.into())).collect())
    }

    /// Returns whether this selector matches the given concrete topic.
    ///
    /// - `AnyOf` matches if any nested selector matches.
    /// - `Plain(n)` matches `Plain(n)` and any `Scoped(_, t)` whose
    ///   inner topic it matches (a plain selector is a superset of all
    ///   scoped variants of the same name).
    /// - `Scoped(s, t)` matches `Scoped(s, ct)` where `t` matches `ct`.
    #[must_use]
    pub fn matches(&self, concrete: &EventTopic) -> bool {
        match self {
            Self::AnyOf(list) => list.iter().any(|t| t.matches(concrete)),
            Self::Plain(name) => match concrete {
                Self::Plain(other) => name == other,
                Self::Scoped(_, inner) => self.matches(inner),
                Self::AnyOf(list) => list.iter().any(|c| self.matches(c)),
            },
            Self::Scoped(scope, inner) => match concrete {
                Self::Scoped(other_scope, other_inner) => {
                    scope == other_scope && inner.matches(other_inner)
                }
                Self::AnyOf(list) => list.iter().any(|c| self.matches(c)),
                Self::Plain(_) => false,
            },
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(name) => write!(f, "{name}"),
            Self::Scoped(scope, inner) => write!(f, "{scope}:{inner}"),
            Self::AnyOf(list) => {
                let names: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

impl From<&str> for EventTopic {
    fn from(name: &str) -> Self {
        Self::plain(name)
    }
}
