//! Events, topics and the publish/subscribe channel.

mod channel;
mod topic;

pub use channel::{EventChannel, ListenerFn, ListenerId};
pub use topic::{collection, entity, relation, transaction, EventTopic};

use crate::entity::{Entity, Related};
use crate::value::Value;
use std::cell::Cell;
use std::collections::HashMap;

/// Selector matching the transaction lifecycle topics. Relation and
/// membership relays exclude these so transactions stay local to each
/// participant.
pub(crate) fn transaction_exclude() -> EventTopic {
    EventTopic::any_of([transaction::BEGIN, transaction::COMMIT, transaction::ROLLBACK])
}

/// Payload carried by an [`Event`].
#[derive(Clone)]
pub enum EventData {
    /// No payload (transaction begin, synthetic events).
    None,
    /// Field state changed on an entity.
    FieldChange {
        /// Names of the fields that changed, in declaration order.
        fields: Vec<String>,
        /// Field values before the change.
        old_state: HashMap<String, Value>,
        /// Field values after the change.
        new_state: HashMap<String, Value>,
    },
    /// A relation slot was reassigned on an entity.
    RelationChange {
        /// Relation name.
        relation: String,
        /// Previous slot occupant.
        old: Option<Related>,
        /// New slot occupant.
        new: Option<Related>,
    },
    /// Collection membership changed.
    CollectionChange {
        /// Entities added since the previous report.
        added: Vec<Entity>,
        /// Entities removed since the previous report.
        removed: Vec<Entity>,
    },
    /// A transaction reached a terminal state.
    TransactionEnd {
        /// `true` for commit, `false` for rollback.
        committed: bool,
    },
}

impl EventData {
    /// Returns the collection-change payload, if that is what this is.
    #[must_use]
    pub fn as_collection_change(&self) -> Option<(&[Entity], &[Entity])> {
        match self {
            Self::CollectionChange { added, removed } => Some((added, removed)),
            _ => None,
        }
    }

    /// Returns the field-change payload, if that is what this is.
    #[must_use]
    pub fn as_field_change(
        &self,
    ) -> Option<(&[String], &HashMap<String, Value>, &HashMap<String, Value>)> {
        match self {
            Self::FieldChange {
                fields,
                old_state,
                new_state,
            } => Some((fields, old_state, new_state)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EventData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::FieldChange { fields, .. } => {
                f.debug_struct("FieldChange").field("fields", fields).finish_non_exhaustive()
            }
            Self::RelationChange { relation, .. } => f
                .debug_struct("RelationChange")
                .field("relation", relation)
                .finish_non_exhaustive(),
            Self::CollectionChange { added, removed } => f
                .debug_struct("CollectionChange")
                .field("added", &added.len())
                .field("removed", &removed.len())
                .finish(),
            Self::TransactionEnd { committed } => f
                .debug_struct("TransactionEnd")
                .field("committed", committed)
                .finish(),
        }
    }
}

/// A dispatched event.
///
/// "Before" events are cancellable: a listener calling
/// [`Event::prevent_default`] makes [`EventChannel::dispatch`] return
/// `false` and the dispatching operation abort without mutating.
#[derive(Debug)]
pub struct Event {
    topic: EventTopic,
    source: String,
    data: EventData,
    cancellable: bool,
    prevented: Cell<bool>,
}

impl Event {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        topic: EventTopic,
        source: impl Into<String>,
        data: EventData,
        cancellable: bool,
    ) -> Self {
        Self {
            topic,
            source: source.into(),
            data,
            cancellable,
            prevented: Cell::new(false),
        }
    }

    /// The concrete topic this event was dispatched under.
    #[must_use]
    pub fn topic(&self) -> &EventTopic {
        &self.topic
    }

    /// Uuid of the object that raised the event.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The event payload.
    #[must_use]
    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Whether a listener may cancel the pending operation.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    /// Cancels the pending operation. No effect on non-cancellable
    /// events.
    pub fn prevent_default(&self) {
        if self.cancellable {
            self.prevented.set(true);
        }
    }

    /// Whether a listener cancelled the pending operation.
    #[must_use]
    pub fn is_default_prevented(&self) -> bool {
        self.prevented.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prevent_default_requires_cancellable() {
        let event = Event::new(EventTopic::plain("changed"), "src", EventData::None, false);
        event.prevent_default();
        assert!(!event.is_default_prevented());

        let event = Event::new(
            EventTopic::plain("beforeChange"),
            "src",
            EventData::None,
            true,
        );
        event.prevent_default();
        assert!(event.is_default_prevented());
    }

    #[test]
    fn accessors() {
        let event = Event::new(
            EventTopic::plain("changed"),
            "User-1",
            EventData::FieldChange {
                fields: vec!["name".into()],
                old_state: HashMap::new(),
                new_state: HashMap::new(),
            },
            false,
        );
        assert_eq!(event.source(), "User-1");
        assert!(event.data().as_field_change().is_some());
        assert!(event.data().as_collection_change().is_none());
    }
}
