//! Entities: typed records with field state, relation slots and dirty
//! tracking.

mod related;

use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::event::{
    entity as entity_topics, relation as relation_topics, transaction as tx_topics, Event,
    EventChannel, EventData, EventTopic,
};
use crate::ident;
use crate::meta::{EntityMeta, RelationKind};
use crate::transaction::{Participant, Transaction};
use crate::value::Value;
use self::related::RelationWiring;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Whether a mutation dispatches lifecycle events.
///
/// `Silent` skips both the "before" event (and with it the chance to
/// cancel) and the "after" event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notify {
    /// Dispatch before/after events normally.
    #[default]
    Events,
    /// Mutate without dispatching events.
    Silent,
}

impl Notify {
    /// Whether event dispatch is suppressed.
    #[must_use]
    pub fn is_silent(self) -> bool {
        matches!(self, Self::Silent)
    }
}

/// A related object occupying a relation slot.
#[derive(Clone)]
pub enum Related {
    /// A single related entity (`BelongsTo`, `HasOne`).
    Entity(Entity),
    /// A related collection (`HasMany`).
    Collection(Collection),
}

impl Related {
    /// Uuid of the related object.
    #[must_use]
    pub fn uuid(&self) -> String {
        match self {
            Self::Entity(entity) => entity.uuid().to_owned(),
            Self::Collection(collection) => collection.uuid().to_owned(),
        }
    }

    /// The related entity, if this is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Collection(_) => None,
        }
    }

    /// The related collection, if this is one.
    #[must_use]
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Self::Entity(_) => None,
            Self::Collection(collection) => Some(collection),
        }
    }

    /// Identity comparison of two optional slot occupants.
    #[must_use]
    pub fn same_slot(a: &Option<Related>, b: &Option<Related>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => x.uuid() == y.uuid(),
            _ => false,
        }
    }
}

impl From<Entity> for Related {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl From<Collection> for Related {
    fn from(collection: Collection) -> Self {
        Self::Collection(collection)
    }
}

impl std::fmt::Debug for Related {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(entity) => write!(f, "Related::Entity({})", entity.uuid()),
            Self::Collection(collection) => write!(f, "Related::Collection({})", collection.uuid()),
        }
    }
}

/// Construction options for [`Entity::new`].
#[derive(Default)]
pub struct EntityOptions {
    /// Explicit uuid; minted when absent.
    pub uuid: Option<String>,
    /// Blocks all mutation when set.
    pub read_only: bool,
    /// Marks an entity that was never persisted. Cleared by `flush`.
    pub is_new: Option<bool>,
    /// Initial relation slot occupants by relation name.
    pub related: Vec<(String, Related)>,
}

pub(crate) struct EntitySnapshot {
    initial: HashMap<String, Value>,
    current: HashMap<String, Value>,
    related_initial: HashMap<String, Option<Related>>,
    related_current: HashMap<String, Option<Related>>,
}

pub(crate) struct EntityState {
    initial: HashMap<String, Value>,
    current: HashMap<String, Value>,
    related_initial: HashMap<String, Option<Related>>,
    related_current: HashMap<String, Option<Related>>,
    is_new: bool,
    wiring: HashMap<String, RelationWiring>,
    tx: Option<Transaction>,
    tx_snapshot: Option<EntitySnapshot>,
}

pub(crate) struct EntityShared {
    meta: Rc<EntityMeta>,
    uuid: String,
    read_only: bool,
    channel: EventChannel,
    state: RefCell<EntityState>,
}

/// One instance of an entity schema.
///
/// The handle is cheap to clone and shares the underlying record.
/// Field state is tracked as an *initial* snapshot plus *current* live
/// values; a field is dirty while the two differ. Relation slots hold
/// other entities or collections and are kept bidirectionally
/// consistent by the cascade that runs inside `set_related`.
#[derive(Clone)]
pub struct Entity {
    shared: Rc<EntityShared>,
}

impl Entity {
    /// Creates an entity from an initial state map.
    ///
    /// Unspecified fields take their declared defaults; specified
    /// values run through the field type's filter chain. Unspecified
    /// `HasMany` slots are filled with fresh empty collections, which
    /// requires the relation's collection schema to be registered.
    /// Relation slots provided through `options.related` are stored
    /// and wired (foreign-key and membership listeners) without firing
    /// events or updating reverse sides.
    pub fn new(
        meta: Rc<EntityMeta>,
        state: HashMap<String, Value>,
        options: EntityOptions,
    ) -> CoreResult<Entity> {
        for key in state.keys() {
            if !meta.has_field(key) {
                return Err(CoreError::unknown_field(meta.name(), key));
            }
        }

        let mut initial = HashMap::new();
        for field in meta.fields() {
            let value = match state.get(field.name()) {
                Some(value) => field.filter(value.clone()),
                None => field.default_value().clone(),
            };
            initial.insert(field.name().to_owned(), value);
        }

        let mut related_current: HashMap<String, Option<Related>> = meta
            .relations()
            .iter()
            .map(|rel| (rel.name().to_owned(), None))
            .collect();

        for (name, related) in options.related {
            let relation = meta.relation(&name)?;
            related::check_related_type(&relation, &related)?;
            related_current.insert(name, Some(related));
        }

        for relation in meta.relations() {
            let vacant = matches!(related_current.get(relation.name()), Some(None) | None);
            if relation.kind() == RelationKind::HasMany && vacant {
                let collection_meta = relation.related_collection_meta()?;
                let collection = Collection::new(
                    collection_meta,
                    Vec::new(),
                    crate::collection::CollectionOptions {
                        relay_entity_events: relation.relay_events(),
                        ..Default::default()
                    },
                )?;
                related_current.insert(
                    relation.name().to_owned(),
                    Some(Related::Collection(collection)),
                );
            }
        }

        let uuid = options
            .uuid
            .unwrap_or_else(|| ident::mint(meta.name()));

        let entity = Entity {
            shared: Rc::new(EntityShared {
                meta,
                uuid,
                read_only: options.read_only,
                channel: EventChannel::new(),
                state: RefCell::new(EntityState {
                    current: initial.clone(),
                    initial,
                    related_initial: related_current.clone(),
                    related_current,
                    is_new: options.is_new.unwrap_or(true),
                    wiring: HashMap::new(),
                    tx: None,
                    tx_snapshot: None,
                }),
            }),
        };

        entity.rewire_relations();
        Ok(entity)
    }

    /// The entity's schema.
    #[must_use]
    pub fn meta(&self) -> &Rc<EntityMeta> {
        &self.shared.meta
    }

    /// Process-unique identity, distinct from the primary-key derived
    /// id and stable even while the entity is new.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    /// Whether all mutation is blocked.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.shared.read_only
    }

    /// Whether the entity was never flushed (persisted).
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.shared.state.borrow().is_new
    }

    /// The entity's event channel.
    #[must_use]
    pub fn channel(&self) -> &EventChannel {
        &self.shared.channel
    }

    /// The primary-key value(s), one per key field in declaration
    /// order.
    #[must_use]
    pub fn id(&self) -> Vec<Value> {
        let state = self.shared.state.borrow();
        self.shared
            .meta
            .primary_key()
            .iter()
            .map(|key| state.current.get(key).cloned().unwrap_or_default())
            .collect()
    }

    /// Reads a field's current value.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        self.read_field(field, false)
    }

    /// Reads a field's initial (last-flushed) value.
    pub fn get_initial(&self, field: &str) -> CoreResult<Value> {
        self.read_field(field, true)
    }

    fn read_field(&self, field: &str, initial: bool) -> CoreResult<Value> {
        self.shared.meta.field(field)?;
        let state = self.shared.state.borrow();
        let map = if initial { &state.initial } else { &state.current };
        Ok(map.get(field).cloned().unwrap_or_default())
    }

    /// A copy of the full current state.
    #[must_use]
    pub fn get_state(&self) -> HashMap<String, Value> {
        self.shared.state.borrow().current.clone()
    }

    /// A copy of the full initial state.
    #[must_use]
    pub fn get_initial_state(&self) -> HashMap<String, Value> {
        self.shared.state.borrow().initial.clone()
    }

    /// Names of fields whose current value differs from the initial
    /// one, in declaration order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        let state = self.shared.state.borrow();
        self.shared
            .meta
            .field_names()
            .filter(|name| state.initial.get(*name) != state.current.get(*name))
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Whether any field is dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.changed_fields().is_empty()
    }

    /// Sets one field, dispatching change events.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<bool> {
        self.set_opts(field, value, Notify::Events, false)
    }

    /// Sets one field with explicit notification and force options.
    pub fn set_opts(
        &self,
        field: &str,
        value: impl Into<Value>,
        notify: Notify,
        force: bool,
    ) -> CoreResult<bool> {
        self.shared.meta.field(field)?;
        let mut state = HashMap::new();
        state.insert(field.to_owned(), value.into());
        self.set_state_opts(state, notify, force)
    }

    /// Applies a partial state map, dispatching change events.
    ///
    /// Returns `Ok(true)` when the state was applied or nothing
    /// actually changed, `Ok(false)` when the entity is read-only or a
    /// `beforeChange` listener cancelled the mutation (which also
    /// rolls back the ambient transaction, if one is active).
    pub fn set_state(&self, state: HashMap<String, Value>) -> CoreResult<bool> {
        self.set_state_opts(state, Notify::Events, false)
    }

    /// [`Entity::set_state`] with explicit notification and force
    /// options. `force` bypasses the read-only check; the cascade uses
    /// it for denormalized foreign-key copies.
    pub fn set_state_opts(
        &self,
        state: HashMap<String, Value>,
        notify: Notify,
        force: bool,
    ) -> CoreResult<bool> {
        self.set_state_in(state, notify, force, None)
    }

    pub(crate) fn set_state_in(
        &self,
        state: HashMap<String, Value>,
        notify: Notify,
        force: bool,
        join_tx: Option<&Transaction>,
    ) -> CoreResult<bool> {
        if let Some(tx) = join_tx {
            self.begin_transaction(Some(tx), false)?;
        }

        let (fields, old_state, new_state) = {
            let current = {
                let st = self.shared.state.borrow();
                st.current.clone()
            };
            let mut new_state = current.clone();
            for (key, value) in state {
                let field = self.shared.meta.field(&key)?;
                let filtered = field.filter(value);
                if current.get(&key) != Some(&filtered) {
                    new_state.insert(key, filtered);
                }
            }
            // Changed fields are reported in declaration order, same as
            // the commit diff.
            let fields: Vec<String> = self
                .shared
                .meta
                .field_names()
                .filter(|name| current.get(*name) != new_state.get(*name))
                .map(ToOwned::to_owned)
                .collect();
            (fields, current, new_state)
        };

        // No-op mutations short-circuit before the read-only check.
        if fields.is_empty() {
            return Ok(true);
        }
        if self.shared.read_only && !force {
            return Ok(false);
        }

        if notify == Notify::Events {
            let proceed = self.dispatch_scoped(
                entity_topics::BEFORE_CHANGE,
                EventData::FieldChange {
                    fields: fields.clone(),
                    old_state: old_state.clone(),
                    new_state: new_state.clone(),
                },
                true,
            );
            if !proceed {
                if let Some(tx) = self.transaction() {
                    tx.rollback()?;
                }
                return Ok(false);
            }
        }

        {
            let mut st = self.shared.state.borrow_mut();
            for field in &fields {
                if let Some(value) = new_state.get(field) {
                    st.current.insert(field.clone(), value.clone());
                }
            }
        }
        trace!(
            schema = %self.shared.meta.name(),
            uuid = %self.shared.uuid,
            fields = ?fields,
            "field state applied"
        );

        // Under an open transaction the changed event is deferred to
        // the commit diff.
        if notify == Notify::Events && self.transaction().is_none() {
            self.dispatch_scoped(
                entity_topics::CHANGED,
                EventData::FieldChange {
                    fields,
                    old_state,
                    new_state,
                },
                false,
            );
        }
        Ok(true)
    }

    /// Discards current field state back to the initial snapshot.
    /// Relations are untouched.
    pub fn revert(&self) {
        let mut st = self.shared.state.borrow_mut();
        st.current = st.initial.clone();
    }

    /// Promotes current state (fields and relation slots) to initial,
    /// clearing the dirty flag. Called after successful persistence;
    /// also clears `is_new`.
    pub fn flush(&self) {
        let mut st = self.shared.state.borrow_mut();
        st.initial = st.current.clone();
        st.related_initial = st.related_current.clone();
        st.is_new = false;
    }

    /// Resets initial state to schema defaults, then reverts.
    pub fn clear(&self) {
        let mut st = self.shared.state.borrow_mut();
        for field in self.shared.meta.fields() {
            st.initial
                .insert(field.name().to_owned(), field.default_value().clone());
        }
        st.current = st.initial.clone();
    }

    /// The currently active (unfinished) transaction, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        let tx = self.shared.state.borrow().tx.clone();
        tx.filter(|t| !t.is_finished())
    }

    /// Whether an unfinished transaction is attached.
    #[must_use]
    pub fn has_transaction(&self) -> bool {
        self.transaction().is_some()
    }

    /// Joins an existing transaction or opens a new one.
    ///
    /// Fails with `TransactionAlreadyActive` when the entity is
    /// already attached to a different unfinished transaction, and
    /// with `TransactionFinished` when the supplied transaction has
    /// already finished. With `deep`, every currently-related entity
    /// and collection joins the same transaction recursively;
    /// propagation is one-shot and cycle-safe (already-joined objects
    /// do not re-propagate).
    pub fn begin_transaction(
        &self,
        tx: Option<&Transaction>,
        deep: bool,
    ) -> CoreResult<Transaction> {
        if let Some(current) = self.transaction() {
            if let Some(requested) = tx {
                if *requested != current {
                    return Err(CoreError::transaction_already_active(
                        current.uuid(),
                        requested.uuid(),
                    ));
                }
            }
            return Ok(current);
        }

        let tx = match tx {
            Some(tx) => tx.clone(),
            None => Transaction::new(None),
        };
        tx.ensure_active()?;

        {
            let mut st = self.shared.state.borrow_mut();
            st.tx_snapshot = Some(EntitySnapshot {
                initial: st.initial.clone(),
                current: st.current.clone(),
                related_initial: st.related_initial.clone(),
                related_current: st.related_current.clone(),
            });
            st.tx = Some(tx.clone());
        }
        tx.attach(Participant::Entity(self.clone()))?;
        self.shared.channel.relay(tx.channel(), None);
        trace!(
            schema = %self.shared.meta.name(),
            uuid = %self.shared.uuid,
            tx = %tx.uuid(),
            "entity joined transaction"
        );

        let begin = EventTopic::plain(tx_topics::BEGIN);
        if self.shared.channel.will_dispatch(&begin) {
            let event = Event::new(begin, self.shared.uuid.clone(), EventData::None, false);
            self.shared.channel.dispatch(&event);
        }

        if deep {
            let related: Vec<Related> = {
                let st = self.shared.state.borrow();
                st.related_current.values().flatten().cloned().collect()
            };
            for related in related {
                match related {
                    Related::Entity(entity) => {
                        entity.begin_transaction(Some(&tx), true)?;
                    }
                    Related::Collection(collection) => {
                        collection.begin_transaction(Some(&tx), true)?;
                    }
                }
            }
        }
        Ok(tx)
    }

    pub(crate) fn tx_commit(&self, tx: &Transaction) {
        let (field_event, relation_events) = {
            let mut st = self.shared.state.borrow_mut();
            let snapshot = st.tx_snapshot.take();
            st.tx = None;
            match snapshot {
                Some(snap) => {
                    let fields: Vec<String> = self
                        .shared
                        .meta
                        .field_names()
                        .filter(|name| snap.current.get(*name) != st.current.get(*name))
                        .map(ToOwned::to_owned)
                        .collect();
                    let field_event = (!fields.is_empty()).then(|| EventData::FieldChange {
                        fields,
                        old_state: snap.current.clone(),
                        new_state: st.current.clone(),
                    });

                    let mut relation_events = Vec::new();
                    for relation in self.shared.meta.relations() {
                        let old = snap.related_current.get(relation.name()).cloned().flatten();
                        let new = st.related_current.get(relation.name()).cloned().flatten();
                        if !Related::same_slot(&old, &new) {
                            relation_events.push(EventData::RelationChange {
                                relation: relation.name().to_owned(),
                                old,
                                new,
                            });
                        }
                    }
                    (field_event, relation_events)
                }
                None => (None, Vec::new()),
            }
        };

        self.shared.channel.unrelay(tx.channel());
        if let Some(data) = field_event {
            self.dispatch_scoped(entity_topics::CHANGED, data, false);
        }
        for data in relation_events {
            self.dispatch_scoped(relation_topics::CHANGED, data, false);
        }
    }

    pub(crate) fn tx_rollback(&self, tx: &Transaction) {
        {
            let mut st = self.shared.state.borrow_mut();
            if let Some(snap) = st.tx_snapshot.take() {
                st.initial = snap.initial;
                st.current = snap.current;
                st.related_initial = snap.related_initial;
                st.related_current = snap.related_current;
            }
            st.tx = None;
        }
        self.shared.channel.unrelay(tx.channel());
        self.rewire_relations();
    }

    /// Dispatches a schema-scoped event. Returns `false` when a
    /// listener cancelled it.
    fn dispatch_scoped(&self, kind: &str, data: EventData, cancellable: bool) -> bool {
        let topic = EventTopic::scoped(self.shared.meta.name(), EventTopic::plain(kind));
        if !self.shared.channel.will_dispatch(&topic) {
            return true;
        }
        let event = Event::new(topic, self.shared.uuid.clone(), data, cancellable);
        self.shared.channel.dispatch(&event)
    }

    pub(crate) fn shared_weak(&self) -> std::rc::Weak<EntityShared> {
        Rc::downgrade(&self.shared)
    }

    pub(crate) fn from_shared(shared: Rc<EntityShared>) -> Entity {
        Entity { shared }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("schema", &self.shared.meta.name())
            .field("uuid", &self.shared.uuid)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests;
