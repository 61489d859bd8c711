//! Ordered, identity-deduplicated collections of entities.

use crate::entity::{Entity, Notify};
use crate::error::{CoreError, CoreResult};
use crate::event::{
    collection as collection_topics, transaction as tx_topics, transaction_exclude, Event,
    EventChannel, EventData, EventTopic,
};
use crate::ident;
use crate::meta::CollectionMeta;
use crate::transaction::{Participant, Transaction};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// Construction options for [`Collection::new`].
#[derive(Default)]
pub struct CollectionOptions {
    /// Explicit uuid; minted when absent.
    pub uuid: Option<String>,
    /// Blocks all mutation when set.
    pub read_only: bool,
    /// Relays member entity events through the collection's channel.
    pub relay_entity_events: bool,
}

struct CollectionSnapshot {
    initial: Vec<Entity>,
    current: Vec<Entity>,
}

struct CollectionState {
    initial: Vec<Entity>,
    current: Vec<Entity>,
    tx: Option<Transaction>,
    tx_snapshot: Option<CollectionSnapshot>,
}

struct CollectionShared {
    meta: Rc<CollectionMeta>,
    uuid: String,
    read_only: bool,
    relay_entity_events: bool,
    channel: EventChannel,
    state: RefCell<CollectionState>,
}

/// An ordered set of entities of one schema.
///
/// Membership is by identity: the same entity is never held twice.
/// Like entity fields, membership carries an initial snapshot next to
/// the current list, so pending additions and removals are observable
/// until `flush` or `revert`.
#[derive(Clone)]
pub struct Collection {
    shared: Rc<CollectionShared>,
}

impl Collection {
    /// Creates a collection with the given initial members.
    ///
    /// Every member must belong to the collection's entity schema;
    /// duplicates (by identity) are dropped.
    pub fn new(
        meta: Rc<CollectionMeta>,
        entities: Vec<Entity>,
        options: CollectionOptions,
    ) -> CoreResult<Collection> {
        let mut initial: Vec<Entity> = Vec::with_capacity(entities.len());
        for entity in entities {
            check_member_type(&meta, &entity)?;
            if !initial.iter().any(|e| *e == entity) {
                initial.push(entity);
            }
        }

        let uuid = options
            .uuid
            .unwrap_or_else(|| ident::mint(&format!("{}Collection", meta.name())));

        let collection = Collection {
            shared: Rc::new(CollectionShared {
                meta,
                uuid,
                read_only: options.read_only,
                relay_entity_events: options.relay_entity_events,
                channel: EventChannel::new(),
                state: RefCell::new(CollectionState {
                    current: initial.clone(),
                    initial,
                    tx: None,
                    tx_snapshot: None,
                }),
            }),
        };

        let members = collection.entities();
        collection.relay_members(&members);
        Ok(collection)
    }

    /// The collection's schema.
    #[must_use]
    pub fn meta(&self) -> &Rc<CollectionMeta> {
        &self.shared.meta
    }

    /// Process-unique identity.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    /// Whether all mutation is blocked.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.shared.read_only
    }

    /// Whether member entity events relay through this channel.
    #[must_use]
    pub fn relay_entity_events(&self) -> bool {
        self.shared.relay_entity_events
    }

    /// The collection's event channel.
    #[must_use]
    pub fn channel(&self) -> &EventChannel {
        &self.shared.channel
    }

    /// A copy of the current membership, in insertion order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.shared.state.borrow().current.clone()
    }

    /// A copy of the initial (last-flushed) membership.
    #[must_use]
    pub fn initial_entities(&self) -> Vec<Entity> {
        self.shared.state.borrow().initial.clone()
    }

    /// Current member count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.borrow().current.len()
    }

    /// Whether the collection currently has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().current.is_empty()
    }

    /// Whether the entity is currently a member.
    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        self.shared.state.borrow().current.iter().any(|e| e == entity)
    }

    /// Position of the entity in the current membership order.
    #[must_use]
    pub fn index_of(&self, entity: &Entity) -> Option<usize> {
        self.shared.state.borrow().current.iter().position(|e| e == entity)
    }

    /// The member at the given position, if any.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<Entity> {
        self.shared.state.borrow().current.get(index).cloned()
    }

    /// Members present now but not in the initial snapshot.
    #[must_use]
    pub fn added_entities(&self) -> Vec<Entity> {
        let state = self.shared.state.borrow();
        state
            .current
            .iter()
            .filter(|e| !state.initial.iter().any(|i| i == *e))
            .cloned()
            .collect()
    }

    /// Members in the initial snapshot but no longer present.
    #[must_use]
    pub fn removed_entities(&self) -> Vec<Entity> {
        let state = self.shared.state.borrow();
        state
            .initial
            .iter()
            .filter(|e| !state.current.iter().any(|c| c == *e))
            .cloned()
            .collect()
    }

    /// Whether membership differs from the initial snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let state = self.shared.state.borrow();
        state.current.len() != state.initial.len()
            || state
                .current
                .iter()
                .zip(state.initial.iter())
                .any(|(c, i)| c != i)
    }

    /// Adds entities, dispatching membership events.
    pub fn add(&self, entities: Vec<Entity>) -> CoreResult<bool> {
        self.add_opts(entities, Notify::Events, false)
    }

    /// [`Collection::add`] with explicit notification and force
    /// options.
    pub fn add_opts(&self, entities: Vec<Entity>, notify: Notify, force: bool) -> CoreResult<bool> {
        self.add_in(entities, notify, force, None)
    }

    pub(crate) fn add_in(
        &self,
        entities: Vec<Entity>,
        notify: Notify,
        force: bool,
        join_tx: Option<&Transaction>,
    ) -> CoreResult<bool> {
        let mut added: Vec<Entity> = Vec::new();
        for entity in entities {
            check_member_type(&self.shared.meta, &entity)?;
            if !self.contains(&entity) && !added.iter().any(|e| *e == entity) {
                added.push(entity);
            }
        }
        self.mutate(
            added,
            Vec::new(),
            collection_topics::BEFORE_ADD,
            collection_topics::ADDED,
            notify,
            force,
            join_tx,
        )
    }

    /// Removes entities, dispatching membership events.
    pub fn remove(&self, entities: Vec<Entity>) -> CoreResult<bool> {
        self.remove_opts(entities, Notify::Events, false)
    }

    /// [`Collection::remove`] with explicit notification and force
    /// options.
    pub fn remove_opts(
        &self,
        entities: Vec<Entity>,
        notify: Notify,
        force: bool,
    ) -> CoreResult<bool> {
        self.remove_in(entities, notify, force, None)
    }

    pub(crate) fn remove_in(
        &self,
        entities: Vec<Entity>,
        notify: Notify,
        force: bool,
        join_tx: Option<&Transaction>,
    ) -> CoreResult<bool> {
        let mut removed: Vec<Entity> = Vec::new();
        for entity in entities {
            if self.contains(&entity) && !removed.iter().any(|e| *e == entity) {
                removed.push(entity);
            }
        }
        self.mutate(
            Vec::new(),
            removed,
            collection_topics::BEFORE_REMOVE,
            collection_topics::REMOVED,
            notify,
            force,
            join_tx,
        )
    }

    /// Removes every current member, dispatching clear events.
    pub fn clear(&self) -> CoreResult<bool> {
        self.clear_opts(Notify::Events, false)
    }

    /// [`Collection::clear`] with explicit notification and force
    /// options.
    pub fn clear_opts(&self, notify: Notify, force: bool) -> CoreResult<bool> {
        let removed = self.entities();
        self.mutate(
            Vec::new(),
            removed,
            collection_topics::BEFORE_CLEAR,
            collection_topics::CLEARED,
            notify,
            force,
            None,
        )
    }

    /// Restores membership to the initial snapshot, dispatching
    /// revert events.
    pub fn revert(&self) -> CoreResult<bool> {
        self.revert_opts(Notify::Events, false)
    }

    /// [`Collection::revert`] with explicit notification and force
    /// options.
    pub fn revert_opts(&self, notify: Notify, force: bool) -> CoreResult<bool> {
        let (added, removed) = {
            let state = self.shared.state.borrow();
            let added: Vec<Entity> = state
                .initial
                .iter()
                .filter(|e| !state.current.iter().any(|c| c == *e))
                .cloned()
                .collect();
            let removed: Vec<Entity> = state
                .current
                .iter()
                .filter(|e| !state.initial.iter().any(|i| i == *e))
                .cloned()
                .collect();
            (added, removed)
        };
        self.mutate(
            added,
            removed,
            collection_topics::BEFORE_REVERT,
            collection_topics::REVERTED,
            notify,
            force,
            None,
        )
    }

    /// Shared mutation path: no-op filter, read-only gate, cancelable
    /// before event, membership update, after event (deferred under an
    /// open transaction).
    #[allow(clippy::too_many_arguments)]
    fn mutate(
        &self,
        added: Vec<Entity>,
        removed: Vec<Entity>,
        before: &str,
        after: &str,
        notify: Notify,
        force: bool,
        join_tx: Option<&Transaction>,
    ) -> CoreResult<bool> {
        if added.is_empty() && removed.is_empty() {
            return Ok(true);
        }
        if self.shared.read_only && !force {
            return Ok(false);
        }
        if let Some(tx) = join_tx {
            self.begin_transaction(Some(tx), false)?;
        }

        if notify == Notify::Events {
            let proceed = self.dispatch_scoped(
                before,
                EventData::CollectionChange {
                    added: added.clone(),
                    removed: removed.clone(),
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
            let mut state = self.shared.state.borrow_mut();
            state
                .current
                .retain(|e| !removed.iter().any(|r| r == e));
            state.current.extend(added.iter().cloned());
        }
        self.unrelay_members(&removed);
        self.relay_members(&added);
        trace!(
            schema = %self.shared.meta.name(),
            uuid = %self.shared.uuid,
            added = added.len(),
            removed = removed.len(),
            "membership changed"
        );

        if notify == Notify::Events && self.transaction().is_none() {
            self.dispatch_scoped(after, EventData::CollectionChange { added, removed }, false);
        }
        Ok(true)
    }

    /// Promotes current membership to the initial snapshot.
    pub fn flush(&self) {
        let mut state = self.shared.state.borrow_mut();
        state.initial = state.current.clone();
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

    /// Joins an existing transaction or opens a new one. With `deep`
    /// every current member joins too.
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
            let mut state = self.shared.state.borrow_mut();
            state.tx_snapshot = Some(CollectionSnapshot {
                initial: state.initial.clone(),
                current: state.current.clone(),
            });
            state.tx = Some(tx.clone());
        }
        tx.attach(Participant::Collection(self.clone()))?;
        self.shared.channel.relay(tx.channel(), None);
        trace!(
            schema = %self.shared.meta.name(),
            uuid = %self.shared.uuid,
            tx = %tx.uuid(),
            "collection joined transaction"
        );

        let begin = EventTopic::plain(tx_topics::BEGIN);
        if self.shared.channel.will_dispatch(&begin) {
            let event = Event::new(begin, self.shared.uuid.clone(), EventData::None, false);
            self.shared.channel.dispatch(&event);
        }

        if deep {
            for member in self.entities() {
                member.begin_transaction(Some(&tx), true)?;
            }
        }
        Ok(tx)
    }

    pub(crate) fn tx_commit(&self, tx: &Transaction) {
        let (added, removed) = {
            let mut state = self.shared.state.borrow_mut();
            let snapshot = state.tx_snapshot.take();
            state.tx = None;
            match snapshot {
                Some(snap) => {
                    let added: Vec<Entity> = state
                        .current
                        .iter()
                        .filter(|e| !snap.current.iter().any(|c| c == *e))
                        .cloned()
                        .collect();
                    let removed: Vec<Entity> = snap
                        .current
                        .iter()
                        .filter(|e| !state.current.iter().any(|c| c == *e))
                        .cloned()
                        .collect();
                    (added, removed)
                }
                None => (Vec::new(), Vec::new()),
            }
        };

        self.shared.channel.unrelay(tx.channel());
        // One combined diff event per commit; the concrete topic names only
        // the membership kinds that actually occurred.
        let inner = match (added.is_empty(), removed.is_empty()) {
            (true, true) => return,
            (false, true) => EventTopic::plain(collection_topics::ADDED),
            (true, false) => EventTopic::plain(collection_topics::REMOVED),
            (false, false) => {
                EventTopic::any_of([collection_topics::ADDED, collection_topics::REMOVED])
            }
        };
        let topic = EventTopic::scoped(self.shared.meta.name(), inner);
        if !self.shared.channel.will_dispatch(&topic) {
            return;
        }
        let event = Event::new(
            topic,
            self.shared.uuid.clone(),
            EventData::CollectionChange { added, removed },
            false,
        );
        self.shared.channel.dispatch(&event);
    }

    pub(crate) fn tx_rollback(&self, tx: &Transaction) {
        let (stale, restored) = {
            let mut state = self.shared.state.borrow_mut();
            let snapshot = state.tx_snapshot.take();
            state.tx = None;
            match snapshot {
                Some(snap) => {
                    let stale = state.current.clone();
                    state.initial = snap.initial;
                    state.current = snap.current.clone();
                    (stale, snap.current)
                }
                None => (Vec::new(), Vec::new()),
            }
        };
        self.shared.channel.unrelay(tx.channel());
        self.unrelay_members(&stale);
        self.relay_members(&restored);
    }

    fn relay_members(&self, members: &[Entity]) {
        if !self.shared.relay_entity_events {
            return;
        }
        for member in members {
            self.shared
                .channel
                .relay(member.channel(), Some(transaction_exclude()));
        }
    }

    fn unrelay_members(&self, members: &[Entity]) {
        if !self.shared.relay_entity_events {
            return;
        }
        for member in members {
            self.shared.channel.unrelay(member.channel());
        }
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
}

fn check_member_type(meta: &Rc<CollectionMeta>, entity: &Entity) -> CoreResult<()> {
    if entity.meta().name() == meta.name() {
        Ok(())
    } else {
        Err(CoreError::relation_type_mismatch(
            format!("{}[]", meta.name()),
            meta.name(),
            entity.meta().name(),
        ))
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("schema", &self.shared.meta.name())
            .field("uuid", &self.shared.uuid)
            .field("len", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityOptions, Related};
    use crate::meta::{EntityMeta, FieldDef, MetaRegistry};
    use crate::value::Value;
    use std::cell::Cell;
    use std::collections::HashMap;

    fn registry() -> Rc<MetaRegistry> {
        let registry = MetaRegistry::new();
        let meta = EntityMeta::new(
            "Item",
            ["id"],
            vec![
                FieldDef::new("id", "integer", 0),
                FieldDef::new("label", "string", ""),
            ],
            vec![],
        )
        .unwrap();
        registry.register(meta, false).unwrap();
        registry
    }

    fn item(registry: &MetaRegistry, id: i64) -> Entity {
        let meta = registry.entity("Item").unwrap();
        let mut state = HashMap::new();
        state.insert("id".to_owned(), Value::Int(id));
        Entity::new(meta, state, EntityOptions::default()).unwrap()
    }

    fn empty(registry: &MetaRegistry) -> Collection {
        Collection::new(
            registry.collection("Item").unwrap(),
            Vec::new(),
            CollectionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn members_deduplicate_by_identity() {
        let registry = registry();
        let a = item(&registry, 1);
        let collection = Collection::new(
            registry.collection("Item").unwrap(),
            vec![a.clone(), a.clone()],
            CollectionOptions::default(),
        )
        .unwrap();
        assert_eq!(collection.len(), 1);
        assert!(collection.add(vec![a]).unwrap());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn add_and_remove_track_dirty_membership() {
        let registry = registry();
        let collection = empty(&registry);
        let a = item(&registry, 1);
        let b = item(&registry, 2);

        collection.add(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(collection.added_entities().len(), 2);
        assert!(collection.is_dirty());

        collection.flush();
        assert!(!collection.is_dirty());

        collection.remove(vec![a.clone()]).unwrap();
        assert_eq!(collection.removed_entities(), vec![a]);
        assert!(collection.contains(&b));
    }

    #[test]
    fn wrong_schema_members_are_rejected() {
        let registry = registry();
        let other_meta = EntityMeta::new(
            "Other",
            ["id"],
            vec![FieldDef::new("id", "integer", 0)],
            vec![],
        )
        .unwrap();
        registry.register(other_meta, false).unwrap();
        let collection = empty(&registry);
        let stranger = item(&registry, 1);
        let other = Entity::new(
            registry.entity("Other").unwrap(),
            HashMap::new(),
            EntityOptions::default(),
        )
        .unwrap();
        assert!(collection.add(vec![stranger]).unwrap());
        assert!(matches!(
            collection.add(vec![other]),
            Err(CoreError::RelationTypeMismatch { .. })
        ));
    }

    #[test]
    fn before_add_cancellation_keeps_membership() {
        let registry = registry();
        let collection = empty(&registry);
        collection.channel().add_listener(
            EventTopic::plain(collection_topics::BEFORE_ADD),
            |event| event.prevent_default(),
        );
        let a = item(&registry, 1);
        assert!(!collection.add(vec![a]).unwrap());
        assert!(collection.is_empty());
    }

    #[test]
    fn read_only_blocks_mutation_unless_forced() {
        let registry = registry();
        let collection = Collection::new(
            registry.collection("Item").unwrap(),
            Vec::new(),
            CollectionOptions {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        let a = item(&registry, 1);
        assert!(!collection.add(vec![a.clone()]).unwrap());
        assert!(collection.add_opts(vec![a], Notify::Events, true).unwrap());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn clear_fires_clear_events() {
        let registry = registry();
        let collection = empty(&registry);
        collection.add(vec![item(&registry, 1)]).unwrap();
        let hits = Rc::new(Cell::new(0));
        let hits2 = Rc::clone(&hits);
        collection.channel().add_listener(
            EventTopic::plain(collection_topics::CLEARED),
            move |event| {
                let (_, removed) = event.data().as_collection_change().unwrap();
                assert_eq!(removed.len(), 1);
                hits2.set(hits2.get() + 1);
            },
        );
        assert!(collection.clear().unwrap());
        assert!(collection.is_empty());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn revert_restores_the_initial_membership() {
        let registry = registry();
        let a = item(&registry, 1);
        let b = item(&registry, 2);
        let collection = Collection::new(
            registry.collection("Item").unwrap(),
            vec![a.clone()],
            CollectionOptions::default(),
        )
        .unwrap();
        collection.remove(vec![a.clone()]).unwrap();
        collection.add(vec![b.clone()]).unwrap();

        assert!(collection.revert().unwrap());
        assert!(collection.contains(&a));
        assert!(!collection.contains(&b));
        assert!(!collection.is_dirty());
    }

    #[test]
    fn member_events_relay_when_enabled() {
        let registry = registry();
        let a = item(&registry, 1);
        let collection = Collection::new(
            registry.collection("Item").unwrap(),
            vec![a.clone()],
            CollectionOptions {
                relay_entity_events: true,
                ..Default::default()
            },
        )
        .unwrap();
        let hits = Rc::new(Cell::new(0));
        let hits2 = Rc::clone(&hits);
        collection.channel().add_listener(
            EventTopic::plain(crate::event::entity::CHANGED),
            move |_| hits2.set(hits2.get() + 1),
        );
        a.set("label", "x").unwrap();
        assert_eq!(hits.get(), 1);

        collection.remove(vec![a.clone()]).unwrap();
        a.set("label", "y").unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn transaction_rollback_restores_membership() {
        let registry = registry();
        let collection = empty(&registry);
        let a = item(&registry, 1);
        let tx = collection.begin_transaction(None, false).unwrap();
        collection.add(vec![a.clone()]).unwrap();
        assert!(collection.contains(&a));
        tx.rollback().unwrap();
        assert!(collection.is_empty());
        assert!(!collection.has_transaction());
    }

    #[test]
    fn transaction_commit_emits_the_membership_diff() {
        let registry = registry();
        let collection = empty(&registry);
        let a = item(&registry, 1);
        let b = item(&registry, 2);
        let hits = Rc::new(Cell::new(0));
        let hits2 = Rc::clone(&hits);
        collection.channel().add_listener(
            EventTopic::plain(collection_topics::ADDED),
            move |event| {
                let (added, _) = event.data().as_collection_change().unwrap();
                assert_eq!(added.len(), 2);
                hits2.set(hits2.get() + 1);
            },
        );

        let tx = collection.begin_transaction(None, false).unwrap();
        collection.add(vec![a]).unwrap();
        collection.add(vec![b]).unwrap();
        assert_eq!(hits.get(), 0);
        tx.commit().unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn used_as_relation_slot_value() {
        let registry = registry();
        let collection = empty(&registry);
        let related = Related::Collection(collection.clone());
        assert_eq!(related.uuid(), collection.uuid());
    }
}
