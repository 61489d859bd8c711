//! Relation slot assignment and the consistency cascade.

use super::{Entity, EntityShared, Notify, Related};
use crate::error::{CoreError, CoreResult};
use crate::event::{
    collection as collection_topics, entity as entity_topics, relation as relation_topics,
    transaction_exclude, EventChannel, EventData, EventTopic, ListenerId,
};
use crate::meta::{Relation, RelationKind};
use crate::transaction::Transaction;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Per-relation listener and relay bookkeeping on the owning entity.
pub(crate) struct RelationWiring {
    channel: EventChannel,
    listener: Option<ListenerId>,
    relayed: bool,
}

/// Validates that a slot occupant matches the relation's target
/// schema and cardinality.
pub(super) fn check_related_type(relation: &Rc<Relation>, related: &Related) -> CoreResult<()> {
    let ok = match (relation.kind(), related) {
        (RelationKind::BelongsTo | RelationKind::HasOne, Related::Entity(entity)) => {
            entity.meta().name() == relation.related_name()
        }
        (RelationKind::HasMany, Related::Collection(collection)) => {
            collection.meta().name() == relation.related_name()
        }
        _ => false,
    };
    if ok {
        return Ok(());
    }
    let expected = match relation.kind() {
        RelationKind::HasMany => format!("{}[]", relation.related_name()),
        _ => relation.related_name().to_owned(),
    };
    let actual = match related {
        Related::Entity(entity) => entity.meta().name().to_owned(),
        Related::Collection(collection) => format!("{}[]", collection.meta().name()),
    };
    Err(CoreError::relation_type_mismatch(
        relation.name(),
        expected,
        actual,
    ))
}

impl Entity {
    /// Reads a relation slot's current occupant.
    pub fn get_related(&self, relation: &str) -> CoreResult<Option<Related>> {
        self.shared.meta.relation(relation)?;
        let state = self.shared.state.borrow();
        Ok(state.related_current.get(relation).cloned().flatten())
    }

    /// Reads a relation slot's initial (last-flushed) occupant.
    pub fn get_related_initial(&self, relation: &str) -> CoreResult<Option<Related>> {
        self.shared.meta.relation(relation)?;
        let state = self.shared.state.borrow();
        Ok(state.related_initial.get(relation).cloned().flatten())
    }

    /// Assigns a relation slot and cascades the change to keep both
    /// sides consistent.
    ///
    /// The whole cascade runs inside one transaction: when none is
    /// active an internal one is opened and committed at the end, so
    /// any cancelled or failed step rolls every touched object back.
    /// Returns `Ok(true)` on success or no-op, `Ok(false)` when the
    /// entity is read-only or a listener cancelled the change.
    pub fn set_related(&self, relation: &str, value: Option<Related>) -> CoreResult<bool> {
        self.set_related_opts(relation, value, Notify::Events, false, true)
    }

    /// [`Entity::set_related`] with explicit options. With
    /// `update_related` unset the reverse side and collection
    /// membership are left alone; the cascade uses that for its own
    /// inner assignments.
    pub fn set_related_opts(
        &self,
        relation: &str,
        value: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
    ) -> CoreResult<bool> {
        self.set_related_in(relation, value, notify, force, update_related, None)
    }

    pub(crate) fn set_related_in(
        &self,
        relation: &str,
        value: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
        join_tx: Option<&Transaction>,
    ) -> CoreResult<bool> {
        let relation = self.shared.meta.relation(relation)?;

        // A vacant to-many slot is normalized to an empty collection.
        let value = match (&value, relation.kind()) {
            (None, RelationKind::HasMany) => {
                let collection_meta = relation.related_collection_meta()?;
                Some(Related::Collection(crate::collection::Collection::new(
                    collection_meta,
                    Vec::new(),
                    crate::collection::CollectionOptions {
                        relay_entity_events: relation.relay_events(),
                        ..Default::default()
                    },
                )?))
            }
            _ => value,
        };
        if let Some(related) = &value {
            check_related_type(&relation, related)?;
        }

        let old = {
            let state = self.shared.state.borrow();
            state.related_current.get(relation.name()).cloned().flatten()
        };
        if Related::same_slot(&old, &value) {
            return Ok(true);
        }
        if self.shared.read_only && !force {
            return Ok(false);
        }

        if let Some(tx) = join_tx {
            self.begin_transaction(Some(tx), false)?;
        }
        let (tx, owned) = match self.transaction() {
            Some(tx) => (tx, false),
            None => (self.begin_transaction(None, false)?, true),
        };

        if notify == Notify::Events {
            let proceed = self.dispatch_relation_event(
                relation_topics::BEFORE_CHANGE,
                relation.name(),
                old.clone(),
                value.clone(),
                true,
            );
            if !proceed {
                if !tx.is_finished() {
                    tx.rollback()?;
                }
                return Ok(false);
            }
        }

        // The slot is written before the cascade so that re-entrant
        // assignments of the same value become no-ops.
        {
            let mut state = self.shared.state.borrow_mut();
            state
                .related_current
                .insert(relation.name().to_owned(), value.clone());
        }
        self.unwire_relation(relation.name());
        trace!(
            schema = %self.shared.meta.name(),
            uuid = %self.shared.uuid,
            relation = %relation.name(),
            "relation slot assigned"
        );

        let cascade = self.cascade(&relation, old, value.clone(), notify, force, update_related, &tx);
        match cascade {
            Ok(true) => {}
            // A failed step may already have rolled the shared
            // transaction back.
            Ok(false) => {
                if !tx.is_finished() {
                    tx.rollback()?;
                }
                return Ok(false);
            }
            Err(err) => {
                if !tx.is_finished() {
                    tx.rollback()?;
                }
                return Err(err);
            }
        }

        if let Some(related) = &value {
            self.wire_relation(&relation, related);
        }
        if owned {
            tx.commit()?;
        }
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn cascade(
        &self,
        relation: &Rc<Relation>,
        old: Option<Related>,
        new: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
        tx: &Transaction,
    ) -> CoreResult<bool> {
        match relation.kind() {
            RelationKind::BelongsTo => {
                self.cascade_belongs_to(relation, old, new, notify, force, update_related, tx)
            }
            RelationKind::HasOne => {
                self.cascade_has_one(relation, old, new, notify, force, update_related, tx)
            }
            RelationKind::HasMany => {
                self.cascade_has_many(relation, old, new, notify, force, update_related, tx)
            }
        }
    }

    /// Owning side: copy the foreign key from the new target and,
    /// when `update_related`, move this entity between the targets'
    /// reverse slots.
    #[allow(clippy::too_many_arguments)]
    fn cascade_belongs_to(
        &self,
        relation: &Rc<Relation>,
        old: Option<Related>,
        new: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
        tx: &Transaction,
    ) -> CoreResult<bool> {
        let backward = self.shared.meta.backward_relation(relation)?;

        if update_related {
            if let (Some(Related::Entity(old_target)), Some(backward)) = (&old, &backward) {
                match backward.kind() {
                    RelationKind::HasOne => {
                        let points_here = old_target
                            .get_related(backward.name())?
                            .is_some_and(|r| r.uuid() == self.shared.uuid);
                        if points_here
                            && !old_target.set_related_in(
                                backward.name(),
                                None,
                                notify,
                                force,
                                false,
                                Some(tx),
                            )?
                        {
                            return Ok(false);
                        }
                    }
                    RelationKind::HasMany => {
                        if let Some(Related::Collection(collection)) =
                            old_target.get_related(backward.name())?
                        {
                            if !collection.remove_in(
                                vec![self.clone()],
                                notify,
                                force,
                                Some(tx),
                            )? {
                                return Ok(false);
                            }
                        }
                    }
                    RelationKind::BelongsTo => {}
                }
            }
        }

        if let Some(Related::Entity(target)) = &new {
            let mut fk_state = HashMap::new();
            for (local, remote) in relation.foreign_key() {
                fk_state.insert(local.clone(), target.get(remote)?);
            }
            // Foreign-key copies bypass the read-only check.
            if !self.set_state_in(fk_state, notify, true, Some(tx))? {
                return Ok(false);
            }

            if update_related {
                if let Some(backward) = &backward {
                    match backward.kind() {
                        RelationKind::HasOne => {
                            if !target.set_related_in(
                                backward.name(),
                                Some(Related::Entity(self.clone())),
                                notify,
                                force,
                                false,
                                Some(tx),
                            )? {
                                return Ok(false);
                            }
                        }
                        RelationKind::HasMany => {
                            if let Some(Related::Collection(collection)) =
                                target.get_related(backward.name())?
                            {
                                if !collection.add_in(
                                    vec![self.clone()],
                                    notify,
                                    force,
                                    Some(tx),
                                )? {
                                    return Ok(false);
                                }
                            }
                        }
                        RelationKind::BelongsTo => {}
                    }
                }
            }
        }
        Ok(true)
    }

    /// Non-owning single slot: update the targets' reverse
    /// `BelongsTo` slots, which carries the foreign-key copy with it.
    #[allow(clippy::too_many_arguments)]
    fn cascade_has_one(
        &self,
        relation: &Rc<Relation>,
        old: Option<Related>,
        new: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
        tx: &Transaction,
    ) -> CoreResult<bool> {
        if !update_related {
            return Ok(true);
        }
        let Some(backward) = self.shared.meta.backward_relation(relation)? else {
            return Ok(true);
        };

        if let Some(Related::Entity(old_target)) = &old {
            let points_here = old_target
                .get_related(backward.name())?
                .is_some_and(|r| r.uuid() == self.shared.uuid);
            if points_here
                && !old_target.set_related_in(backward.name(), None, notify, force, false, Some(tx))?
            {
                return Ok(false);
            }
        }
        if let Some(Related::Entity(target)) = &new {
            if !target.set_related_in(
                backward.name(),
                Some(Related::Entity(self.clone())),
                notify,
                force,
                false,
                Some(tx),
            )? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Collection slot: reconcile the members' reverse `BelongsTo`
    /// slots for everyone leaving or present in the new collection.
    #[allow(clippy::too_many_arguments)]
    fn cascade_has_many(
        &self,
        relation: &Rc<Relation>,
        old: Option<Related>,
        new: Option<Related>,
        notify: Notify,
        force: bool,
        update_related: bool,
        tx: &Transaction,
    ) -> CoreResult<bool> {
        if !update_related {
            return Ok(true);
        }
        let Some(backward) = self.shared.meta.backward_relation(relation)? else {
            return Ok(true);
        };

        let old_members = match &old {
            Some(Related::Collection(collection)) => collection.entities(),
            _ => Vec::new(),
        };
        let new_members = match &new {
            Some(Related::Collection(collection)) => collection.entities(),
            _ => Vec::new(),
        };

        for member in &old_members {
            if new_members.iter().any(|m| m == member) {
                continue;
            }
            let points_here = member
                .get_related(backward.name())?
                .is_some_and(|r| r.uuid() == self.shared.uuid);
            if points_here
                && !member.set_related_in(backward.name(), None, notify, force, false, Some(tx))?
            {
                return Ok(false);
            }
        }
        for member in &new_members {
            if !member.set_related_in(
                backward.name(),
                Some(Related::Entity(self.clone())),
                notify,
                force,
                false,
                Some(tx),
            )? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Installs listeners and event relays for an occupied slot.
    pub(super) fn wire_relation(&self, relation: &Rc<Relation>, related: &Related) {
        let channel = match related {
            Related::Entity(entity) => entity.channel().clone(),
            Related::Collection(collection) => collection.channel().clone(),
        };
        let relayed = relation.relay_events();
        if relayed {
            self.shared
                .channel
                .relay(&channel, Some(transaction_exclude()));
        }

        let listener = match (relation.kind(), related) {
            (RelationKind::BelongsTo, Related::Entity(target)) => {
                Some(self.install_fk_listener(relation, target, &channel))
            }
            (RelationKind::HasMany, Related::Collection(_)) => self
                .install_membership_listener(relation, &channel),
            _ => None,
        };

        self.shared.state.borrow_mut().wiring.insert(
            relation.name().to_owned(),
            RelationWiring {
                channel,
                listener,
                relayed,
            },
        );
    }

    /// Removes the listener and relay installed for a slot, if any.
    pub(super) fn unwire_relation(&self, relation: &str) {
        let wiring = self.shared.state.borrow_mut().wiring.remove(relation);
        if let Some(wiring) = wiring {
            if let Some(id) = wiring.listener {
                wiring.channel.remove_listener(id);
            }
            if wiring.relayed {
                self.shared.channel.unrelay(&wiring.channel);
            }
        }
    }

    /// Drops and re-installs all relation wiring from the current
    /// slots. Used by the constructor and by transaction rollback.
    pub(crate) fn rewire_relations(&self) {
        let names: Vec<String> = {
            let state = self.shared.state.borrow();
            state.wiring.keys().cloned().collect()
        };
        for name in names {
            self.unwire_relation(&name);
        }

        let slots: Vec<(Rc<Relation>, Related)> = {
            let state = self.shared.state.borrow();
            self.shared
                .meta
                .relations()
                .iter()
                .filter_map(|relation| {
                    state
                        .related_current
                        .get(relation.name())
                        .cloned()
                        .flatten()
                        .map(|related| (Rc::clone(relation), related))
                })
                .collect()
        };
        for (relation, related) in slots {
            self.wire_relation(&relation, &related);
        }
    }

    /// Mirrors foreign-key field changes from the `BelongsTo` target
    /// into this entity.
    fn install_fk_listener(
        &self,
        relation: &Rc<Relation>,
        target: &Entity,
        channel: &EventChannel,
    ) -> ListenerId {
        let owner: Weak<EntityShared> = self.shared_weak();
        let relation = Rc::clone(relation);
        let target_uuid = target.uuid().to_owned();
        let selector = EventTopic::scoped(
            relation.related_name(),
            EventTopic::plain(entity_topics::CHANGED),
        );
        channel.add_listener(selector, move |event| {
            if event.source() != target_uuid {
                return;
            }
            let Some(owner) = owner.upgrade() else {
                return;
            };
            let Some((fields, _, new_state)) = event.data().as_field_change() else {
                return;
            };
            let mut fk_state: HashMap<String, Value> = HashMap::new();
            for (local, remote) in relation.foreign_key() {
                if fields.iter().any(|f| f == remote) {
                    if let Some(value) = new_state.get(remote) {
                        fk_state.insert(local.clone(), value.clone());
                    }
                }
            }
            if !fk_state.is_empty() {
                let owner = Entity::from_shared(owner);
                if let Err(error) = owner.set_state_opts(fk_state, Notify::Events, true) {
                    trace!(%error, "foreign key mirror failed");
                }
            }
        })
    }

    /// Keeps members' reverse `BelongsTo` slots in step with direct
    /// collection membership changes.
    fn install_membership_listener(
        &self,
        relation: &Rc<Relation>,
        channel: &EventChannel,
    ) -> Option<ListenerId> {
        let backward = self.shared.meta.backward_relation(relation).ok().flatten()?;
        let owner: Weak<EntityShared> = self.shared_weak();
        let selector = EventTopic::scoped(
            relation.related_name(),
            EventTopic::any_of([collection_topics::ADDED, collection_topics::REMOVED]),
        );
        Some(channel.add_listener(selector, move |event| {
            let Some(owner) = owner.upgrade() else {
                return;
            };
            let owner = Entity::from_shared(owner);
            let Some((added, removed)) = event.data().as_collection_change() else {
                return;
            };
            for member in added {
                let result = member.set_related_opts(
                    backward.name(),
                    Some(Related::Entity(owner.clone())),
                    Notify::Events,
                    false,
                    false,
                );
                if let Err(error) = result {
                    trace!(%error, "membership backlink failed");
                }
            }
            for member in removed {
                let points_here = member
                    .get_related(backward.name())
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.uuid() == owner.uuid());
                if points_here {
                    let result = member.set_related_opts(
                        backward.name(),
                        None,
                        Notify::Events,
                        false,
                        false,
                    );
                    if let Err(error) = result {
                        trace!(%error, "membership backlink failed");
                    }
                }
            }
        }))
    }

    fn dispatch_relation_event(
        &self,
        kind: &str,
        relation: &str,
        old: Option<Related>,
        new: Option<Related>,
        cancellable: bool,
    ) -> bool {
        let topic = EventTopic::scoped(self.shared.meta.name(), EventTopic::plain(kind));
        if !self.shared.channel.will_dispatch(&topic) {
            return true;
        }
        let event = crate::event::Event::new(
            topic,
            self.shared.uuid.clone(),
            EventData::RelationChange {
                relation: relation.to_owned(),
                old,
                new,
            },
            cancellable,
        );
        self.shared.channel.dispatch(&event)
    }
}
