//! Atomic units of work spanning entities and collections.

use crate::collection::Collection;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::event::{transaction as topics, Event, EventChannel, EventData, EventTopic};
use crate::ident;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// An object attached to a transaction.
#[derive(Clone)]
pub(crate) enum Participant {
    /// An attached entity.
    Entity(Entity),
    /// An attached collection.
    Collection(Collection),
}

struct TxState {
    finished: bool,
    success: bool,
    participants: Vec<Participant>,
}

struct TxShared {
    uuid: String,
    channel: EventChannel,
    state: RefCell<TxState>,
}

/// A commit/rollback-capable unit of work.
///
/// Entities and collections attach to a transaction by joining it
/// (usually implicitly, when a relation assignment needs atomicity).
/// Each participant snapshots its state on join. `commit` flushes the
/// deferred change events computed by diffing snapshots against live
/// state; `rollback` restores every participant's snapshot verbatim
/// and fires no change events. Either way the transaction detaches all
/// participants and cannot be reused.
#[derive(Clone)]
pub struct Transaction {
    shared: Rc<TxShared>,
}

impl Transaction {
    /// Creates a new, unfinished transaction.
    #[must_use]
    pub fn new(uuid: Option<String>) -> Self {
        let uuid = uuid.unwrap_or_else(|| ident::mint("Transaction"));
        debug!(tx = %uuid, "transaction opened");
        Self {
            shared: Rc::new(TxShared {
                uuid,
                channel: EventChannel::new(),
                state: RefCell::new(TxState {
                    finished: false,
                    success: false,
                    participants: Vec::new(),
                }),
            }),
        }
    }

    /// The transaction uuid.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    /// The transaction's event channel. Participants relay it so that
    /// commit/rollback events are observable on each of them.
    #[must_use]
    pub fn channel(&self) -> &EventChannel {
        &self.shared.channel
    }

    /// Whether the transaction reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.state.borrow().finished
    }

    /// Whether the transaction committed. Only a finished transaction
    /// has an outcome.
    pub fn is_success(&self) -> CoreResult<bool> {
        let state = self.shared.state.borrow();
        if !state.finished {
            return Err(CoreError::transaction_not_finished(&self.shared.uuid));
        }
        Ok(state.success)
    }

    /// Number of attached participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.shared.state.borrow().participants.len()
    }

    /// Commits the transaction.
    ///
    /// Marks the transaction successful, fires `transactionCommit`
    /// (relayed to every participant), then flushes each participant's
    /// deferred change events and detaches it.
    pub fn commit(&self) -> CoreResult<()> {
        let participants = self.finish(true)?;
        debug!(
            tx = %self.shared.uuid,
            participants = participants.len(),
            "transaction commit"
        );

        self.dispatch_end(topics::COMMIT, true);
        for participant in &participants {
            match participant {
                Participant::Entity(entity) => entity.tx_commit(self),
                Participant::Collection(collection) => collection.tx_commit(self),
            }
        }
        Ok(())
    }

    /// Rolls the transaction back.
    ///
    /// Marks the transaction failed, fires `transactionRollback`, then
    /// restores every participant's snapshot and detaches it. No
    /// change events fire for the undone mutations.
    pub fn rollback(&self) -> CoreResult<()> {
        let participants = self.finish(false)?;
        debug!(
            tx = %self.shared.uuid,
            participants = participants.len(),
            "transaction rollback"
        );

        self.dispatch_end(topics::ROLLBACK, false);
        for participant in &participants {
            match participant {
                Participant::Entity(entity) => entity.tx_rollback(self),
                Participant::Collection(collection) => collection.tx_rollback(self),
            }
        }
        Ok(())
    }

    /// Fails with `TransactionFinished` when the transaction is no
    /// longer joinable.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_finished() {
            return Err(CoreError::transaction_finished(&self.shared.uuid));
        }
        Ok(())
    }

    pub(crate) fn attach(&self, participant: Participant) -> CoreResult<()> {
        self.ensure_active()?;
        self.shared.state.borrow_mut().participants.push(participant);
        Ok(())
    }

    fn finish(&self, success: bool) -> CoreResult<Vec<Participant>> {
        let mut state = self.shared.state.borrow_mut();
        if state.finished {
            return Err(CoreError::transaction_finished(&self.shared.uuid));
        }
        state.finished = true;
        state.success = success;
        Ok(std::mem::take(&mut state.participants))
    }

    fn dispatch_end(&self, topic: &str, committed: bool) {
        let topic = EventTopic::plain(topic);
        if self.shared.channel.will_dispatch(&topic) {
            let event = Event::new(
                topic,
                self.shared.uuid.clone(),
                EventData::TransactionEnd { committed },
                false,
            );
            self.shared.channel.dispatch(&event);
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Transaction")
            .field("uuid", &self.shared.uuid)
            .field("finished", &state.finished)
            .field("success", &state.success)
            .field("participants", &state.participants.len())
            .finish()
    }
}
