//! Publish/subscribe channel with relays.

use crate::event::topic::EventTopic;
use crate::event::Event;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying a registered listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener callback type.
pub type ListenerFn = Rc<dyn Fn(&Event)>;

struct Listener {
    id: ListenerId,
    selector: EventTopic,
    callback: ListenerFn,
}

struct RelayEdge {
    target: Weak<ChannelCore>,
    exclude: Option<EventTopic>,
}

struct ChannelCore {
    id: u64,
    listeners: RefCell<Vec<Listener>>,
    /// Channels that forward this channel's events ("relay targets").
    targets: RefCell<Vec<RelayEdge>>,
    next_listener: Cell<u64>,
}

/// A publish/subscribe channel owned by every entity, collection and
/// transaction.
///
/// Cloning the handle is cheap and shares the underlying channel.
///
/// Besides plain listeners, a channel can *relay* another channel:
/// `a.relay(&b, None)` makes every event dispatched on `b` also reach
/// the listeners of `a`, until `a.unrelay(&b)`. Relays form a directed
/// graph; dispatch walks it breadth-first and skips channels it has
/// already visited, so cyclic relay graphs (two related objects both
/// relaying each other) deliver each event at most once per channel
/// instead of looping.
#[derive(Clone)]
pub struct EventChannel {
    core: Rc<ChannelCore>,
}

impl EventChannel {
    /// Creates a new channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(ChannelCore {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                listeners: RefCell::new(Vec::new()),
                targets: RefCell::new(Vec::new()),
                next_listener: Cell::new(1),
            }),
        }
    }

    /// Registers a listener for events matching `selector`.
    pub fn add_listener(
        &self,
        selector: EventTopic,
        callback: impl Fn(&Event) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.core.next_listener.get());
        self.core.next_listener.set(id.0 + 1);
        self.core.listeners.borrow_mut().push(Listener {
            id,
            selector,
            callback: Rc::new(callback),
        });
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.core.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.core.listeners.borrow().len()
    }

    /// Starts forwarding `source`'s events to this channel's listeners.
    ///
    /// Events matching `exclude` are not forwarded. Relaying a channel
    /// onto itself is a no-op; relaying an already-relayed source
    /// replaces the exclude selector.
    pub fn relay(&self, source: &EventChannel, exclude: Option<EventTopic>) {
        if Rc::ptr_eq(&self.core, &source.core) {
            return;
        }
        let mut targets = source.core.targets.borrow_mut();
        for edge in targets.iter_mut() {
            if let Some(existing) = edge.target.upgrade() {
                if Rc::ptr_eq(&existing, &self.core) {
                    edge.exclude = exclude;
                    return;
                }
            }
        }
        targets.push(RelayEdge {
            target: Rc::downgrade(&self.core),
            exclude,
        });
    }

    /// Stops forwarding `source`'s events to this channel.
    pub fn unrelay(&self, source: &EventChannel) {
        source.core.targets.borrow_mut().retain(|edge| {
            edge.target
                .upgrade()
                .is_some_and(|t| !Rc::ptr_eq(&t, &self.core))
        });
    }

    /// Dispatches an event to all matching listeners, including those
    /// reachable through the relay graph.
    ///
    /// Returns `false` if a listener called
    /// [`Event::prevent_default`] on a cancellable event; the caller
    /// must then abort the pending mutation.
    pub fn dispatch(&self, event: &Event) -> bool {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut queue: VecDeque<Rc<ChannelCore>> = VecDeque::new();
        queue.push_back(Rc::clone(&self.core));

        while let Some(core) = queue.pop_front() {
            if !visited.insert(core.id) {
                continue;
            }

            // Snapshot callbacks first: listeners may mutate the graph
            // (and this very channel) re-entrantly.
            let callbacks: Vec<ListenerFn> = core
                .listeners
                .borrow()
                .iter()
                .filter(|l| l.selector.matches(event.topic()))
                .map(|l| Rc::clone(&l.callback))
                .collect();

            let next: Vec<Rc<ChannelCore>> = {
                let mut targets = core.targets.borrow_mut();
                targets.retain(|edge| edge.target.strong_count() > 0);
                targets
                    .iter()
                    .filter(|edge| {
                        edge.exclude
                            .as_ref()
                            .is_none_or(|ex| !ex.matches(event.topic()))
                    })
                    .filter_map(|edge| edge.target.upgrade())
                    .collect()
            };

            for callback in callbacks {
                callback(event);
            }
            queue.extend(next);
        }

        !event.is_default_prevented()
    }

    /// Returns whether any listener, local or reachable over relays,
    /// would receive an event with the given concrete topic.
    ///
    /// Callers use this to skip building events nobody listens for.
    #[must_use]
    pub fn will_dispatch(&self, topic: &EventTopic) -> bool {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut queue: VecDeque<Rc<ChannelCore>> = VecDeque::new();
        queue.push_back(Rc::clone(&self.core));

        while let Some(core) = queue.pop_front() {
            if !visited.insert(core.id) {
                continue;
            }
            if core
                .listeners
                .borrow()
                .iter()
                .any(|l| l.selector.matches(topic))
            {
                return true;
            }
            let targets = core.targets.borrow();
            for edge in targets.iter() {
                if edge
                    .exclude
                    .as_ref()
                    .is_none_or(|ex| !ex.matches(topic))
                {
                    if let Some(t) = edge.target.upgrade() {
                        queue.push_back(t);
                    }
                }
            }
        }

        false
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("id", &self.core.id)
            .field("listeners", &self.core.listeners.borrow().len())
            .field("targets", &self.core.targets.borrow().len())
            .finish()
    }
}
