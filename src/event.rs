//! Event-flavoured signals with bubbling and kind filters
//!
//! An [`EventSignal`] dispatches [`Event`] values instead of bare payloads.
//! The signal stamps the event's target on first dispatch and the current
//! target on every hop, can bubble an event up a chain of
//! [`EventDispatcher`] ancestors, and supports per-slot kind filters so a
//! listener only sees the kinds it asked for.

use crate::slot::{listener_addr, AnySlot, SlotBank, SlotList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Kind tag carried by an [`Event`].
///
/// `filter_matches` decides whether a slot filter accepts a dispatched kind.
/// The default is structural equality; override it for kinds whose variant
/// arguments should act as wildcards.
pub trait EventKind: Clone + PartialEq + Send + Sync + 'static {
    fn filter_matches(filter: &Self, kind: &Self) -> bool {
        filter == kind
    }
}

/// A node that can receive events bubbling up from a descendant.
pub trait EventDispatcher<K: EventKind>: Send + Sync {
    /// Deliver a bubbling event to this dispatcher. Return `false` to stop
    /// the event from travelling further up the chain.
    fn dispatch_event(&self, event: &mut Event<K>) -> bool;

    /// The next dispatcher in the ancestor chain, if any.
    fn parent_dispatcher(&self) -> Option<Arc<dyn EventDispatcher<K>>> {
        None
    }
}

/// A dispatched occurrence: a kind tag plus the dispatcher it originated
/// from and the dispatcher currently handling it.
pub struct Event<K: EventKind> {
    kind: K,
    target: Option<Arc<dyn EventDispatcher<K>>>,
    current_target: Option<Arc<dyn EventDispatcher<K>>>,
}

impl<K: EventKind> Event<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            target: None,
            current_target: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// The dispatcher the event was originally dispatched from. Stamped on
    /// first dispatch; `None` before that.
    pub fn target(&self) -> Option<&Arc<dyn EventDispatcher<K>>> {
        self.target.as_ref()
    }

    /// The dispatcher currently delivering the event.
    pub fn current_target(&self) -> Option<&Arc<dyn EventDispatcher<K>>> {
        self.current_target.as_ref()
    }
}

impl<K: EventKind> Clone for Event<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            target: self.target.clone(),
            current_target: self.current_target.clone(),
        }
    }
}

impl<K: EventKind + std::fmt::Debug> std::fmt::Debug for Event<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("kind", &self.kind).finish()
    }
}

/// Listener registered on an [`EventSignal`].
pub type EventListener<K> = Arc<dyn Fn(&Event<K>) + Send + Sync>;

/// One listener registration on an [`EventSignal`], with an optional kind
/// filter.
pub struct EventSlot<K: EventKind> {
    listener: EventListener<K>,
    once: bool,
    priority: i32,
    enabled: AtomicBool,
    filter: RwLock<Option<K>>,
    bank: Weak<SlotBank<EventSlot<K>>>,
}

impl<K: EventKind> EventSlot<K> {
    fn new(
        listener: EventListener<K>,
        once: bool,
        priority: i32,
        bank: Weak<SlotBank<EventSlot<K>>>,
    ) -> Self {
        Self {
            listener,
            once,
            priority,
            enabled: AtomicBool::new(true),
            filter: RwLock::new(None),
            bank,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Only deliver events whose kind matches `kind` to this slot.
    ///
    /// A once-slot whose filter rejects a dispatch stays registered and
    /// keeps waiting for a matching event.
    pub fn for_kind(&self, kind: K) {
        *self.filter.write().unwrap() = Some(kind);
    }

    fn filter(&self) -> Option<K> {
        self.filter.read().unwrap().clone()
    }

    /// Detach this slot from its owning signal.
    pub fn remove(&self) {
        if let Some(bank) = self.bank.upgrade() {
            bank.remove_addr(self.listener_addr());
        }
    }
}

impl<K: EventKind> AnySlot for EventSlot<K> {
    #[inline]
    fn priority(&self) -> i32 {
        self.priority
    }

    #[inline]
    fn once(&self) -> bool {
        self.once
    }

    #[inline]
    fn listener_addr(&self) -> usize {
        listener_addr(&self.listener)
    }
}

/// Signal flavour that dispatches [`Event`] values and can bubble them
/// through an ancestor chain.
pub struct EventSignal<K: EventKind> {
    bank: Arc<SlotBank<EventSlot<K>>>,
    target: Option<Arc<dyn EventDispatcher<K>>>,
}

impl<K: EventKind> Clone for EventSignal<K> {
    fn clone(&self) -> Self {
        Self {
            bank: Arc::clone(&self.bank),
            target: self.target.clone(),
        }
    }
}

impl<K: EventKind> Default for EventSignal<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EventKind> EventSignal<K> {
    /// Create an event signal with no target; dispatched events carry no
    /// target stamp.
    pub fn new() -> Self {
        Self {
            bank: Arc::new(SlotBank::new()),
            target: None,
        }
    }

    /// Create an event signal owned by `target`; dispatched events are
    /// stamped with it and bubbling starts from its parent.
    pub fn with_target(target: Arc<dyn EventDispatcher<K>>) -> Self {
        Self {
            bank: Arc::new(SlotBank::new()),
            target: Some(target),
        }
    }

    pub fn add(&self, listener: EventListener<K>) -> Arc<EventSlot<K>> {
        self.register(listener, false, 0)
    }

    pub fn add_once(&self, listener: EventListener<K>) -> Arc<EventSlot<K>> {
        self.register(listener, true, 0)
    }

    pub fn add_with_priority(&self, listener: EventListener<K>, priority: i32) -> Arc<EventSlot<K>> {
        self.register(listener, false, priority)
    }

    pub fn add_once_with_priority(
        &self,
        listener: EventListener<K>,
        priority: i32,
    ) -> Arc<EventSlot<K>> {
        self.register(listener, true, priority)
    }

    /// Convenience for [`add`](Self::add) that wraps a closure.
    pub fn add_fn(&self, listener: impl Fn(&Event<K>) + Send + Sync + 'static) -> Arc<EventSlot<K>> {
        self.add(Arc::new(listener))
    }

    fn register(&self, listener: EventListener<K>, once: bool, priority: i32) -> Arc<EventSlot<K>> {
        let addr = listener_addr(&listener);
        self.bank.register(addr, once, priority, || {
            Arc::new(EventSlot::new(listener, once, priority, Arc::downgrade(&self.bank)))
        })
    }

    /// Remove a listener; a no-op when it is not registered.
    pub fn remove(&self, listener: &EventListener<K>) -> Option<Arc<EventSlot<K>>> {
        self.bank.remove_addr(listener_addr(listener))
    }

    pub fn remove_all(&self) {
        self.bank.clear();
    }

    pub fn num_listeners(&self) -> usize {
        self.bank.len()
    }

    /// Deliver the event to every enabled slot whose filter accepts its
    /// kind. Stamps `target` on first dispatch and `current_target` on every
    /// dispatch.
    pub fn dispatch(&self, event: &mut Event<K>) {
        if event.target.is_none() {
            event.target = self.target.clone();
        }
        event.current_target = self.target.clone();

        let snapshot: SlotList<EventSlot<K>> = self.bank.snapshot();
        for slot in snapshot.iter() {
            if !slot.enabled() {
                continue;
            }
            if let Some(filter) = slot.filter() {
                if !K::filter_matches(&filter, &event.kind) {
                    continue;
                }
            }
            if slot.once() {
                self.bank.remove_addr(slot.listener_addr());
            }
            (slot.listener)(event);
        }
    }

    /// Dispatch a fresh event of the given kind.
    pub fn dispatch_kind(&self, kind: K) {
        self.dispatch(&mut Event::new(kind));
    }

    /// Dispatch locally, then walk the ancestor chain, delivering the event
    /// to each dispatcher until one reports it should not continue or the
    /// chain ends.
    pub fn bubble(&self, event: &mut Event<K>) {
        self.dispatch(event);
        let mut current = self
            .target
            .as_ref()
            .and_then(|target| target.parent_dispatcher());
        while let Some(dispatcher) = current {
            event.current_target = Some(Arc::clone(&dispatcher));
            if !dispatcher.dispatch_event(event) {
                break;
            }
            current = dispatcher.parent_dispatcher();
        }
    }

    /// Bubble a fresh event of the given kind.
    pub fn bubble_kind(&self, kind: K) {
        self.bubble(&mut Event::new(kind));
    }
}
