//! Slots and the persistent list that stores them
//!
//! A slot is one listener registration. Slots live in a persistent
//! singly-linked list: every structural operation returns a new head and
//! shares the untouched tail, so an in-flight dispatch can keep walking its
//! snapshot while the live list changes underneath it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// A listener registered on a [`Signal`](crate::Signal).
///
/// Listener identity is the `Arc` allocation: cloning the `Arc` refers to the
/// same listener, wrapping the same closure in a new `Arc` does not.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Address used as listener identity.
#[inline]
pub(crate) fn listener_addr<T: ?Sized>(listener: &Arc<T>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Common shape of a slot element, independent of payload type.
pub trait AnySlot: Send + Sync + 'static {
    /// Dispatch priority of this slot
    fn priority(&self) -> i32;
    /// Whether this slot detaches itself after one dispatch
    fn once(&self) -> bool;
    /// Identity of the registered listener
    fn listener_addr(&self) -> usize;
}

/// One listener registration: listener, priority, once-flag, enabled-flag,
/// optional bound payload, and a back-reference to the owning signal.
pub struct Slot<T: Send + Sync + 'static> {
    listener: Listener<T>,
    once: bool,
    priority: i32,
    enabled: AtomicBool,
    params: RwLock<Option<Arc<T>>>,
    bank: Weak<SlotBank<Slot<T>>>,
}

impl<T: Send + Sync + 'static> Slot<T> {
    pub(crate) fn new(
        listener: Listener<T>,
        once: bool,
        priority: i32,
        bank: Weak<SlotBank<Slot<T>>>,
    ) -> Self {
        Self {
            listener,
            once,
            priority,
            enabled: AtomicBool::new(true),
            params: RwLock::new(None),
            bank,
        }
    }

    /// The registered listener
    #[inline]
    pub fn listener(&self) -> &Listener<T> {
        &self.listener
    }

    /// Whether this slot currently receives dispatches
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable this slot without removing it
    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Bind a fixed payload for this listener only. When set, the bound
    /// value replaces the dispatched payload for this slot.
    pub fn set_params(&self, value: T) {
        *self.params.write().unwrap() = Some(Arc::new(value));
    }

    /// Clear a previously bound payload
    pub fn clear_params(&self) {
        *self.params.write().unwrap() = None;
    }

    pub(crate) fn params(&self) -> Option<Arc<T>> {
        self.params.read().unwrap().clone()
    }

    /// Detach this slot from its owning signal
    pub fn remove(&self) {
        if let Some(bank) = self.bank.upgrade() {
            bank.remove_addr(self.listener_addr());
        }
    }
}

impl<T: Send + Sync + 'static> AnySlot for Slot<T> {
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

// =============================================================================
// Persistent slot list
// =============================================================================

struct SlotNode<S: AnySlot> {
    slot: Arc<S>,
    tail: SlotList<S>,
}

/// Persistent singly-linked list of slots.
///
/// The empty list is the shared sentinel; prepend, append, priority insert,
/// and filter all produce a new head without mutating existing nodes.
pub struct SlotList<S: AnySlot> {
    head: Option<Arc<SlotNode<S>>>,
}

impl<S: AnySlot> Clone for SlotList<S> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
        }
    }
}

impl<S: AnySlot> Default for SlotList<S> {
    fn default() -> Self {
        Self::nil()
    }
}

impl<S: AnySlot> SlotList<S> {
    /// The empty list
    #[inline]
    pub fn nil() -> Self {
        Self { head: None }
    }

    fn single(slot: Arc<S>) -> Self {
        Self {
            head: Some(Arc::new(SlotNode {
                slot,
                tail: Self::nil(),
            })),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// New list with `slot` at the front
    pub fn prepend(&self, slot: Arc<S>) -> Self {
        Self {
            head: Some(Arc::new(SlotNode {
                slot,
                tail: self.clone(),
            })),
        }
    }

    /// New list with `slot` at the back; the spine is cloned, the slots are
    /// shared
    pub fn append(&self, slot: Arc<S>) -> Self {
        match &self.head {
            None => Self::single(slot),
            Some(node) => Self {
                head: Some(Arc::new(SlotNode {
                    slot: Arc::clone(&node.slot),
                    tail: node.tail.append(slot),
                })),
            },
        }
    }

    /// New list with `slot` inserted before the first slot of strictly lower
    /// priority, keeping the list sorted descending. Equal-priority slots
    /// stay in registration order.
    pub fn insert_with_priority(&self, slot: Arc<S>) -> Self {
        match &self.head {
            None => Self::single(slot),
            Some(node) => {
                if slot.priority() > node.slot.priority() {
                    self.prepend(slot)
                } else {
                    Self {
                        head: Some(Arc::new(SlotNode {
                            slot: Arc::clone(&node.slot),
                            tail: node.tail.insert_with_priority(slot),
                        })),
                    }
                }
            }
        }
    }

    /// New list without the slot for `addr`; returns an unchanged clone when
    /// the listener is not registered. The tail past the removal point is
    /// shared with the original list.
    pub fn filter_not(&self, addr: usize) -> Self {
        if !self.contains(addr) {
            return self.clone();
        }
        self.remove_found(addr)
    }

    fn remove_found(&self, addr: usize) -> Self {
        match &self.head {
            None => self.clone(),
            Some(node) if node.slot.listener_addr() == addr => node.tail.clone(),
            Some(node) => Self {
                head: Some(Arc::new(SlotNode {
                    slot: Arc::clone(&node.slot),
                    tail: node.tail.remove_found(addr),
                })),
            },
        }
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.iter().any(|slot| slot.listener_addr() == addr)
    }

    pub fn find(&self, addr: usize) -> Option<Arc<S>> {
        self.iter().find(|slot| slot.listener_addr() == addr)
    }

    /// Iterate the slots front to back
    pub fn iter(&self) -> SlotIter<'_, S> {
        SlotIter { next: &self.head }
    }
}

/// Iterator over a [`SlotList`] snapshot
pub struct SlotIter<'a, S: AnySlot> {
    next: &'a Option<Arc<SlotNode<S>>>,
}

impl<'a, S: AnySlot> Iterator for SlotIter<'a, S> {
    type Item = Arc<S>;

    fn next(&mut self) -> Option<Arc<S>> {
        let node = self.next.as_ref()?;
        self.next = &node.tail.head;
        Some(Arc::clone(&node.slot))
    }
}

// =============================================================================
// Registration state shared by signal flavours
// =============================================================================

/// The mutable registration state behind a signal: the live slot list plus
/// the sticky priority-mode flag.
pub(crate) struct SlotBank<S: AnySlot> {
    slots: RwLock<SlotList<S>>,
    priority_based: AtomicBool,
}

impl<S: AnySlot> SlotBank<S> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(SlotList::nil()),
            priority_based: AtomicBool::new(false),
        }
    }

    /// Register a slot, enforcing one slot per listener identity. Returns the
    /// existing slot when the listener is already registered with the same
    /// once-flag; panics on a conflicting once-flag.
    pub fn register(
        &self,
        addr: usize,
        once: bool,
        priority: i32,
        make: impl FnOnce() -> Arc<S>,
    ) -> Arc<S> {
        let mut slots = self.slots.write().unwrap();
        if let Some(existing) = slots.find(addr) {
            if existing.once() != once {
                panic!(
                    "cannot add() and add_once() the same listener without removing it first"
                );
            }
            return existing;
        }
        if priority != 0 {
            self.priority_based.store(true, Ordering::Relaxed);
        }
        let slot = make();
        *slots = if self.priority_based.load(Ordering::Relaxed) {
            slots.insert_with_priority(Arc::clone(&slot))
        } else {
            slots.prepend(Arc::clone(&slot))
        };
        slot
    }

    pub fn remove_addr(&self, addr: usize) -> Option<Arc<S>> {
        let mut slots = self.slots.write().unwrap();
        let slot = slots.find(addr)?;
        *slots = slots.filter_not(addr);
        Some(slot)
    }

    pub fn clear(&self) {
        *self.slots.write().unwrap() = SlotList::nil();
    }

    pub fn snapshot(&self) -> SlotList<S> {
        self.slots.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSlot {
        id: u32,
        priority: i32,
    }

    impl AnySlot for TestSlot {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn once(&self) -> bool {
            false
        }

        fn listener_addr(&self) -> usize {
            self.id as usize
        }
    }

    fn slot(id: u32, priority: i32) -> Arc<TestSlot> {
        Arc::new(TestSlot { id, priority })
    }

    fn ids(list: &SlotList<TestSlot>) -> Vec<u32> {
        list.iter().map(|s| s.id).collect()
    }

    #[test]
    fn prepend_builds_reverse_order() {
        let list = SlotList::nil()
            .prepend(slot(1, 0))
            .prepend(slot(2, 0))
            .prepend(slot(3, 0));
        assert_eq!(ids(&list), [3, 2, 1]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn append_keeps_order_and_shares_slots() {
        let list = SlotList::nil().append(slot(1, 0)).append(slot(2, 0));
        assert_eq!(ids(&list), [1, 2]);
    }

    #[test]
    fn priority_insert_sorts_descending() {
        let list = SlotList::nil()
            .insert_with_priority(slot(1, 0))
            .insert_with_priority(slot(2, 5))
            .insert_with_priority(slot(3, 3));
        assert_eq!(ids(&list), [2, 3, 1]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let list = SlotList::nil()
            .insert_with_priority(slot(1, 5))
            .insert_with_priority(slot(2, 5))
            .insert_with_priority(slot(3, 5));
        assert_eq!(ids(&list), [1, 2, 3]);
    }

    #[test]
    fn filter_not_removes_only_the_match() {
        let list = SlotList::nil()
            .prepend(slot(1, 0))
            .prepend(slot(2, 0))
            .prepend(slot(3, 0));
        let filtered = list.filter_not(2);
        assert_eq!(ids(&filtered), [3, 1]);
        // original list is untouched
        assert_eq!(ids(&list), [3, 2, 1]);
    }

    #[test]
    fn filter_not_missing_listener_is_a_clone() {
        let list = SlotList::nil().prepend(slot(1, 0));
        let filtered = list.filter_not(99);
        assert_eq!(ids(&filtered), [1]);
    }

    #[test]
    fn find_and_contains() {
        let list = SlotList::nil().prepend(slot(7, 0));
        assert!(list.contains(7));
        assert!(!list.contains(8));
        assert_eq!(list.find(7).map(|s| s.id), Some(7));
    }

    #[test]
    fn removal_does_not_disturb_a_snapshot() {
        let list = SlotList::nil()
            .prepend(slot(1, 0))
            .prepend(slot(2, 0))
            .prepend(slot(3, 0));
        let snapshot = list.clone();
        let live = list.filter_not(2);
        assert_eq!(ids(&snapshot), [3, 2, 1]);
        assert_eq!(ids(&live), [3, 1]);
    }
}
