//! Ordered multicast dispatch of typed payloads
//!
//! A [`Signal`] delivers a payload to every registered [`Slot`], newest
//! registration first, until the first non-zero priority is seen; from then
//! on the signal is permanently priority-ordered (descending). Dispatch walks
//! an immutable snapshot of the slot list, so listeners may freely add and
//! remove listeners mid-dispatch without affecting the in-flight delivery.

use crate::slot::{listener_addr, AnySlot, Listener, Slot, SlotBank};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Ordered multicast dispatcher.
///
/// `Signal` is a cheap-to-clone handle over shared state: clones dispatch to
/// the same listeners.
///
/// # Examples
///
/// ```rust
/// use signalmap::Signal;
///
/// let signal = Signal::<String>::new();
/// signal.add_fn(|term| println!("searching for {term}"));
/// signal.dispatch(&"cats".to_string());
/// ```
pub struct Signal<T: Send + Sync + 'static> {
    bank: Arc<SlotBank<Slot<T>>>,
}

impl<T: Send + Sync + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            bank: Arc::clone(&self.bank),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Signal<T> {
    /// Create a signal with no listeners.
    pub fn new() -> Self {
        Self {
            bank: Arc::new(SlotBank::new()),
        }
    }

    /// Register a listener. Until a non-zero priority has ever been supplied
    /// on this signal, new registrations dispatch before older ones.
    ///
    /// Re-registering the same listener (`Arc` identity) with the same
    /// once-flag returns the existing slot; a conflicting once-flag panics.
    pub fn add(&self, listener: Listener<T>) -> Arc<Slot<T>> {
        self.register(listener, false, 0)
    }

    /// Register a listener that detaches itself after its first dispatch.
    pub fn add_once(&self, listener: Listener<T>) -> Arc<Slot<T>> {
        self.register(listener, true, 0)
    }

    /// Register a listener with a dispatch priority. The first non-zero
    /// priority permanently switches the signal to descending-priority
    /// delivery for all registrations.
    pub fn add_with_priority(&self, listener: Listener<T>, priority: i32) -> Arc<Slot<T>> {
        self.register(listener, false, priority)
    }

    /// Register a once-listener with a dispatch priority.
    pub fn add_once_with_priority(&self, listener: Listener<T>, priority: i32) -> Arc<Slot<T>> {
        self.register(listener, true, priority)
    }

    /// Convenience for [`add`](Self::add) that wraps a closure.
    ///
    /// The slot handle is the only way to remove a listener registered this
    /// way, since the `Arc` identity is created here.
    pub fn add_fn(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Arc<Slot<T>> {
        self.add(Arc::new(listener))
    }

    /// Convenience for [`add_once`](Self::add_once) that wraps a closure.
    pub fn add_once_fn(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Arc<Slot<T>> {
        self.add_once(Arc::new(listener))
    }

    fn register(&self, listener: Listener<T>, once: bool, priority: i32) -> Arc<Slot<T>> {
        let addr = listener_addr(&listener);
        self.bank.register(addr, once, priority, || {
            #[cfg(feature = "logging")]
            trace!(
                target: "signalmap",
                payload = std::any::type_name::<T>(),
                once,
                priority,
                "Registering signal listener"
            );
            Arc::new(Slot::new(listener, once, priority, Arc::downgrade(&self.bank)))
        })
    }

    /// Remove a listener. Removing a listener that is not registered is a
    /// silent no-op. Returns the removed slot, if any.
    pub fn remove(&self, listener: &Listener<T>) -> Option<Arc<Slot<T>>> {
        self.bank.remove_addr(listener_addr(listener))
    }

    /// Remove every listener.
    pub fn remove_all(&self) {
        self.bank.clear();
    }

    /// Number of registered listeners.
    pub fn num_listeners(&self) -> usize {
        self.bank.len()
    }

    /// Deliver `value` to every enabled slot, in list order.
    ///
    /// A once-slot is detached from the signal immediately before its
    /// listener runs, so re-entrant dispatch cannot fire it twice. A slot
    /// with bound params receives those instead of `value`.
    pub fn dispatch(&self, value: &T) {
        let snapshot = self.bank.snapshot();
        for slot in snapshot.iter() {
            if !slot.enabled() {
                continue;
            }
            if slot.once() {
                self.bank.remove_addr(slot.listener_addr());
            }
            match slot.params() {
                Some(bound) => (slot.listener())(bound.as_ref()),
                None => (slot.listener())(value),
            }
        }
    }

}

impl<T: Send + Sync + 'static> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("payload", &std::any::type_name::<T>())
            .field("num_listeners", &self.num_listeners())
            .finish()
    }
}
