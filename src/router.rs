//! Signal-to-command routing
//!
//! The router binds a signal (or signal type) to a command type. Each
//! dispatch of the signal becomes one unit of work: a child injection scope
//! is created, the dispatched payload and the dispatching signal are bound
//! into it, a fresh command is constructed and injected from it, the scope is
//! discarded, and the command executes exactly once. The command is dropped
//! afterwards unless it detains itself for asynchronous work.

use crate::binding::downcast_arc_unchecked;
use crate::description::Injectee;
use crate::error::Result;
use crate::injector::Injector;
use crate::signal::Signal;
use crate::slot::Listener;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// A one-shot unit of work, instantiated and injected per signal dispatch.
///
/// The command receives itself as an `Arc` so it can hand a clone to
/// [`CommandRouter::detain`] when its work outlives `execute`.
pub trait Command: Send + Sync + 'static {
    fn execute(self: Arc<Self>);
}

/// A signal the router can map commands onto: a declared payload type plus
/// access to the dispatching [`Signal`].
///
/// Implemented by `Signal<T>` itself and by wrapper types that embed one.
pub trait SignalType: Injectee {
    type Payload: Clone + Send + Sync + 'static;

    fn signal(&self) -> &Signal<Self::Payload>;
}

impl<T: Clone + Send + Sync + 'static> Injectee for Signal<T> {
    fn describe(d: &mut crate::Description<Self>) {
        d.constructor_fn(Signal::new);
    }
}

impl<T: Clone + Send + Sync + 'static> SignalType for Signal<T> {
    type Payload = T;

    fn signal(&self) -> &Signal<T> {
        self
    }
}

/// Type-erased handle to the signal whose dispatch is currently being
/// routed, bound into the command's injection scope alongside the concrete
/// signal type.
#[derive(Clone)]
pub struct DispatchedSignal {
    signal: Arc<dyn Any + Send + Sync>,
}

impl DispatchedSignal {
    fn new<S: Send + Sync + 'static>(signal: Arc<S>) -> Self {
        Self { signal }
    }

    /// The dispatching signal, when it is of type `S`.
    pub fn downcast<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        Arc::clone(&self.signal).downcast::<S>().ok()
    }
}

struct CommandMapping {
    unbind: Box<dyn Fn() + Send + Sync>,
}

struct RouterState {
    injector: Injector,
    /// (signal identity, command type) -> registered listener
    mappings: DashMap<(usize, TypeId), CommandMapping, RandomState>,
    /// shared signal-class instances resolved by `map_signal_class`
    signal_instances: DashMap<TypeId, Arc<dyn Any + Send + Sync>, RandomState>,
    /// commands that opted out of auto-disposal
    detained: DashMap<usize, Arc<dyn Any + Send + Sync>, RandomState>,
}

/// Routes signal dispatches to freshly injected [`Command`] executions.
///
/// `CommandRouter` is a cheap-to-clone handle over shared state, so it can be
/// mapped into its own injector and injected into commands that need to
/// detain themselves.
///
/// # Examples
///
/// ```rust
/// use signalmap::{Command, CommandRouter, Description, Injectee, Injector, Params, Signal};
/// use std::sync::Arc;
///
/// struct Greet {
///     name: Arc<String>,
/// }
///
/// impl Injectee for Greet {
///     fn describe(d: &mut Description<Self>) {
///         d.constructor(Params::new().required::<String>(), |args| Greet {
///             name: args.require::<String>(0),
///         });
///     }
/// }
///
/// impl Command for Greet {
///     fn execute(self: Arc<Self>) {
///         println!("hello, {}", self.name);
///     }
/// }
///
/// let injector = Injector::new();
/// let router = CommandRouter::new(injector);
/// let signal = router.map_signal_class::<Signal<String>, Greet>().unwrap();
/// signal.dispatch(&"world".to_string());
/// ```
#[derive(Clone)]
pub struct CommandRouter {
    state: Arc<RouterState>,
}

impl CommandRouter {
    /// Create a router resolving commands through `injector`.
    pub fn new(injector: Injector) -> Self {
        Self {
            state: Arc::new(RouterState {
                injector,
                mappings: DashMap::with_hasher(RandomState::new()),
                signal_instances: DashMap::with_hasher(RandomState::new()),
                detained: DashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    /// The injector commands are resolved through.
    pub fn injector(&self) -> &Injector {
        &self.state.injector
    }

    /// Route every dispatch of `signal` to a fresh execution of `C`.
    /// Mapping an identical (signal, command) pair again is a silent no-op.
    pub fn map_signal<S, C>(&self, signal: &Arc<S>)
    where
        S: SignalType,
        C: Command + Injectee,
    {
        self.map_signal_with::<S, C>(signal, false);
    }

    /// Like [`map_signal`](Self::map_signal), but the mapping removes itself
    /// after the first routed dispatch.
    pub fn map_signal_once<S, C>(&self, signal: &Arc<S>)
    where
        S: SignalType,
        C: Command + Injectee,
    {
        self.map_signal_with::<S, C>(signal, true);
    }

    fn map_signal_with<S, C>(&self, signal: &Arc<S>, once: bool)
    where
        S: SignalType,
        C: Command + Injectee,
    {
        let key = (signal_addr(signal), TypeId::of::<C>());
        if self.state.mappings.contains_key(&key) {
            return;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "signalmap",
            signal = std::any::type_name::<S>(),
            command = std::any::type_name::<C>(),
            once,
            "Mapping signal to command"
        );

        let listener: Listener<S::Payload> = {
            let state = Arc::downgrade(&self.state);
            let signal = Arc::downgrade(signal);
            Arc::new(move |payload| {
                if let (Some(state), Some(signal)) = (state.upgrade(), signal.upgrade()) {
                    RouterState::route::<S, C>(&state, &signal, payload, once);
                }
            })
        };
        signal.signal().add(Arc::clone(&listener));

        let unbind: Box<dyn Fn() + Send + Sync> = {
            let signal = Arc::downgrade(signal);
            Box::new(move || {
                if let Some(signal) = signal.upgrade() {
                    signal.signal().remove(&listener);
                }
            })
        };
        self.state.mappings.insert(key, CommandMapping { unbind });
    }

    /// Resolve the shared instance of signal type `S` from the container
    /// (constructing, injecting, and mapping it when absent), then map `C`
    /// onto it.
    pub fn map_signal_class<S, C>(&self) -> Result<Arc<S>>
    where
        S: SignalType,
        C: Command + Injectee,
    {
        let signal = self.signal_class_instance::<S>()?;
        self.map_signal::<S, C>(&signal);
        Ok(signal)
    }

    /// Fire-once variant of [`map_signal_class`](Self::map_signal_class).
    pub fn map_signal_class_once<S, C>(&self) -> Result<Arc<S>>
    where
        S: SignalType,
        C: Command + Injectee,
    {
        let signal = self.signal_class_instance::<S>()?;
        self.map_signal_once::<S, C>(&signal);
        Ok(signal)
    }

    fn signal_class_instance<S: SignalType>(&self) -> Result<Arc<S>> {
        if let Some(existing) = self.state.signal_instances.get(&TypeId::of::<S>()) {
            // SAFETY: stored under TypeId::of::<S>() below, so the entry
            // holds an Arc<S>.
            return Ok(unsafe { downcast_arc_unchecked::<S>(Arc::clone(&existing)) });
        }

        let injector = &self.state.injector;
        let signal = if injector.has_mapping::<S>() {
            injector.get_instance::<S>()?
        } else {
            let signal = injector.instantiate::<S>()?;
            injector.map_value::<S>(Arc::clone(&signal));
            signal
        };
        self.state.signal_instances.insert(
            TypeId::of::<S>(),
            Arc::clone(&signal) as Arc<dyn Any + Send + Sync>,
        );
        Ok(signal)
    }

    /// Remove the (signal, command) mapping, detaching the routing listener.
    /// A no-op when the pair is not mapped.
    pub fn unmap_signal<S, C>(&self, signal: &Arc<S>)
    where
        S: SignalType,
        C: Command,
    {
        let key = (signal_addr(signal), TypeId::of::<C>());
        if let Some((_, mapping)) = self.state.mappings.remove(&key) {
            (mapping.unbind)();
        }
    }

    /// Remove the (signal type, command) mapping. When no commands remain
    /// mapped on the signal, its container binding and shared instance are
    /// dropped too.
    pub fn unmap_signal_class<S, C>(&self)
    where
        S: SignalType,
        C: Command,
    {
        let Some(entry) = self.state.signal_instances.get(&TypeId::of::<S>()) else {
            return;
        };
        // SAFETY: stored under TypeId::of::<S>().
        let signal = unsafe { downcast_arc_unchecked::<S>(Arc::clone(&entry)) };
        drop(entry);

        self.unmap_signal::<S, C>(&signal);
        if !self.has_command(signal_addr(&signal)) {
            let _ = self.state.injector.unmap::<S>();
            self.state.signal_instances.remove(&TypeId::of::<S>());
        }
    }

    /// Whether `C` is mapped on `signal`.
    pub fn has_signal_command<S, C>(&self, signal: &Arc<S>) -> bool
    where
        S: SignalType,
        C: Command,
    {
        self.state
            .mappings
            .contains_key(&(signal_addr(signal), TypeId::of::<C>()))
    }

    fn has_command(&self, signal_addr: usize) -> bool {
        self.state
            .mappings
            .iter()
            .any(|entry| entry.key().0 == signal_addr)
    }

    /// Keep a command alive past its execution, until [`release`]d.
    ///
    /// [`release`]: Self::release
    pub fn detain<C: Send + Sync + 'static>(&self, command: Arc<C>) {
        let addr = Arc::as_ptr(&command) as usize;
        self.state
            .detained
            .insert(addr, command as Arc<dyn Any + Send + Sync>);
    }

    /// Drop a previously detained command. Returns whether it was detained.
    pub fn release<C: Send + Sync + 'static>(&self, command: &Arc<C>) -> bool {
        let addr = Arc::as_ptr(command) as usize;
        self.state.detained.remove(&addr).is_some()
    }
}

impl RouterState {
    fn route<S, C>(state: &Arc<RouterState>, signal: &Arc<S>, payload: &S::Payload, once: bool)
    where
        S: SignalType,
        C: Command + Injectee,
    {
        #[cfg(feature = "logging")]
        trace!(
            target: "signalmap",
            signal = std::any::type_name::<S>(),
            command = std::any::type_name::<C>(),
            "Routing signal dispatch to command"
        );

        let scope = state.injector.create_child_injector();
        scope.map_value::<S::Payload>(payload.clone());
        scope.map_value::<S>(Arc::clone(signal));
        scope.map_value::<DispatchedSignal>(DispatchedSignal::new(Arc::clone(signal)));

        let command: Arc<C> = match scope.instantiate::<C>() {
            Ok(command) => command,
            Err(err) => panic!(
                "failed to route signal to command {}: {err}",
                std::any::type_name::<C>()
            ),
        };
        // the temporary bindings end with the scope
        drop(scope);

        let addr = Arc::as_ptr(&command) as usize;
        Arc::clone(&command).execute();
        state.injector.evict_processed(addr);

        if once {
            if let Some((_, mapping)) = state
                .mappings
                .remove(&(signal_addr(signal), TypeId::of::<C>()))
            {
                (mapping.unbind)();
            }
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("mappings", &self.state.mappings.len())
            .field("detained", &self.state.detained.len())
            .finish()
    }
}

#[inline]
fn signal_addr<S>(signal: &Arc<S>) -> usize {
    Arc::as_ptr(signal) as *const () as usize
}
