//! # signalmap — signals, scoped injection, and command routing
//!
//! The application-framework core of a signal-driven MVC stack:
//!
//! - 📡 **Signals** — ordered multicast dispatch with priorities, once
//!   listeners, listener currying, and an event-flavoured variant with
//!   bubbling and kind filters
//! - 🧩 **Injector** — a hierarchical dependency-injection container with
//!   value/class/singleton/rule bindings, named requests, and cached
//!   per-type injection-point descriptions
//! - 🚦 **Command router** — turns a signal dispatch into a freshly
//!   constructed, injected, executed, and auto-disposed command
//!
//! ## Quick start
//!
//! ```rust
//! use signalmap::{Command, CommandRouter, Description, Injectee, Injector, Params, Signal};
//! use std::sync::{Arc, Mutex};
//!
//! // a model shared through the container
//! #[derive(Default)]
//! struct GalleryModel {
//!     photos: Mutex<Vec<String>>,
//! }
//!
//! // a one-shot unit of work, built fresh per dispatch
//! struct UpdateGallery {
//!     term: Arc<String>,
//!     gallery: Arc<GalleryModel>,
//! }
//!
//! impl Injectee for UpdateGallery {
//!     fn describe(d: &mut Description<Self>) {
//!         d.constructor(
//!             Params::new().required::<String>().required::<GalleryModel>(),
//!             |args| UpdateGallery {
//!                 term: args.require::<String>(0),
//!                 gallery: args.require::<GalleryModel>(1),
//!             },
//!         );
//!     }
//! }
//!
//! impl Command for UpdateGallery {
//!     fn execute(self: Arc<Self>) {
//!         self.gallery.photos.lock().unwrap().push((*self.term).clone());
//!     }
//! }
//!
//! let injector = Injector::new();
//! injector.map_singleton::<GalleryModel>();
//!
//! let router = CommandRouter::new(injector.clone());
//! let search = router
//!     .map_signal_class::<Signal<String>, UpdateGallery>()
//!     .unwrap();
//!
//! // a UI event dispatches the signal; the router does the rest
//! search.dispatch(&"cats".to_string());
//!
//! let gallery = injector.get_instance::<GalleryModel>().unwrap();
//! assert_eq!(*gallery.photos.lock().unwrap(), ["cats"]);
//! # impl Injectee for GalleryModel {
//! #     fn describe(d: &mut Description<Self>) {
//! #         d.constructor_fn(GalleryModel::default);
//! #     }
//! # }
//! ```
//!
//! ## Scoped containers
//!
//! ```rust
//! use signalmap::Injector;
//!
//! struct Config {
//!     url: String,
//! }
//!
//! let root = Injector::new();
//! root.map_value(Config { url: "prod".into() });
//!
//! let child = root.create_child_injector();
//! // the child sees root bindings until it shadows them
//! assert_eq!(child.get_instance::<Config>().unwrap().url, "prod");
//!
//! child.map_value(Config { url: "test".into() });
//! assert_eq!(child.get_instance::<Config>().unwrap().url, "test");
//! assert_eq!(root.get_instance::<Config>().unwrap().url, "prod");
//! ```

mod binding;
mod description;
mod error;
mod event;
mod injector;
#[cfg(feature = "logging")]
pub mod logging;
mod router;
mod signal;
mod slot;

pub use binding::Rule;
pub use description::{Args, Description, Injectee, Params};
pub use error::{InjectError, InjectSite, Result};
pub use event::{Event, EventDispatcher, EventKind, EventListener, EventSignal, EventSlot};
pub use injector::Injector;
pub use router::{Command, CommandRouter, DispatchedSignal, SignalType};
pub use signal::Signal;
pub use slot::{AnySlot, Listener, Slot, SlotIter, SlotList};

// Re-export tracing macros for convenience when the logging feature is on
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Args, Command, CommandRouter, Description, DispatchedSignal, Event, EventDispatcher,
        EventKind, EventSignal, InjectError, Injectee, Injector, Listener, Params, Result, Rule,
        Signal, SignalType, Slot,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // A trimmed-down gallery wiring: a search signal routed to a command
    // that updates a model and notifies a result signal.

    #[derive(Default)]
    struct GalleryModel {
        photos: Mutex<Vec<String>>,
    }

    impl Injectee for GalleryModel {
        fn describe(d: &mut Description<Self>) {
            d.constructor_fn(GalleryModel::default);
        }
    }

    struct GalleryUpdated;

    struct UpdateGallery {
        term: Arc<String>,
        gallery: Arc<GalleryModel>,
        updated: Arc<Signal<usize>>,
    }

    impl Injectee for UpdateGallery {
        fn describe(d: &mut Description<Self>) {
            d.constructor(
                Params::new().required::<String>().required::<GalleryModel>(),
                |args| UpdateGallery {
                    term: args.require::<String>(0),
                    gallery: args.require::<GalleryModel>(1),
                    updated: Arc::new(Signal::new()),
                },
            );
            d.property("updated", |target, updated: Arc<Signal<usize>>| {
                target.updated = updated;
            });
        }
    }

    impl Command for UpdateGallery {
        fn execute(self: Arc<Self>) {
            let mut photos = self.gallery.photos.lock().unwrap();
            photos.push((*self.term).clone());
            self.updated.dispatch(&photos.len());
        }
    }

    fn gallery_setup() -> (Injector, CommandRouter, Arc<Signal<usize>>) {
        let injector = Injector::new();
        injector.map_singleton::<GalleryModel>();
        let updated = Arc::new(Signal::<usize>::new());
        injector.map_value::<Signal<usize>>(Arc::clone(&updated));
        let router = CommandRouter::new(injector.clone());
        (injector, router, updated)
    }

    #[test]
    fn search_dispatch_runs_an_injected_command() {
        let (injector, router, updated) = gallery_setup();
        let search = router
            .map_signal_class::<Signal<String>, UpdateGallery>()
            .unwrap();

        let sizes = Arc::new(Mutex::new(Vec::new()));
        {
            let sizes = Arc::clone(&sizes);
            updated.add_fn(move |n| sizes.lock().unwrap().push(*n));
        }

        search.signal().dispatch(&"cats".to_string());
        search.signal().dispatch(&"dogs".to_string());

        let gallery = injector.get_instance::<GalleryModel>().unwrap();
        assert_eq!(*gallery.photos.lock().unwrap(), ["cats", "dogs"]);
        assert_eq!(*sizes.lock().unwrap(), [1, 2]);

        // the dispatched payload was only bound for the routing scope
        assert!(matches!(
            injector.get_instance::<String>(),
            Err(InjectError::MissingMapping { .. })
        ));
    }

    #[test]
    fn commands_may_dispatch_further_routed_signals() {
        struct CountUpdates {
            count: Arc<AtomicU32>,
        }

        impl Injectee for CountUpdates {
            fn describe(d: &mut Description<Self>) {
                d.constructor(Params::new().required::<AtomicU32>(), |args| CountUpdates {
                    count: args.require::<AtomicU32>(0),
                });
            }
        }

        impl Command for CountUpdates {
            fn execute(self: Arc<Self>) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_injector, router, updated) = gallery_setup();
        let count = Arc::new(AtomicU32::new(0));
        router.injector().map_value::<AtomicU32>(Arc::clone(&count));

        let search = router
            .map_signal_class::<Signal<String>, UpdateGallery>()
            .unwrap();
        // the command's `updated` dispatch is itself routed to a command
        router.map_signal::<Signal<usize>, CountUpdates>(&updated);

        search.signal().dispatch(&"cats".to_string());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn singleton_identity_spans_the_scope_chain() {
        let root = Injector::new();
        root.map_singleton::<GalleryModel>();

        let child = root.create_child_injector();
        let from_child = child.get_instance::<GalleryModel>().unwrap();
        let from_root = root.get_instance::<GalleryModel>().unwrap();

        assert!(Arc::ptr_eq(&from_child, &from_root));
    }

    #[test]
    fn root_binding_reachable_from_leaf_unless_shadowed() {
        let root = Injector::new();
        let mid = root.create_child_injector();
        let leaf = mid.create_child_injector();

        root.map_value::<String>("root".to_string());
        assert_eq!(*leaf.get_instance::<String>().unwrap(), "root");

        mid.map_value::<String>("mid".to_string());
        assert_eq!(*leaf.get_instance::<String>().unwrap(), "mid");

        mid.unmap::<String>().unwrap();
        assert_eq!(*leaf.get_instance::<String>().unwrap(), "root");
    }

    #[test]
    fn gallery_updated_marker_type_is_unused_without_mapping() {
        // resolving a never-mapped type is a typed absence, not a panic
        let injector = Injector::new();
        assert!(injector.try_get_instance::<GalleryUpdated>().is_none());
    }
}
