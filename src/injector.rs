//! Scoped dependency-injection container
//!
//! An [`Injector`] owns a binding table and a cache of injection-point
//! descriptions, and holds a reference to an optional parent scope. A request
//! resolves against the nearest scope that has its own result for the key;
//! an unset or cleared local binding transparently falls back to ancestors.

use crate::binding::{
    downcast_arc_unchecked, BindingConfig, BindingKey, InjectResult, Provider, Rule, SingletonCell,
};
use crate::description::{ErasedDescription, Injectee};
use crate::error::{InjectError, Result};
use ahash::RandomState;
use dashmap::{DashMap, DashSet};
use std::any::{Any, TypeId};
use std::sync::{Arc, RwLock};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Set of instance addresses that already received member injection.
///
/// Shared by reference across an attached scope chain, so processing an
/// object through a child scope is visible to the parent and vice versa.
pub(crate) struct InjecteeSet {
    addrs: DashSet<usize, RandomState>,
}

impl InjecteeSet {
    fn new() -> Self {
        Self {
            addrs: DashSet::with_hasher(RandomState::new()),
        }
    }

    fn add(&self, addr: usize) {
        self.addrs.insert(addr);
    }

    fn contains(&self, addr: usize) -> bool {
        self.addrs.contains(&addr)
    }

    fn remove(&self, addr: usize) {
        self.addrs.remove(&addr);
    }
}

struct InjectorState {
    bindings: DashMap<BindingKey, Arc<BindingConfig>, RandomState>,
    descriptions: DashMap<TypeId, Arc<ErasedDescription>, RandomState>,
    parent: RwLock<Option<Injector>>,
    injected: RwLock<Arc<InjecteeSet>>,
}

/// Scoped binding registry: resolves, constructs, and injects, consulting
/// ancestor scopes outward.
///
/// `Injector` is a cheap-to-clone handle over shared state.
///
/// # Examples
///
/// ```rust
/// use signalmap::Injector;
///
/// struct Config {
///     debug: bool,
/// }
///
/// let injector = Injector::new();
/// injector.map_value(Config { debug: true });
///
/// let config = injector.get_instance::<Config>().unwrap();
/// assert!(config.debug);
/// ```
pub struct Injector {
    state: Arc<InjectorState>,
}

impl Clone for Injector {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Injector {
    /// Create a new root injector.
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "signalmap", "Creating root injector");

        Self {
            state: Arc::new(InjectorState {
                bindings: DashMap::with_hasher(RandomState::new()),
                descriptions: DashMap::with_hasher(RandomState::new()),
                parent: RwLock::new(None),
                injected: RwLock::new(Arc::new(InjecteeSet::new())),
            }),
        }
    }

    /// Create a child scope with an empty binding table that defers to this
    /// injector for anything it has not mapped itself.
    pub fn create_child_injector(&self) -> Injector {
        let child = Injector::new();
        child.set_parent(Some(self));

        #[cfg(feature = "logging")]
        debug!(
            target: "signalmap",
            parent_depth = self.depth(),
            "Creating child injector"
        );

        child
    }

    /// Re-parent this injector. Attaching shares the parent's
    /// processed-marker set; detaching (re-parenting to none) gives this
    /// injector a fresh, empty set.
    pub fn set_parent(&self, parent: Option<&Injector>) {
        let mut slot = self.state.parent.write().unwrap();
        match parent {
            Some(parent) => {
                *slot = Some(parent.clone());
                *self.state.injected.write().unwrap() = parent.injected_set();
            }
            None => {
                if slot.is_some() {
                    *self.state.injected.write().unwrap() = Arc::new(InjecteeSet::new());
                }
                *slot = None;
            }
        }
    }

    fn parent(&self) -> Option<Injector> {
        self.state.parent.read().unwrap().clone()
    }

    /// Scope depth, counting ancestors (0 = root).
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(injector) = current {
            depth += 1;
            current = injector.parent();
        }
        depth
    }

    fn injected_set(&self) -> Arc<InjecteeSet> {
        self.state.injected.read().unwrap().clone()
    }

    pub(crate) fn mark_processed(&self, addr: usize) {
        self.injected_set().add(addr);
    }

    pub(crate) fn is_processed(&self, addr: usize) -> bool {
        self.injected_set().contains(addr)
    }

    /// Drop an instance from the processed-marker set so the address can be
    /// reused.
    pub(crate) fn evict_processed(&self, addr: usize) {
        self.injected_set().remove(addr);
    }

    // =========================================================================
    // Mapping
    // =========================================================================

    /// Map requests for `T` to a fixed instance.
    pub fn map_value<T: Send + Sync + 'static>(&self, value: impl Into<Arc<T>>) -> Rule<T> {
        self.map_value_named(value, "")
    }

    /// Map named requests for `T` to a fixed instance.
    pub fn map_value_named<T: Send + Sync + 'static>(
        &self,
        value: impl Into<Arc<T>>,
        name: &str,
    ) -> Rule<T> {
        self.log_mapping::<T>("value", name);
        let config = self.own_config::<T>(name);
        config.set_result(Some(InjectResult::Value(
            value.into() as Arc<dyn Any + Send + Sync>
        )));
        Rule::new(config)
    }

    /// Map requests for `C` to a fresh, fully injected instance per
    /// resolution. Nothing is cached.
    pub fn map_class<C: Injectee>(&self) -> Rule<C> {
        self.map_class_of::<C, C>()
    }

    /// Map named requests for `C` to a fresh instance per resolution.
    pub fn map_class_named<C: Injectee>(&self, name: &str) -> Rule<C> {
        self.map_class_of_named::<C, C>(name)
    }

    /// Map requests for `R` to a fresh instance of `C`, converted into `R`.
    pub fn map_class_of<R, C>(&self) -> Rule<R>
    where
        R: Send + Sync + 'static,
        C: Injectee + Into<R>,
    {
        self.map_class_of_named::<R, C>("")
    }

    /// Named variant of [`map_class_of`](Self::map_class_of).
    pub fn map_class_of_named<R, C>(&self, name: &str) -> Rule<R>
    where
        R: Send + Sync + 'static,
        C: Injectee + Into<R>,
    {
        self.log_mapping::<R>("class", name);
        let config = self.own_config::<R>(name);
        config.set_result(Some(InjectResult::Class(provider::<R, C>())));
        Rule::new(config)
    }

    /// Map requests for `C` to a single shared instance, constructed and
    /// member-injected on first resolution.
    pub fn map_singleton<C: Injectee>(&self) -> Rule<C> {
        self.map_singleton_of::<C, C>()
    }

    /// Map named requests for `C` to a single shared instance.
    pub fn map_singleton_named<C: Injectee>(&self, name: &str) -> Rule<C> {
        self.map_singleton_of_named::<C, C>(name)
    }

    /// Map requests for `R` to a single shared instance of `C`, converted
    /// into `R` after construction and member injection.
    pub fn map_singleton_of<R, C>(&self) -> Rule<R>
    where
        R: Send + Sync + 'static,
        C: Injectee + Into<R>,
    {
        self.map_singleton_of_named::<R, C>("")
    }

    /// Named variant of [`map_singleton_of`](Self::map_singleton_of).
    pub fn map_singleton_of_named<R, C>(&self, name: &str) -> Rule<R>
    where
        R: Send + Sync + 'static,
        C: Injectee + Into<R>,
    {
        self.log_mapping::<R>("singleton", name);
        let config = self.own_config::<R>(name);
        config.set_result(Some(InjectResult::Singleton(Arc::new(SingletonCell::new(
            provider::<R, C>(),
        )))));
        Rule::new(config)
    }

    /// Alias requests for `T` to another binding of the same type.
    pub fn map_rule<T: Send + Sync + 'static>(&self, rule: &Rule<T>) -> Rule<T> {
        self.map_rule_named(rule, "")
    }

    /// Alias named requests for `T` to another binding of the same type.
    pub fn map_rule_named<T: Send + Sync + 'static>(&self, rule: &Rule<T>, name: &str) -> Rule<T> {
        self.log_mapping::<T>("rule", name);
        let config = self.own_config::<T>(name);
        config.set_result(Some(InjectResult::Rule(Arc::clone(&rule.config))));
        rule.clone()
    }

    /// Clear this scope's own result for `T`, letting any ancestor binding
    /// show through again.
    pub fn unmap<T: Send + Sync + 'static>(&self) -> Result<()> {
        self.unmap_named::<T>("")
    }

    /// Named variant of [`unmap`](Self::unmap).
    pub fn unmap_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<()> {
        let key = BindingKey::new(TypeId::of::<T>(), name);
        match self.state.bindings.get(&key) {
            Some(config) if config.has_own_result() => {
                config.set_result(None);
                Ok(())
            }
            _ => Err(InjectError::unmap_missing::<T>(name)),
        }
    }

    /// Whether any scope in the chain has a result for `T`.
    pub fn has_mapping<T: Send + Sync + 'static>(&self) -> bool {
        self.has_mapping_named::<T>("")
    }

    /// Named variant of [`has_mapping`](Self::has_mapping).
    pub fn has_mapping_named<T: Send + Sync + 'static>(&self, name: &str) -> bool {
        self.find_config(&BindingKey::new(TypeId::of::<T>(), name))
            .is_some()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `T` through the scope chain.
    pub fn get_instance<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_instance_named("")
    }

    /// Resolve a named `T` through the scope chain.
    pub fn get_instance_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        match self.resolve_request(TypeId::of::<T>(), name)? {
            // SAFETY: the request was keyed by TypeId::of::<T>(), so the
            // binding that answered it stores a value of type T.
            Some(value) => Ok(unsafe { downcast_arc_unchecked::<T>(value) }),
            None => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "signalmap",
                    request = std::any::type_name::<T>(),
                    name,
                    depth = self.depth(),
                    "No mapping found in scope chain"
                );
                Err(InjectError::missing_mapping::<T>(name))
            }
        }
    }

    /// Resolve `T`, returning `None` when it cannot be produced.
    pub fn try_get_instance<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get_instance::<T>().ok()
    }

    /// Named variant of [`try_get_instance`](Self::try_get_instance).
    pub fn try_get_instance_named<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.get_instance_named::<T>(name).ok()
    }

    /// Resolve a request key against the nearest scope with its own result.
    /// `Ok(None)` means no scope in the chain has one.
    pub(crate) fn resolve_request(
        &self,
        type_id: TypeId,
        name: &str,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let key = BindingKey::new(type_id, name);
        match self.find_config(&key) {
            // the requesting scope, not the owning scope, resolves the
            // result's own dependencies
            Some(config) => config.respond(self),
            None => Ok(None),
        }
    }

    fn find_config(&self, key: &BindingKey) -> Option<Arc<BindingConfig>> {
        let mut current = Some(self.clone());
        #[cfg(feature = "logging")]
        let mut hops = 0u32;
        while let Some(injector) = current {
            if let Some(config) = injector.state.bindings.get(key) {
                if config.has_own_result() {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "signalmap",
                        hops,
                        "Request resolved by scope chain"
                    );
                    return Some(Arc::clone(&config));
                }
            }
            current = injector.parent();
            #[cfg(feature = "logging")]
            {
                hops += 1;
            }
        }
        None
    }

    fn own_config<T: ?Sized + 'static>(&self, name: &str) -> Arc<BindingConfig> {
        let key = BindingKey::new(TypeId::of::<T>(), name);
        self.state
            .bindings
            .entry(key)
            .or_insert_with(|| {
                Arc::new(BindingConfig::new(std::any::type_name::<T>(), name))
            })
            .clone()
    }

    // =========================================================================
    // Construction and member injection
    // =========================================================================

    /// Build an instance of `T` through its constructor point only; member
    /// points are not applied and the instance is not marked processed.
    pub fn construct<T: Injectee>(&self) -> Result<T> {
        let description = self.description::<T>();
        let boxed = description.construct(self)?;
        let boxed = boxed
            .downcast::<T>()
            .expect("constructor point built a value of a different type");
        Ok(*boxed)
    }

    /// Build an instance of `T`, apply its member points, and mark it
    /// processed.
    pub fn instantiate<T: Injectee>(&self) -> Result<Arc<T>> {
        self.provide::<T, T>()
    }

    /// Apply `T`'s member points to an existing target. A no-op when the
    /// target is already marked processed anywhere in the attached scope
    /// chain.
    pub fn inject_into<T: Injectee>(&self, target: &mut T) -> Result<()> {
        let addr = target as *mut T as usize;
        if self.is_processed(addr) {
            #[cfg(feature = "logging")]
            trace!(
                target: "signalmap",
                injectee = std::any::type_name::<T>(),
                "Target already processed, skipping member injection"
            );
            return Ok(());
        }
        self.mark_processed(addr);
        let description = self.description::<T>();
        description.apply_members(target, self)
    }

    /// Construct a `C`, apply its member points, convert it into `R`, and
    /// mark the shared instance processed.
    pub(crate) fn provide<R, C>(&self) -> Result<Arc<R>>
    where
        R: Send + Sync + 'static,
        C: Injectee + Into<R>,
    {
        let description = self.description::<C>();
        let boxed = description.construct(self)?;
        let mut concrete = *boxed
            .downcast::<C>()
            .expect("constructor point built a value of a different type");
        description.apply_members(&mut concrete, self)?;
        let instance = Arc::new(concrete.into());
        self.mark_processed(Arc::as_ptr(&instance) as usize);

        #[cfg(feature = "logging")]
        trace!(
            target: "signalmap",
            injectee = std::any::type_name::<C>(),
            depth = self.depth(),
            "Constructed and injected instance"
        );

        Ok(instance)
    }

    /// The cached description for `T`, computed on first use.
    fn description<T: Injectee>(&self) -> Arc<ErasedDescription> {
        if let Some(found) = self.state.descriptions.get(&TypeId::of::<T>()) {
            return Arc::clone(&found);
        }
        // built outside the table entry so describe() may use this injector
        let built = Arc::new(ErasedDescription::build::<T>());
        self.state
            .descriptions
            .entry(TypeId::of::<T>())
            .or_insert(built)
            .clone()
    }

    #[allow(unused_variables)]
    fn log_mapping<T: ?Sized + 'static>(&self, kind: &'static str, name: &str) {
        #[cfg(feature = "logging")]
        debug!(
            target: "signalmap",
            request = std::any::type_name::<T>(),
            kind,
            name,
            depth = self.depth(),
            "Registering mapping"
        );
    }
}

fn provider<R, C>() -> Provider
where
    R: Send + Sync + 'static,
    C: Injectee + Into<R>,
{
    Arc::new(|injector: &Injector| {
        injector
            .provide::<R, C>()
            .map(|instance| instance as Arc<dyn Any + Send + Sync>)
    })
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("bindings", &self.state.bindings.len())
            .field("depth", &self.depth())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{Description, Params};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    struct Service {
        config: Option<Arc<Config>>,
        init_calls: Arc<AtomicU32>,
    }

    impl Injectee for Service {
        fn describe(d: &mut Description<Self>) {
            d.constructor_fn(|| Service {
                config: None,
                init_calls: Arc::new(AtomicU32::new(0)),
            });
            d.property("config", |target, config: Arc<Config>| {
                target.config = Some(config);
            });
            d.post_construct(0, |target| {
                target.init_calls.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    #[test]
    fn map_value_resolves_the_same_instance() {
        let injector = Injector::new();
        injector.map_value(Config { url: "prod".into() });

        let a = injector.get_instance::<Config>().unwrap();
        let b = injector.get_instance::<Config>().unwrap();
        assert_eq!(a.url, "prod");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_mapping_is_a_typed_error() {
        let injector = Injector::new();
        let err = injector.get_instance::<Config>().unwrap_err();
        assert!(matches!(err, InjectError::MissingMapping { .. }));
        assert!(injector.try_get_instance::<Config>().is_none());
    }

    #[test]
    fn named_mappings_are_distinct() {
        let injector = Injector::new();
        injector.map_value_named(Config { url: "a".into() }, "a");
        injector.map_value_named(Config { url: "b".into() }, "b");

        assert_eq!(injector.get_instance_named::<Config>("a").unwrap().url, "a");
        assert_eq!(injector.get_instance_named::<Config>("b").unwrap().url, "b");
        assert!(injector.get_instance::<Config>().is_err());
    }

    #[test]
    fn map_class_builds_fresh_injected_instances() {
        let injector = Injector::new();
        injector.map_value(Config { url: "x".into() });
        injector.map_class::<Service>();

        let a = injector.get_instance::<Service>().unwrap();
        let b = injector.get_instance::<Service>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(a.config.is_some());
        assert_eq!(a.init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn map_singleton_caches_the_first_resolution() {
        let injector = Injector::new();
        injector.map_value(Config { url: "x".into() });
        injector.map_singleton::<Service>();

        let a = injector.get_instance::<Service>().unwrap();
        let b = injector.get_instance::<Service>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn singleton_is_shared_between_root_and_child() {
        let root = Injector::new();
        root.map_value(Config { url: "x".into() });
        root.map_singleton::<Service>();

        let child = root.create_child_injector();
        let from_child = child.get_instance::<Service>().unwrap();
        let from_root = root.get_instance::<Service>().unwrap();
        assert!(Arc::ptr_eq(&from_child, &from_root));
    }

    #[test]
    fn local_binding_shadows_ancestor_until_unmapped() {
        let root = Injector::new();
        let mid = root.create_child_injector();
        let leaf = mid.create_child_injector();

        root.map_value(Config { url: "root".into() });
        assert_eq!(leaf.get_instance::<Config>().unwrap().url, "root");

        mid.map_value(Config { url: "mid".into() });
        assert_eq!(leaf.get_instance::<Config>().unwrap().url, "mid");

        mid.unmap::<Config>().unwrap();
        assert_eq!(leaf.get_instance::<Config>().unwrap().url, "root");
    }

    #[test]
    fn unmap_without_own_result_errors() {
        let root = Injector::new();
        root.map_value(Config { url: "root".into() });
        let child = root.create_child_injector();

        // visible from the child, but not the child's own result
        assert!(child.has_mapping::<Config>());
        assert!(matches!(
            child.unmap::<Config>(),
            Err(InjectError::UnmapMissing { .. })
        ));
    }

    #[test]
    fn child_bindings_are_invisible_to_the_parent() {
        let root = Injector::new();
        let child = root.create_child_injector();
        child.map_value(Config { url: "child".into() });

        assert!(child.has_mapping::<Config>());
        assert!(!root.has_mapping::<Config>());
    }

    #[test]
    fn inject_into_applies_member_points_once() {
        let injector = Injector::new();
        injector.map_value(Config { url: "x".into() });

        let mut service = injector.construct::<Service>().unwrap();
        assert!(service.config.is_none());

        injector.inject_into(&mut service).unwrap();
        injector.inject_into(&mut service).unwrap();
        assert!(service.config.is_some());
        assert_eq!(service.init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn processed_markers_are_shared_across_the_chain() {
        let root = Injector::new();
        root.map_value(Config { url: "x".into() });
        let child = root.create_child_injector();

        let mut service = root.construct::<Service>().unwrap();
        child.inject_into(&mut service).unwrap();
        // the parent sees the child's marker
        root.inject_into(&mut service).unwrap();
        assert_eq!(service.init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detaching_resets_the_marker_set() {
        let root = Injector::new();
        root.map_value(Config { url: "x".into() });
        let child = root.create_child_injector();

        let mut service = root.construct::<Service>().unwrap();
        child.inject_into(&mut service).unwrap();

        child.set_parent(None);
        child.map_value(Config { url: "y".into() });
        // fresh set: the same target is injected again
        child.inject_into(&mut service).unwrap();
        assert_eq!(service.init_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_rule_aliases_a_named_binding() {
        let injector = Injector::new();
        let rule = injector.map_value_named(Config { url: "shared".into() }, "primary");
        injector.map_rule(&rule);

        let unnamed = injector.get_instance::<Config>().unwrap();
        let named = injector.get_instance_named::<Config>("primary").unwrap();
        assert!(Arc::ptr_eq(&unnamed, &named));
    }

    #[test]
    fn constructor_params_resolve_positionally() {
        struct Indexed {
            count: Arc<u32>,
            label: Option<Arc<String>>,
        }

        impl Injectee for Indexed {
            fn describe(d: &mut Description<Self>) {
                d.constructor(
                    Params::new().required::<u32>().optional::<String>(),
                    |args| Indexed {
                        count: args.require::<u32>(0),
                        label: args.get::<String>(1),
                    },
                );
            }
        }

        let injector = Injector::new();
        injector.map_value(3u32);

        let partial = injector.instantiate::<Indexed>().unwrap();
        assert_eq!(*partial.count, 3);
        assert!(partial.label.is_none());

        injector.map_value::<String>("hello".to_string());
        let full = injector.instantiate::<Indexed>().unwrap();
        assert_eq!(full.label.as_deref().map(String::as_str), Some("hello"));
    }

    #[test]
    fn missing_required_parameter_names_the_position() {
        #[derive(Debug)]
        struct Needy {
            _count: Arc<u32>,
        }

        impl Injectee for Needy {
            fn describe(d: &mut Description<Self>) {
                d.constructor(Params::new().required::<u32>(), |args| Needy {
                    _count: args.require::<u32>(0),
                });
            }
        }

        let injector = Injector::new();
        let err = injector.construct::<Needy>().unwrap_err();
        match err {
            InjectError::MissingDependency { site, .. } => {
                assert_eq!(site.to_string(), "method \"new\", parameter 1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn descriptions_are_computed_once_per_injector() {
        static DESCRIBES: AtomicU32 = AtomicU32::new(0);

        struct Counted;

        impl Injectee for Counted {
            fn describe(d: &mut Description<Self>) {
                DESCRIBES.fetch_add(1, Ordering::SeqCst);
                d.constructor_fn(|| Counted);
            }
        }

        let injector = Injector::new();
        let before = DESCRIBES.load(Ordering::SeqCst);
        injector.instantiate::<Counted>().unwrap();
        injector.instantiate::<Counted>().unwrap();
        injector.construct::<Counted>().unwrap();
        assert_eq!(DESCRIBES.load(Ordering::SeqCst), before + 1);
    }
}
