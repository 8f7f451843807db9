//! Binding configuration and resolution results
//!
//! A binding associates a request key (type plus optional name) with at most
//! one result. Results are an enum rather than trait objects: a fixed value,
//! a class (fresh instance per resolution), a singleton (constructed once,
//! then cached), or a rule aliasing another binding.

use crate::error::Result;
use crate::injector::Injector;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

#[cfg(feature = "logging")]
use tracing::warn;

/// Downcast an `Arc<dyn Any + Send + Sync>` to `Arc<T>` without a runtime
/// type check.
///
/// # Safety
///
/// The caller must have verified the type through other means. In this crate
/// that holds because bindings are keyed by `TypeId::of::<T>()` at mapping
/// time, resolution looks up by the same `TypeId`, and every `map_*` call
/// site ties the stored value's type to the key's type (rule aliases carry
/// the type in `Rule<T>`).
#[inline]
pub(crate) unsafe fn downcast_arc_unchecked<T: Send + Sync + 'static>(
    arc: Arc<dyn Any + Send + Sync>,
) -> Arc<T> {
    let ptr = Arc::into_raw(arc);
    // SAFETY: ptr came from Arc::into_raw and the caller guarantees the
    // allocation holds a T.
    unsafe { Arc::from_raw(ptr as *const T) }
}

/// Request key: the requested type plus an optional binding name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct BindingKey {
    pub type_id: TypeId,
    pub name: String,
}

impl BindingKey {
    pub fn new(type_id: TypeId, name: &str) -> Self {
        Self {
            type_id,
            name: name.to_owned(),
        }
    }
}

/// Produces a resolved value on demand; captured at mapping time with the
/// concrete type baked in.
pub(crate) type Provider = Arc<dyn Fn(&Injector) -> Result<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Cache cell for a singleton result.
pub(crate) struct SingletonCell {
    provide: Provider,
    cell: OnceCell<Arc<dyn Any + Send + Sync>>,
}

impl SingletonCell {
    pub fn new(provide: Provider) -> Self {
        Self {
            provide,
            cell: OnceCell::new(),
        }
    }

    fn respond(&self, injector: &Injector) -> Result<Arc<dyn Any + Send + Sync>> {
        self.cell
            .get_or_try_init(|| (self.provide)(injector))
            .map(Arc::clone)
    }
}

/// The strategy a binding uses to produce values.
#[derive(Clone)]
pub(crate) enum InjectResult {
    /// A fixed instance
    Value(Arc<dyn Any + Send + Sync>),
    /// A fresh, fully injected instance per resolution
    Class(Provider),
    /// Constructed and injected once on first resolution, then cached
    Singleton(Arc<SingletonCell>),
    /// Delegate to another binding
    Rule(Arc<BindingConfig>),
}

impl InjectResult {
    fn kind(&self) -> &'static str {
        match self {
            InjectResult::Value(_) => "value",
            InjectResult::Class(_) => "class",
            InjectResult::Singleton(_) => "singleton",
            InjectResult::Rule(_) => "rule",
        }
    }
}

/// One binding: the request key and at most one result.
pub(crate) struct BindingConfig {
    type_name: &'static str,
    name: String,
    result: RwLock<Option<InjectResult>>,
}

impl BindingConfig {
    pub fn new(type_name: &'static str, name: &str) -> Self {
        Self {
            type_name,
            name: name.to_owned(),
            result: RwLock::new(None),
        }
    }

    /// Whether this binding has its own result (as opposed to deferring to
    /// an ancestor scope).
    pub fn has_own_result(&self) -> bool {
        self.result.read().unwrap().is_some()
    }

    /// Replace the result. Overwriting an existing result is reported and
    /// the last write wins; `unmap` first to silence the report.
    pub fn set_result(&self, result: Option<InjectResult>) {
        let mut slot = self.result.write().unwrap();
        if let (Some(existing), Some(replacement)) = (slot.as_ref(), result.as_ref()) {
            #[cfg(feature = "logging")]
            warn!(
                target: "signalmap",
                request = self.type_name,
                name = %self.name,
                existing = existing.kind(),
                replacement = replacement.kind(),
                "Overwriting an existing mapping; unmap() first to replace it silently"
            );
            #[cfg(not(feature = "logging"))]
            let _ = (existing, replacement);
        }
        *slot = result;
    }

    /// Produce a value from this binding's own result, resolving through the
    /// requesting injector. `Ok(None)` means the binding has no result.
    pub fn respond(&self, injector: &Injector) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let result = self.result.read().unwrap().clone();
        let Some(result) = result else {
            return Ok(None);
        };
        match result {
            InjectResult::Value(value) => Ok(Some(value)),
            InjectResult::Class(provide) => provide(injector).map(Some),
            InjectResult::Singleton(cell) => cell.respond(injector).map(Some),
            InjectResult::Rule(config) => config.respond(injector),
        }
    }
}

impl std::fmt::Debug for BindingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = self.result.read().unwrap();
        f.debug_struct("BindingConfig")
            .field("request", &self.type_name)
            .field("name", &self.name)
            .field("result", &result.as_ref().map(InjectResult::kind))
            .finish()
    }
}

/// Typed handle to a binding, returned by every `map_*` call.
///
/// Pass a rule to [`Injector::map_rule`] to alias another request key to
/// this binding.
pub struct Rule<T> {
    pub(crate) config: Arc<BindingConfig>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Rule<T> {
    pub(crate) fn new(config: Arc<BindingConfig>) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Rule<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::Injector;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn value_result_responds_with_the_same_instance() {
        let injector = Injector::new();
        let config = BindingConfig::new("u32", "");
        let value: Arc<dyn Any + Send + Sync> = Arc::new(7u32);
        config.set_result(Some(InjectResult::Value(Arc::clone(&value))));

        let a = config.respond(&injector).unwrap().unwrap();
        let b = config.respond(&injector).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn singleton_result_invokes_the_provider_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);

        let injector = Injector::new();
        let config = BindingConfig::new("u32", "");
        let provide: Provider = Arc::new(|_| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(7u32) as Arc<dyn Any + Send + Sync>)
        });
        config.set_result(Some(InjectResult::Singleton(Arc::new(SingletonCell::new(
            provide,
        )))));

        let a = config.respond(&injector).unwrap().unwrap();
        let b = config.respond(&injector).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn class_result_produces_fresh_instances() {
        static CALLS: AtomicU32 = AtomicU32::new(0);

        let injector = Injector::new();
        let config = BindingConfig::new("u32", "");
        let provide: Provider = Arc::new(|_| {
            Ok(Arc::new(CALLS.fetch_add(1, Ordering::SeqCst)) as Arc<dyn Any + Send + Sync>)
        });
        config.set_result(Some(InjectResult::Class(provide)));

        let a = config.respond(&injector).unwrap().unwrap();
        let b = config.respond(&injector).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rule_result_delegates_to_the_aliased_binding() {
        let injector = Injector::new();
        let target = Arc::new(BindingConfig::new("u32", ""));
        target.set_result(Some(InjectResult::Value(
            Arc::new(9u32) as Arc<dyn Any + Send + Sync>
        )));

        let alias = BindingConfig::new("u32", "alias");
        alias.set_result(Some(InjectResult::Rule(Arc::clone(&target))));

        let value = alias.respond(&injector).unwrap().unwrap();
        // SAFETY: stored above as u32
        let value = unsafe { downcast_arc_unchecked::<u32>(value) };
        assert_eq!(*value, 9);
    }

    #[test]
    fn overwrite_keeps_the_last_result() {
        let injector = Injector::new();
        let config = BindingConfig::new("u32", "");
        config.set_result(Some(InjectResult::Value(
            Arc::new(1u32) as Arc<dyn Any + Send + Sync>
        )));
        config.set_result(Some(InjectResult::Value(
            Arc::new(2u32) as Arc<dyn Any + Send + Sync>
        )));

        let value = config.respond(&injector).unwrap().unwrap();
        let value = unsafe { downcast_arc_unchecked::<u32>(value) };
        assert_eq!(*value, 2);
    }

    #[test]
    fn cleared_result_responds_with_nothing() {
        let injector = Injector::new();
        let config = BindingConfig::new("u32", "");
        config.set_result(Some(InjectResult::Value(
            Arc::new(1u32) as Arc<dyn Any + Send + Sync>
        )));
        config.set_result(None);

        assert!(!config.has_own_result());
        assert!(config.respond(&injector).unwrap().is_none());
    }
}
