//! Injection-point descriptions
//!
//! The container does not reflect over types; a type declares its injection
//! points by implementing [`Injectee`] and registering them on a
//! [`Description`]: one constructor point (positional parameters, each
//! required or optional), any number of property and method points, and
//! post-construct points invoked after all member injection in ascending
//! declared order. The description is sealed into a type-erased form and
//! cached per injector, so it is computed exactly once per concrete type.

use crate::binding::downcast_arc_unchecked;
use crate::error::{InjectError, InjectSite, Result};
use crate::injector::Injector;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// A type the injector knows how to construct and populate.
///
/// # Examples
///
/// ```rust
/// use signalmap::{Description, Injectee};
/// use std::sync::Arc;
///
/// struct GalleryModel;
///
/// struct GalleryMediator {
///     model: Option<Arc<GalleryModel>>,
/// }
///
/// impl Injectee for GalleryMediator {
///     fn describe(d: &mut Description<Self>) {
///         d.constructor_fn(|| GalleryMediator { model: None });
///         d.property("model", |target, model: Arc<GalleryModel>| {
///             target.model = Some(model);
///         });
///     }
/// }
/// ```
pub trait Injectee: Send + Sync + Sized + 'static {
    /// Register this type's injection points.
    fn describe(d: &mut Description<Self>);
}

// =============================================================================
// Positional parameters
// =============================================================================

struct ParamSpec {
    type_id: TypeId,
    type_name: &'static str,
    name: &'static str,
    optional: bool,
}

/// Positional parameter list for a constructor or method injection point.
///
/// Required parameters must precede optional ones; declaring a required
/// parameter after an optional one is a configuration error and panics.
#[derive(Default)]
pub struct Params {
    specs: Vec<ParamSpec>,
}

impl Params {
    pub fn new() -> Self {
        Self { specs: Vec::new() }
    }

    /// Add a required parameter of type `D`.
    pub fn required<D: Send + Sync + 'static>(self) -> Self {
        self.push::<D>("", false)
    }

    /// Add a required parameter resolved under a binding name.
    pub fn required_named<D: Send + Sync + 'static>(self, name: &'static str) -> Self {
        self.push::<D>(name, false)
    }

    /// Add an optional parameter of type `D`. Resolution of the parameter
    /// list stops at the first optional parameter that cannot be resolved.
    pub fn optional<D: Send + Sync + 'static>(self) -> Self {
        self.push::<D>("", true)
    }

    /// Add an optional parameter resolved under a binding name.
    pub fn optional_named<D: Send + Sync + 'static>(self, name: &'static str) -> Self {
        self.push::<D>(name, true)
    }

    fn push<D: Send + Sync + 'static>(mut self, name: &'static str, optional: bool) -> Self {
        if !optional && self.specs.iter().any(|spec| spec.optional) {
            panic!(
                "required parameter {} declared after an optional parameter",
                std::any::type_name::<D>()
            );
        }
        self.specs.push(ParamSpec {
            type_id: TypeId::of::<D>(),
            type_name: std::any::type_name::<D>(),
            name,
            optional,
        });
        self
    }

    fn len(&self) -> usize {
        self.specs.len()
    }
}

/// Resolved arguments for a constructor or method injection point.
///
/// Positions past the early-stop point of an optional scan hold `None`.
pub struct Args {
    values: Vec<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Args {
    /// The resolved value at `index`, or `None` for an unset optional
    /// parameter or a type mismatch.
    pub fn get<D: Send + Sync + 'static>(&self, index: usize) -> Option<Arc<D>> {
        let value = self.values.get(index)?.clone()?;
        value.downcast::<D>().ok()
    }

    /// The resolved value at `index`; panics when the position was declared
    /// with a different type or is unset. Required parameters are always
    /// set by the time a factory runs.
    pub fn require<D: Send + Sync + 'static>(&self, index: usize) -> Arc<D> {
        match self.get::<D>(index) {
            Some(value) => value,
            None => panic!(
                "parameter {index} is not a resolved {}",
                std::any::type_name::<D>()
            ),
        }
    }
}

/// Resolve a parameter list against an injector.
///
/// Required parameters that resolve to nothing abort with the requesting
/// type, the dependency, and the 1-based position. The scan stops at the
/// first unresolved optional parameter, leaving later positions unset.
fn gather_args(
    params: &Params,
    injector: &Injector,
    target: &'static str,
    method: &'static str,
) -> Result<Args> {
    let mut values = Vec::with_capacity(params.len());
    for (index, spec) in params.specs.iter().enumerate() {
        match injector.resolve_request(spec.type_id, spec.name)? {
            Some(value) => values.push(Some(value)),
            None if spec.optional => break,
            None => {
                return Err(InjectError::MissingDependency {
                    target,
                    dependency: spec.type_name,
                    name: spec.name.to_owned(),
                    site: InjectSite::Parameter {
                        method,
                        position: index + 1,
                    },
                });
            }
        }
    }
    values.resize_with(params.len(), || None);
    Ok(Args { values })
}

// =============================================================================
// Description builder
// =============================================================================

type CtorFn<T> = Box<dyn Fn(&Args) -> T + Send + Sync>;
type MemberFn<T> = Box<dyn Fn(&mut T, &Injector) -> Result<()> + Send + Sync>;
type PostConstructFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct CtorPoint<T> {
    params: Params,
    build: CtorFn<T>,
}

/// Builder collecting the injection points of one concrete type.
pub struct Description<T> {
    ctor: Option<CtorPoint<T>>,
    members: Vec<MemberFn<T>>,
    post: Vec<(i32, PostConstructFn<T>)>,
}

impl<T: Send + Sync + 'static> Description<T> {
    pub(crate) fn new() -> Self {
        Self {
            ctor: None,
            members: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Declare the constructor point: a parameter list and a factory that
    /// builds the instance from the resolved [`Args`].
    pub fn constructor(
        &mut self,
        params: Params,
        build: impl Fn(&Args) -> T + Send + Sync + 'static,
    ) -> &mut Self {
        self.ctor = Some(CtorPoint {
            params,
            build: Box::new(build),
        });
        self
    }

    /// Declare a constructor point with no parameters.
    pub fn constructor_fn(&mut self, build: impl Fn() -> T + Send + Sync + 'static) -> &mut Self {
        self.constructor(Params::new(), move |_| build())
    }

    /// Declare a property point: resolve `D` and write it into the target
    /// through `set`. Erroring when unresolved, naming `member`.
    pub fn property<D: Send + Sync + 'static>(
        &mut self,
        member: &'static str,
        set: impl Fn(&mut T, Arc<D>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.property_point::<D>(member, "", set)
    }

    /// Declare a property point resolved under a binding name.
    pub fn property_named<D: Send + Sync + 'static>(
        &mut self,
        member: &'static str,
        binding: &'static str,
        set: impl Fn(&mut T, Arc<D>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.property_point::<D>(member, binding, set)
    }

    fn property_point<D: Send + Sync + 'static>(
        &mut self,
        member: &'static str,
        binding: &'static str,
        set: impl Fn(&mut T, Arc<D>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.members.push(Box::new(move |target, injector| {
            match injector.resolve_request(TypeId::of::<D>(), binding)? {
                Some(value) => {
                    // SAFETY: the request was keyed by TypeId::of::<D>(), so
                    // the binding that answered it stores a value of type D.
                    let value = unsafe { downcast_arc_unchecked::<D>(value) };
                    set(target, value);
                    Ok(())
                }
                None => Err(InjectError::MissingDependency {
                    target: std::any::type_name::<T>(),
                    dependency: std::any::type_name::<D>(),
                    name: binding.to_owned(),
                    site: InjectSite::Property(member),
                }),
            }
        }));
        self
    }

    /// Declare a method point: resolve the parameter list and invoke `call`
    /// once, after construction.
    pub fn method(
        &mut self,
        method: &'static str,
        params: Params,
        call: impl Fn(&mut T, &Args) + Send + Sync + 'static,
    ) -> &mut Self {
        self.members.push(Box::new(move |target, injector| {
            let args = gather_args(&params, injector, std::any::type_name::<T>(), method)?;
            call(target, &args);
            Ok(())
        }));
        self
    }

    /// Declare a post-construct point, invoked after all member injection.
    /// Points run in ascending `order`.
    pub fn post_construct(
        &mut self,
        order: i32,
        call: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> &mut Self {
        self.post.push((order, Box::new(call)));
        self
    }
}

// =============================================================================
// Erased form, cached per injector
// =============================================================================

type ErasedCtorFn = Box<dyn Fn(&Injector) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;
type ErasedMemberFn = Box<dyn Fn(&mut dyn Any, &Injector) -> Result<()> + Send + Sync>;

/// The sealed, type-erased description of one concrete type: a constructor
/// point plus the ordered member points.
pub(crate) struct ErasedDescription {
    ctor: ErasedCtorFn,
    members: Vec<ErasedMemberFn>,
}

impl ErasedDescription {
    pub fn build<T: Injectee>() -> Self {
        let mut d = Description::<T>::new();
        T::describe(&mut d);

        let Some(ctor) = d.ctor else {
            panic!(
                "no constructor declared for injectable type {}",
                std::any::type_name::<T>()
            );
        };

        let mut typed_members = d.members;
        let mut post = d.post;
        post.sort_by_key(|(order, _)| *order);
        for (_, call) in post {
            typed_members.push(Box::new(move |target: &mut T, _: &Injector| {
                call(target);
                Ok(())
            }));
        }

        let erased_ctor: ErasedCtorFn = Box::new(move |injector| {
            let args = gather_args(&ctor.params, injector, std::any::type_name::<T>(), "new")?;
            Ok(Box::new((ctor.build)(&args)) as Box<dyn Any + Send + Sync>)
        });

        let members = typed_members
            .into_iter()
            .map(|apply| {
                let erased: ErasedMemberFn = Box::new(move |target, injector| {
                    let target = target
                        .downcast_mut::<T>()
                        .expect("injection description applied to a value of a different type");
                    apply(target, injector)
                });
                erased
            })
            .collect();

        Self {
            ctor: erased_ctor,
            members,
        }
    }

    /// Build an instance through the constructor point only.
    pub fn construct(&self, injector: &Injector) -> Result<Box<dyn Any + Send + Sync>> {
        (self.ctor)(injector)
    }

    /// Apply every member point, in order.
    pub fn apply_members(&self, target: &mut dyn Any, injector: &Injector) -> Result<()> {
        for member in &self.members {
            member(target, injector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "declared after an optional parameter")]
    fn required_after_optional_panics() {
        Params::new().optional::<String>().required::<u32>();
    }

    #[test]
    fn params_accept_required_then_optional() {
        let params = Params::new()
            .required::<u32>()
            .required_named::<String>("term")
            .optional::<bool>();
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn args_get_is_typed() {
        let args = Args {
            values: vec![Some(Arc::new(7u32) as Arc<dyn Any + Send + Sync>), None],
        };
        assert_eq!(*args.require::<u32>(0), 7);
        assert!(args.get::<String>(0).is_none());
        assert!(args.get::<u32>(1).is_none());
    }

    #[test]
    #[should_panic(expected = "parameter 1 is not a resolved")]
    fn args_require_unset_panics() {
        let args = Args { values: vec![None] };
        args.require::<u32>(1);
    }
}
