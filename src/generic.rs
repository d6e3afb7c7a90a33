//! Open-generic registrations and decorators.
//!
//! Rust monomorphizes generics at compile time, so an open-generic
//! registration lists the closed instantiations the program uses
//! ([`OpenGeneric::close`]). What stays dynamic is *matching*: a
//! [`TypePattern`] with named parameters is unified with the [`TypeShape`]
//! of a requested service, and constraints on the bound parameters decide
//! whether the registration applies. A request that cannot be unified, or
//! whose bindings violate a constraint, simply does not match.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::component::{Component, Implements};
use crate::container::ContainerInner;
use crate::decoration::DecoratorOptions;
use crate::error::{DiError, DiResult};
use crate::key::{Service, ServiceType};
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;
use crate::registration::Closing;

/// Structure of a closed service type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeShape {
    /// A type matched as a whole.
    Type(ServiceType),
    /// An instantiation of a generic definition, such as `Handler<Order>`.
    Generic {
        definition: &'static str,
        arguments: Vec<TypeShape>,
    },
}

impl TypeShape {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeShape::Type(ServiceType::of::<T>())
    }

    pub fn generic(definition: &'static str, arguments: Vec<TypeShape>) -> Self {
        TypeShape::Generic { definition, arguments }
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        matches!(self, TypeShape::Type(t) if t.is::<T>())
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Type(t) => f.write_str(&t.short_name()),
            TypeShape::Generic { definition, arguments } => {
                write!(f, "{}<", definition)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", argument)?;
                }
                f.write_str(">")
            }
        }
    }
}

/// A service type whose structure takes part in open-generic matching.
///
/// ```rust
/// use wiregraph::{GenericService, TypeShape};
///
/// trait Handler<C>: Send + Sync {
///     fn handle(&self, command: &C);
/// }
///
/// impl<C: Send + Sync + 'static> GenericService for dyn Handler<C> {
///     fn shape() -> TypeShape {
///         TypeShape::generic("Handler", vec![TypeShape::of::<C>()])
///     }
/// }
/// ```
pub trait GenericService: Service {
    fn shape() -> TypeShape;
}

/// Pattern with named parameters, unified against a [`TypeShape`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypePattern {
    /// Binds to any shape; repeated parameters must bind to equal shapes.
    Parameter(&'static str),
    /// Matches exactly this shape.
    Exact(TypeShape),
    Generic {
        definition: &'static str,
        arguments: Vec<TypePattern>,
    },
}

impl TypePattern {
    pub fn parameter(name: &'static str) -> Self {
        TypePattern::Parameter(name)
    }

    pub fn exact<T: ?Sized + 'static>() -> Self {
        TypePattern::Exact(TypeShape::of::<T>())
    }

    pub fn generic(definition: &'static str, arguments: Vec<TypePattern>) -> Self {
        TypePattern::Generic { definition, arguments }
    }

    /// The substitution making this pattern equal to `shape`, if any.
    ///
    /// ```rust
    /// use wiregraph::{TypePattern, TypeShape};
    ///
    /// struct Order;
    /// struct Invoice;
    ///
    /// let pair = TypePattern::generic(
    ///     "Pair",
    ///     vec![TypePattern::parameter("T"), TypePattern::parameter("T")],
    /// );
    ///
    /// let same = TypeShape::generic("Pair", vec![TypeShape::of::<Order>(), TypeShape::of::<Order>()]);
    /// let mixed = TypeShape::generic("Pair", vec![TypeShape::of::<Order>(), TypeShape::of::<Invoice>()]);
    ///
    /// assert!(pair.unify(&same).unwrap().get("T").unwrap().is::<Order>());
    /// assert!(pair.unify(&mixed).is_none());
    /// ```
    pub fn unify(&self, shape: &TypeShape) -> Option<Substitution> {
        let mut substitution = Substitution::default();
        self.unify_into(shape, &mut substitution).then_some(substitution)
    }

    fn unify_into(&self, shape: &TypeShape, substitution: &mut Substitution) -> bool {
        match (self, shape) {
            (TypePattern::Parameter(name), shape) => substitution.bind(name, shape),
            (TypePattern::Exact(expected), shape) => expected == shape,
            (
                TypePattern::Generic { definition, arguments },
                TypeShape::Generic { definition: actual, arguments: actual_arguments },
            ) => {
                definition == actual
                    && arguments.len() == actual_arguments.len()
                    && arguments
                        .iter()
                        .zip(actual_arguments)
                        .all(|(pattern, shape)| pattern.unify_into(shape, substitution))
            }
            (TypePattern::Generic { .. }, TypeShape::Type(_)) => false,
        }
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypePattern::Parameter(name) => f.write_str(name),
            TypePattern::Exact(shape) => write!(f, "{}", shape),
            TypePattern::Generic { definition, arguments } => {
                let arguments: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
                write!(f, "{}<{}>", definition, arguments.join(", "))
            }
        }
    }
}

/// Bindings of pattern parameters to shapes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitution {
    bindings: Vec<(&'static str, TypeShape)>,
}

impl Substitution {
    pub fn get(&self, parameter: &str) -> Option<&TypeShape> {
        self.bindings.iter().find(|(name, _)| *name == parameter).map(|(_, shape)| shape)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn bind(&mut self, parameter: &'static str, shape: &TypeShape) -> bool {
        match self.get(parameter) {
            Some(bound) => bound == shape,
            None => {
                self.bindings.push((parameter, shape.clone()));
                true
            }
        }
    }
}

/// Constraint on the shape bound to one pattern parameter.
pub type TypeConstraint = Arc<dyn Fn(&TypeShape) -> bool + Send + Sync>;

/// Pattern, constraints and closed instantiations shared by open-generic
/// registrations and decorators.
#[derive(Clone)]
pub(crate) struct GenericMatcher {
    pattern: TypePattern,
    constraints: Vec<(&'static str, TypeConstraint)>,
    closings: Vec<(TypeShape, Closing)>,
}

impl GenericMatcher {
    fn new(pattern: TypePattern) -> Self {
        Self { pattern, constraints: Vec::new(), closings: Vec::new() }
    }

    /// The closing for `service`, when its shape unifies with the pattern
    /// and the bindings satisfy every constraint.
    pub(crate) fn select(&self, service: ServiceType) -> Option<&Closing> {
        let (shape, closing) = self.closings.iter().find(|(_, closing)| closing.service == service)?;
        let substitution = self.pattern.unify(shape)?;
        let satisfied = self.constraints.iter().all(|(parameter, constraint)| {
            substitution.get(parameter).is_some_and(|bound| constraint(bound))
        });
        if !satisfied {
            trace!(
                target: "wiregraph",
                service = service.name(),
                pattern = %self.pattern,
                "Open generic skipped: constraint not satisfied"
            );
            return None;
        }
        Some(closing)
    }

    /// Reject matchers closing the same service more than once.
    pub(crate) fn validate(&self) -> DiResult<()> {
        for (index, (_, closing)) in self.closings.iter().enumerate() {
            let duplicate = self.closings[..index].iter().find(|(_, earlier)| earlier.service == closing.service);
            if let Some((_, earlier)) = duplicate {
                return Err(DiError::InvalidRegistration {
                    service: closing.service.name(),
                    reason: format!(
                        "{} closes {} with both {} and {}",
                        self.pattern, closing.service, earlier.implementation, closing.implementation
                    ),
                });
            }
        }
        Ok(())
    }

    /// Services of every closing this matcher accepts.
    pub(crate) fn matching_services(&self) -> Vec<ServiceType> {
        let mut services: Vec<ServiceType> = self
            .closings
            .iter()
            .map(|(_, closing)| closing.service)
            .filter(|service| self.select(*service).is_some())
            .collect();
        services.dedup();
        services
    }

    fn close<S, I>(&mut self)
    where
        S: ?Sized + GenericService,
        I: Component + Implements<S>,
    {
        self.closings.push((S::shape(), Closing::component::<S, I>()));
    }

    fn constrain<F>(&mut self, parameter: &'static str, constraint: F)
    where
        F: Fn(&TypeShape) -> bool + Send + Sync + 'static,
    {
        self.constraints.push((parameter, Arc::new(constraint)));
    }
}

/// Open-generic registration: one pattern, many closed instantiations.
///
/// # Examples
///
/// ```rust
/// use std::marker::PhantomData;
/// use wiregraph::{
///     Component, Constructor, Container, GenericService, Implements, Lifestyle, OpenGeneric,
///     Resolver, TypePattern, TypeShape,
/// };
///
/// trait Validator<T>: Send + Sync {
///     fn name(&self) -> &'static str;
/// }
/// impl<T: Send + Sync + 'static> GenericService for dyn Validator<T> {
///     fn shape() -> TypeShape {
///         TypeShape::generic("Validator", vec![TypeShape::of::<T>()])
///     }
/// }
///
/// struct NullValidator<T>(PhantomData<fn(T)>);
/// impl<T: 'static> Validator<T> for NullValidator<T> {
///     fn name(&self) -> &'static str { "null" }
/// }
/// impl<T: 'static> Component for NullValidator<T> {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(vec![], |_| Ok(NullValidator(PhantomData)))]
///     }
/// }
/// impl<T: 'static> Implements<dyn Validator<T>> for NullValidator<T> {
///     fn upcast(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn Validator<T>> { self }
/// }
///
/// struct Order;
/// struct Invoice;
///
/// let container = Container::new();
/// container.register_open_generic(
///     OpenGeneric::new(TypePattern::generic("Validator", vec![TypePattern::parameter("T")]), Lifestyle::Singleton)
///         .close::<dyn Validator<Order>, NullValidator<Order>>()
///         .close::<dyn Validator<Invoice>, NullValidator<Invoice>>(),
/// ).unwrap();
///
/// assert_eq!(container.get::<dyn Validator<Order>>().unwrap().name(), "null");
/// assert!(container.get::<dyn Validator<u32>>().is_err());
/// ```
pub struct OpenGeneric {
    matcher: GenericMatcher,
    lifestyle: Lifestyle,
    producers: DashMap<TypeId, Arc<InstanceProducer>, ahash::RandomState>,
}

impl OpenGeneric {
    pub fn new(pattern: TypePattern, lifestyle: Lifestyle) -> Self {
        Self {
            matcher: GenericMatcher::new(pattern),
            lifestyle,
            producers: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Add the instantiation serving `S` with `I`.
    pub fn close<S, I>(mut self) -> Self
    where
        S: ?Sized + GenericService,
        I: Component + Implements<S>,
    {
        self.matcher.close::<S, I>();
        self
    }

    /// Only match when the shape bound to `parameter` satisfies `constraint`.
    pub fn constrain<F>(mut self, parameter: &'static str, constraint: F) -> Self
    where
        F: Fn(&TypeShape) -> bool + Send + Sync + 'static,
    {
        self.matcher.constrain(parameter, constraint);
        self
    }

    pub fn pattern(&self) -> &TypePattern {
        &self.matcher.pattern
    }

    pub(crate) fn validate(&self) -> DiResult<()> {
        self.matcher.validate()
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    /// One producer per matched service, created on first request.
    pub(crate) fn producer_for(
        &self,
        container: &Arc<ContainerInner>,
        service: ServiceType,
    ) -> DiResult<Option<Arc<InstanceProducer>>> {
        let Some(closing) = self.matcher.select(service) else {
            return Ok(None);
        };

        let producer = self
            .producers
            .entry(service.id())
            .or_insert_with(|| closing.producer(container, self.lifestyle.clone()))
            .clone();
        Ok(Some(producer))
    }

    pub(crate) fn matching_services(&self) -> Vec<ServiceType> {
        self.matcher.matching_services()
    }
}

/// Open-generic decorator: decorates every service whose shape matches the
/// pattern, using the closed decorator registered for that service.
pub struct OpenGenericDecorator {
    matcher: GenericMatcher,
    lifestyle: Lifestyle,
    options: DecoratorOptions,
}

impl OpenGenericDecorator {
    pub fn new(pattern: TypePattern, lifestyle: Lifestyle) -> Self {
        Self { matcher: GenericMatcher::new(pattern), lifestyle, options: DecoratorOptions::default() }
    }

    /// Add the decorator `D` used for service `S`.
    pub fn close<S, D>(mut self) -> Self
    where
        S: ?Sized + GenericService,
        D: Component + Implements<S>,
    {
        self.matcher.close::<S, D>();
        self
    }

    pub fn constrain<F>(mut self, parameter: &'static str, constraint: F) -> Self
    where
        F: Fn(&TypeShape) -> bool + Send + Sync + 'static,
    {
        self.matcher.constrain(parameter, constraint);
        self
    }

    /// Predicates applied on top of the pattern match.
    pub fn with_options(mut self, options: DecoratorOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn into_parts(self) -> (GenericMatcher, Lifestyle, DecoratorOptions) {
        (self.matcher, self.lifestyle, self.options)
    }
}
