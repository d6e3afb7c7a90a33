//! Decorator pipeline.
//!
//! When a producer builds its expression, every registered decorator whose
//! service matches is applied in registration order, so the last registered
//! decorator ends up outermost. A decorator is itself a registration: a
//! [`Component`](crate::Component) whose constructor takes the decorated
//! instance (or a [`DecorateeFactory`]), or a function wrapping it.
//!
//! Each decorator gets its own registration per decorated producer, so a
//! singleton decorator is built once per decorated service and never shared
//! between unrelated producers.

pub(crate) mod collection;

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::container::ContainerInner;
use crate::context::{Activation, ResolverContext};
use crate::error::{DiError, DiResult};
use crate::expression::{Expression, InstanceCreator, Node, RuntimePredicate};
use crate::generic::GenericMatcher;
use crate::internal::next_id;
use crate::key::{unerase, Service, ServiceType};
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;
use crate::registration::{Closing, Registration};
use crate::scope::Scope;

/// Decorators applied so far, innermost first.
pub type AppliedDecorators = SmallVec<[ServiceType; 4]>;

/// What decorator predicates see about the decoration being applied.
#[derive(Clone)]
pub struct DecoratorPredicateContext {
    inner: Arc<PredicateData>,
}

struct PredicateData {
    service_type: ServiceType,
    implementation_type: ServiceType,
    expression: Expression,
    applied_decorators: AppliedDecorators,
}

impl DecoratorPredicateContext {
    pub(crate) fn new(
        service_type: ServiceType,
        implementation_type: ServiceType,
        expression: Expression,
        applied_decorators: AppliedDecorators,
    ) -> Self {
        Self {
            inner: Arc::new(PredicateData { service_type, implementation_type, expression, applied_decorators }),
        }
    }

    /// The decorated service.
    pub fn service_type(&self) -> ServiceType {
        self.inner.service_type
    }

    /// The implementation behind the service, before any decoration.
    pub fn implementation_type(&self) -> ServiceType {
        self.inner.implementation_type
    }

    /// The expression being decorated, earlier decorators included.
    pub fn expression(&self) -> &Expression {
        &self.inner.expression
    }

    /// Decorators already applied, innermost first.
    pub fn applied_decorators(&self) -> &[ServiceType] {
        &self.inner.applied_decorators
    }
}

impl fmt::Debug for DecoratorPredicateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorPredicateContext")
            .field("service_type", &self.inner.service_type)
            .field("implementation_type", &self.inner.implementation_type)
            .field("applied_decorators", &self.inner.applied_decorators)
            .finish()
    }
}

/// Creates decorated instances on demand.
///
/// A decorator taking a `DecorateeFactory<S>` instead of `Arc<S>` controls
/// when, and in which scope, the decorated instance is created. This is how
/// a singleton decorator wraps a scoped service: it creates the decoratee
/// per call inside the scope it is given.
///
/// # Examples
///
/// ```rust
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
/// use wiregraph::{
///     Component, Constructor, Container, DecorateeFactory, Lifestyle, Parameter, Resolver,
///     ThreadScopedLifestyle,
/// };
///
/// trait Command: Send + Sync {
///     fn execute(&self) -> u64;
/// }
/// struct Work(u64);
/// impl Command for Work {
///     fn execute(&self) -> u64 { self.0 }
/// }
///
/// struct ScopedCommandProxy {
///     factory: DecorateeFactory<dyn Command>,
/// }
/// impl Command for ScopedCommandProxy {
///     fn execute(&self) -> u64 {
///         self.factory.create().map(|command| command.execute()).unwrap_or(u64::MAX)
///     }
/// }
/// impl Component for ScopedCommandProxy {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(
///             vec![Parameter::decoratee_factory::<dyn Command>("factory")],
///             |args| Ok(ScopedCommandProxy { factory: args.next_factory()? }),
///         )]
///     }
/// }
/// wiregraph::implements!(ScopedCommandProxy => dyn Command);
///
/// let container = Container::new();
/// let counter = Arc::new(AtomicU64::new(0));
/// let next = counter.clone();
/// container
///     .register_factory::<dyn Command, _>(Lifestyle::Scoped, move |_| {
///         Ok(Arc::new(Work(next.fetch_add(1, Ordering::SeqCst))) as Arc<dyn Command>)
///     })
///     .unwrap();
/// container.register_decorator::<dyn Command, ScopedCommandProxy>(Lifestyle::Singleton).unwrap();
///
/// let command = container.get::<dyn Command>().unwrap();
/// assert_eq!(command.execute(), u64::MAX);
///
/// let scope = ThreadScopedLifestyle::begin_scope(&container);
/// assert_eq!(command.execute(), 0);
/// assert_eq!(command.execute(), 0);
/// scope.dispose().unwrap();
///
/// let scope = ThreadScopedLifestyle::begin_scope(&container);
/// assert_eq!(command.execute(), 1);
/// scope.dispose().unwrap();
/// ```
pub struct DecorateeFactory<S: ?Sized> {
    pub(crate) inner: Arc<ErasedDecorateeFactory>,
    pub(crate) _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Service> DecorateeFactory<S> {
    /// Create the decorated instance, resolving scoped dependencies against
    /// the ambient scope.
    pub fn create(&self) -> DiResult<Arc<S>> {
        self.typed(self.inner.create(None)?)
    }

    /// Create the decorated instance inside `scope`.
    pub fn create_in(&self, scope: &Scope) -> DiResult<Arc<S>> {
        self.typed(self.inner.create(Some(scope))?)
    }

    fn typed(&self, instance: crate::key::AnyArc) -> DiResult<Arc<S>> {
        unerase::<S>(&instance).ok_or(DiError::TypeMismatch(std::any::type_name::<S>()))
    }
}

impl<S: ?Sized> Clone for DecorateeFactory<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), _service: PhantomData }
    }
}

impl<S: ?Sized> fmt::Debug for DecorateeFactory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecorateeFactory").field("service", &self.inner.service).finish()
    }
}

pub(crate) struct ErasedDecorateeFactory {
    service: ServiceType,
    creator: InstanceCreator,
    container: Weak<ContainerInner>,
}

impl ErasedDecorateeFactory {
    pub(crate) fn new(service: ServiceType, creator: InstanceCreator, container: Weak<ContainerInner>) -> Self {
        Self { service, creator, container }
    }

    pub(crate) fn service(&self) -> ServiceType {
        self.service
    }

    fn create(&self, scope: Option<&Scope>) -> DiResult<crate::key::AnyArc> {
        let container = self.container.upgrade().ok_or(DiError::ContainerDisposed)?;
        if container.is_disposed() {
            return Err(DiError::ContainerDisposed);
        }
        if let Some(scope) = scope {
            if scope.is_disposed() {
                return Err(DiError::ScopeDisposed { scope: scope.id() });
            }
        }
        let activation = Activation::new(&container, scope);
        (self.creator)(&activation)
    }
}

pub(crate) type StaticPredicate = Arc<dyn Fn(&DecoratorPredicateContext) -> bool + Send + Sync>;

/// Predicates controlling where a decorator applies.
///
/// `when` is evaluated once, while the decorated producer is built, and
/// decides whether the decorator is part of the graph at all. `when_resolved`
/// is evaluated on every resolution and picks between the decorated and the
/// undecorated instance. Both default to applying.
#[derive(Clone, Default)]
pub struct DecoratorOptions {
    pub(crate) predicate: Option<StaticPredicate>,
    pub(crate) runtime: Option<RuntimePredicate>,
}

impl DecoratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DecoratorPredicateContext) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn when_resolved<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DecoratorPredicateContext) -> bool + Send + Sync + 'static,
    {
        self.runtime = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for DecoratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorOptions")
            .field("when", &self.predicate.is_some())
            .field("when_resolved", &self.runtime.is_some())
            .finish()
    }
}

/// A decorator written as a plain object rather than a component.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wiregraph::{Container, DiResult, Lifestyle, Resolver, ResolverContext, ServiceDecorator};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
/// struct Plain;
/// impl Greeter for Plain {
///     fn greet(&self) -> String { "hello".into() }
/// }
///
/// struct Shouting;
/// impl ServiceDecorator<dyn Greeter> for Shouting {
///     fn decorate(&self, original: Arc<dyn Greeter>, _: &ResolverContext<'_>) -> DiResult<Arc<dyn Greeter>> {
///         struct Loud(Arc<dyn Greeter>);
///         impl Greeter for Loud {
///             fn greet(&self) -> String { self.0.greet().to_uppercase() }
///         }
///         Ok(Arc::new(Loud(original)))
///     }
/// }
///
/// let container = Container::new();
/// container.register_instance::<dyn Greeter>(Arc::new(Plain)).unwrap();
/// container.register_service_decorator::<dyn Greeter, _>(Lifestyle::Transient, Shouting).unwrap();
/// assert_eq!(container.get_required::<dyn Greeter>().greet(), "HELLO");
/// ```
pub trait ServiceDecorator<S: ?Sized + Service>: Send + Sync + 'static {
    /// Wrap, modify or replace the decorated instance.
    fn decorate(&self, original: Arc<S>, resolver: &ResolverContext<'_>) -> DiResult<Arc<S>>;
}

/// The decoratee handed to a decorator registration while it is built.
pub(crate) struct DecorationBinding {
    pub(crate) service: ServiceType,
    pub(crate) decoratee: Expression,
    pub(crate) context: DecoratorPredicateContext,
    pub(crate) allow_factory: bool,
    /// What the decoratee resolves to, for lifestyle diagnostics. `None` for
    /// elements of uncontrolled collections.
    pub(crate) decoratee_producer: Option<Arc<InstanceProducer>>,
}

enum DecoratorTarget {
    Exact(Closing),
    OpenGeneric(GenericMatcher),
}

/// A registered decorator, closed per decorated service on demand.
pub(crate) struct DecoratorRegistration {
    id: u64,
    target: DecoratorTarget,
    lifestyle: Lifestyle,
    options: DecoratorOptions,
    registrations: DashMap<u64, Arc<Registration>, ahash::RandomState>,
}

impl DecoratorRegistration {
    pub(crate) fn exact(closing: Closing, lifestyle: Lifestyle, options: DecoratorOptions) -> Self {
        Self::with_target(DecoratorTarget::Exact(closing), lifestyle, options)
    }

    pub(crate) fn open_generic(matcher: GenericMatcher, lifestyle: Lifestyle, options: DecoratorOptions) -> Self {
        Self::with_target(DecoratorTarget::OpenGeneric(matcher), lifestyle, options)
    }

    fn with_target(target: DecoratorTarget, lifestyle: Lifestyle, options: DecoratorOptions) -> Self {
        Self {
            id: next_id(),
            target,
            lifestyle,
            options,
            registrations: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The closing decorating `service`, if this decorator applies to it.
    pub(crate) fn close_for(&self, service: ServiceType) -> Option<Closing> {
        match &self.target {
            DecoratorTarget::Exact(closing) => (closing.service == service).then(|| closing.clone()),
            DecoratorTarget::OpenGeneric(matcher) => matcher.select(service).cloned(),
        }
    }

    pub(crate) fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    pub(crate) fn options(&self) -> &DecoratorOptions {
        &self.options
    }

    /// The registration of this decorator around the producer or collection
    /// `target`, created on first use.
    pub(crate) fn registration_for(
        &self,
        container: &Arc<ContainerInner>,
        target: u64,
        closing: &Closing,
    ) -> Arc<Registration> {
        self.registrations
            .entry(target)
            .or_insert_with(|| closing.registration(container, self.lifestyle.clone()))
            .clone()
    }

    /// Every registration created so far.
    pub(crate) fn registrations(&self) -> Vec<Arc<Registration>> {
        self.registrations.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Wrap the expression of producer `target` in every applicable decorator.
pub(crate) fn intercept(
    container: &Arc<ContainerInner>,
    service: ServiceType,
    target: u64,
    undecorated: &Arc<Registration>,
    mut expression: Expression,
) -> DiResult<(Expression, AppliedDecorators)> {
    let implementation = undecorated.implementation_type();
    let mut applied = AppliedDecorators::new();
    let mut decoratee = InstanceProducer::with_caster(service, undecorated.clone(), None);

    for decorator in container.decorators() {
        let Some(closing) = decorator.close_for(service) else {
            continue;
        };

        let context =
            DecoratorPredicateContext::new(service, implementation, expression.clone(), applied.clone());
        if let Some(predicate) = &decorator.options().predicate {
            if !predicate(&context) {
                trace!(
                    target: "wiregraph",
                    service = service.name(),
                    decorator = closing.implementation.name(),
                    "Decorator skipped by predicate"
                );
                continue;
            }
        }

        let registration = decorator.registration_for(container, target, &closing);
        let binding = DecorationBinding {
            service,
            decoratee: expression.clone(),
            context: context.clone(),
            allow_factory: true,
            decoratee_producer: Some(decoratee.clone()),
        };
        let mut decorated = registration.build_decorator_expression(container, &binding)?;
        if let Some(caster) = &closing.caster {
            decorated = Expression::cast(service, caster.clone(), decorated);
        }

        expression = match &decorator.options().runtime {
            Some(predicate) => Expression::from_node(Node::Conditional {
                predicate: predicate.clone(),
                context,
                decorated,
                undecorated: expression,
            }),
            None => decorated,
        };

        trace!(
            target: "wiregraph",
            service = service.name(),
            decorator = closing.implementation.name(),
            lifestyle = registration.lifestyle().name(),
            "Decorator applied"
        );
        applied.push(closing.implementation);
        decoratee = InstanceProducer::with_caster(service, registration, None);
    }

    Ok((expression, applied))
}
