//! Component descriptions: constructors, injectable properties and upcasting.
//!
//! The container never inspects types at runtime. A type takes part in
//! auto-wiring by implementing [`Component`], which lists its constructor
//! signatures and injectable properties together with the closures that
//! build and configure an instance from resolved arguments.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::decoration::{DecorateeFactory, DecoratorPredicateContext, ErasedDecorateeFactory};
use crate::error::{DiError, DiResult};
use crate::internal::{BoxFutureUnit, Disposer};
use crate::key::{erase, unerase, AnyArc, Service, ServiceType};
use crate::traits::{AsyncDispose, Dispose};

/// Conversion of an implementation into one of the services it provides.
///
/// Every type implements `Implements<Self>`. For trait-object services use
/// the [`implements!`](crate::implements) macro, or write the impl by hand
/// for generic implementations:
///
/// ```rust
/// use std::sync::Arc;
/// use wiregraph::Implements;
///
/// trait Handler<C>: Send + Sync {}
/// struct Logging<C>(std::marker::PhantomData<fn(C)>);
/// impl<C: 'static> Handler<C> for Logging<C> {}
///
/// impl<C: 'static> Implements<dyn Handler<C>> for Logging<C> {
///     fn upcast(self: Arc<Self>) -> Arc<dyn Handler<C>> {
///         self
///     }
/// }
/// ```
pub trait Implements<S: ?Sized + Service>: Service {
    /// Convert a shared implementation into the shared service.
    fn upcast(self: Arc<Self>) -> Arc<S>;
}

impl<T: ?Sized + Service> Implements<T> for T {
    #[inline]
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declare that an implementation provides one or more trait-object services.
///
/// ```rust
/// trait Logger: Send + Sync {}
/// trait Sink: Send + Sync {}
///
/// struct FileLogger;
/// impl Logger for FileLogger {}
/// impl Sink for FileLogger {}
///
/// wiregraph::implements!(FileLogger => dyn Logger, dyn Sink);
/// ```
#[macro_export]
macro_rules! implements {
    ($implementation:ty => $($service:ty),+ $(,)?) => {
        $(
            impl $crate::Implements<$service> for $implementation {
                #[inline]
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$service> {
                    self
                }
            }
        )+
    };
}

/// A type the container can construct.
///
/// Implementations list their constructors and, optionally, their injectable
/// properties. Which constructor is used and which properties are injected is
/// decided by the container's behaviors (see
/// [`ContainerOptions`](crate::ContainerOptions)).
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use wiregraph::{Component, Constructor, Container, Lifestyle, Resolver, Parameter};
///
/// struct Config {
///     url: &'static str,
/// }
///
/// struct Repository {
///     config: Arc<Config>,
/// }
///
/// impl Component for Repository {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(
///             vec![Parameter::service::<Config>("config")],
///             |args| Ok(Repository { config: args.next()? }),
///         )]
///     }
/// }
///
/// let container = Container::new();
/// container.register_instance(Arc::new(Config { url: "postgres://localhost" })).unwrap();
/// container.register_concrete::<Repository>(Lifestyle::Transient).unwrap();
///
/// let repository = container.get::<Repository>().unwrap();
/// assert_eq!(repository.config.url, "postgres://localhost");
/// ```
pub trait Component: Service + Sized {
    /// Constructor signatures, in declaration order.
    fn constructors() -> Vec<Constructor<Self>>;

    /// Properties that may be injected after construction.
    fn properties() -> Vec<Property<Self>> {
        Vec::new()
    }

    /// Return `Some(self)` when instances need synchronous disposal.
    fn as_disposable(&self) -> Option<&dyn Dispose> {
        None
    }

    /// Return `Some(self)` when instances need asynchronous disposal.
    fn as_async_disposable(&self) -> Option<&dyn AsyncDispose> {
        None
    }
}

/// What a constructor or property parameter asks the container for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    /// A single registered service.
    Service(ServiceType),
    /// A value type. Injectable only when explicitly registered.
    Value(ServiceType),
    /// Every element of the collection registered for a service.
    Collection(ServiceType),
    /// The instance being decorated. Only valid on decorators.
    Decoratee(ServiceType),
    /// A factory creating the decorated instance on demand. Only valid on decorators.
    DecorateeFactory(ServiceType),
    /// Information about the decoration being applied. Only valid on decorators.
    DecoratorContext,
}

/// A named constructor or property parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parameter {
    name: &'static str,
    kind: ParameterKind,
}

impl Parameter {
    pub fn service<S: ?Sized + Service>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Service(ServiceType::of::<S>()) }
    }

    pub fn value<V: Service>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Value(ServiceType::of::<V>()) }
    }

    pub fn collection<S: ?Sized + Service>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Collection(ServiceType::of::<S>()) }
    }

    pub fn decoratee<S: ?Sized + Service>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Decoratee(ServiceType::of::<S>()) }
    }

    pub fn decoratee_factory<S: ?Sized + Service>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::DecorateeFactory(ServiceType::of::<S>()) }
    }

    pub fn decorator_context(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::DecoratorContext }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    /// The type the parameter receives, for diagnostics.
    pub fn parameter_type(&self) -> ServiceType {
        match self.kind {
            ParameterKind::Service(t)
            | ParameterKind::Value(t)
            | ParameterKind::Collection(t)
            | ParameterKind::Decoratee(t)
            | ParameterKind::DecorateeFactory(t) => t,
            ParameterKind::DecoratorContext => ServiceType::of::<DecoratorPredicateContext>(),
        }
    }
}

type Activator<T> = Arc<dyn Fn(&mut Arguments) -> DiResult<T> + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, &mut Arguments) -> DiResult<()> + Send + Sync>;

/// One constructor of a component: its parameters and the closure that
/// builds the instance from the resolved arguments, in parameter order.
pub struct Constructor<T> {
    parameters: Vec<Parameter>,
    public: bool,
    activator: Activator<T>,
}

impl<T: Service> Constructor<T> {
    pub fn new<F>(parameters: Vec<Parameter>, activator: F) -> Self
    where
        F: Fn(&mut Arguments) -> DiResult<T> + Send + Sync + 'static,
    {
        Self { parameters, public: true, activator: Arc::new(activator) }
    }

    /// Mark the constructor non-public; the built-in resolution behaviors
    /// never select it.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_public(&self) -> bool {
        self.public
    }
}

/// An injectable property: the parameter it receives and the setter applied
/// to the freshly constructed instance.
pub struct Property<T> {
    parameter: Parameter,
    setter: Setter<T>,
}

impl<T: Service> Property<T> {
    pub fn new<F>(parameter: Parameter, setter: F) -> Self
    where
        F: Fn(&mut T, &mut Arguments) -> DiResult<()> + Send + Sync + 'static,
    {
        Self { parameter, setter: Arc::new(setter) }
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }
}

/// A resolved argument, before it is handed to user code.
pub(crate) enum Argument {
    Instance(AnyArc),
    Collection(Vec<AnyArc>),
    Factory(Arc<ErasedDecorateeFactory>),
    Context(DecoratorPredicateContext),
}

/// Resolved arguments for one constructor or property setter, consumed in
/// declaration order.
pub struct Arguments {
    implementation: ServiceType,
    values: std::vec::IntoIter<Argument>,
}

impl Arguments {
    pub(crate) fn new(implementation: ServiceType, values: Vec<Argument>) -> Self {
        Self { implementation, values: values.into_iter() }
    }

    /// The next argument, as a service instance.
    pub fn next<S: ?Sized + Service>(&mut self) -> DiResult<Arc<S>> {
        match self.take()? {
            Argument::Instance(any) => unerase::<S>(&any).ok_or_else(Self::mismatch::<S>),
            _ => Err(Self::mismatch::<S>()),
        }
    }

    /// The next argument, as every element of a collection.
    pub fn next_all<S: ?Sized + Service>(&mut self) -> DiResult<Vec<Arc<S>>> {
        match self.take()? {
            Argument::Collection(items) => items
                .iter()
                .map(|any| unerase::<S>(any).ok_or_else(Self::mismatch::<S>))
                .collect(),
            _ => Err(Self::mismatch::<S>()),
        }
    }

    /// The next argument, as a factory for the decorated instance.
    pub fn next_factory<S: ?Sized + Service>(&mut self) -> DiResult<DecorateeFactory<S>> {
        match self.take()? {
            Argument::Factory(inner) if inner.service().is::<S>() => Ok(DecorateeFactory {
                inner,
                _service: PhantomData,
            }),
            _ => Err(Self::mismatch::<DecorateeFactory<S>>()),
        }
    }

    /// The next argument, as the context of the decoration being applied.
    pub fn next_context(&mut self) -> DiResult<DecoratorPredicateContext> {
        match self.take()? {
            Argument::Context(context) => Ok(context),
            _ => Err(Self::mismatch::<DecoratorPredicateContext>()),
        }
    }

    /// Arguments not consumed yet.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    fn take(&mut self) -> DiResult<Argument> {
        self.values.next().ok_or_else(|| DiError::ActivationFailed {
            implementation: self.implementation.name(),
            reason: "requested more arguments than its signature declares".into(),
        })
    }

    fn mismatch<S: ?Sized + 'static>() -> DiError {
        DiError::TypeMismatch(std::any::type_name::<S>())
    }
}

/// Signature of one constructor, without its activator.
#[derive(Clone, Debug)]
pub(crate) struct ConstructorInfo {
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) public: bool,
}

pub(crate) struct Activated {
    pub(crate) instance: AnyArc,
    pub(crate) disposer: Option<Disposer>,
}

type ActivateFn =
    dyn Fn(usize, Vec<Argument>, Vec<(usize, Argument)>) -> DiResult<Activated> + Send + Sync;

/// Type-erased view of a [`Component`].
pub(crate) struct ComponentModel {
    implementation: ServiceType,
    constructors: Vec<ConstructorInfo>,
    properties: Vec<Parameter>,
    activate: Box<ActivateFn>,
}

impl ComponentModel {
    pub(crate) fn of<I: Component>() -> Arc<Self> {
        let implementation = ServiceType::of::<I>();
        let constructors = I::constructors();
        let properties = I::properties();

        let infos = constructors
            .iter()
            .map(|c| ConstructorInfo { parameters: c.parameters.clone(), public: c.public })
            .collect();
        let property_parameters = properties.iter().map(|p| p.parameter).collect();

        let activate = move |index: usize,
                             values: Vec<Argument>,
                             assigned: Vec<(usize, Argument)>|
              -> DiResult<Activated> {
            let constructor = constructors.get(index).ok_or_else(|| DiError::ActivationFailed {
                implementation: implementation.name(),
                reason: format!("constructor #{} does not exist", index),
            })?;

            let mut arguments = Arguments::new(implementation, values);
            let mut instance = (constructor.activator)(&mut arguments)?;

            for (property_index, value) in assigned {
                if let Some(property) = properties.get(property_index) {
                    let mut arguments = Arguments::new(implementation, vec![value]);
                    (property.setter)(&mut instance, &mut arguments)?;
                }
            }

            let instance = Arc::new(instance);
            let disposer = disposer_for(&instance);
            Ok(Activated { instance: erase(instance), disposer })
        };

        Arc::new(Self {
            implementation,
            constructors: infos,
            properties: property_parameters,
            activate: Box::new(activate),
        })
    }

    pub(crate) fn implementation(&self) -> ServiceType {
        self.implementation
    }

    pub(crate) fn constructors(&self) -> &[ConstructorInfo] {
        &self.constructors
    }

    pub(crate) fn properties(&self) -> &[Parameter] {
        &self.properties
    }

    pub(crate) fn activate(
        &self,
        constructor: usize,
        values: Vec<Argument>,
        properties: Vec<(usize, Argument)>,
    ) -> DiResult<Activated> {
        (self.activate)(constructor, values, properties)
    }
}

fn disposer_for<I: Component>(instance: &Arc<I>) -> Option<Disposer> {
    let sync = instance.as_disposable().is_some();
    let asynchronous = instance.as_async_disposable().is_some();
    if !sync && !asynchronous {
        return None;
    }

    let sync_hook = sync.then(|| {
        let instance = instance.clone();
        Box::new(move || {
            if let Some(disposable) = instance.as_disposable() {
                disposable.dispose();
            }
        }) as Box<dyn FnOnce() + Send>
    });
    let async_hook = asynchronous.then(|| {
        let instance = instance.clone();
        Box::new(move || -> BoxFutureUnit {
            Box::pin(async move {
                if let Some(disposable) = instance.as_async_disposable() {
                    disposable.dispose().await;
                }
            })
        }) as Box<dyn FnOnce() -> BoxFutureUnit + Send>
    });

    Some(Disposer {
        instance: std::any::type_name::<I>(),
        sync: sync_hook,
        asynchronous: async_hook,
    })
}

/// Hook run on every new instance of a concrete type after property injection.
pub(crate) type Initializer = Arc<dyn Fn(&AnyArc) -> DiResult<()> + Send + Sync>;

pub(crate) fn initializer<I, F>(f: F) -> Initializer
where
    I: Service,
    F: Fn(&I) + Send + Sync + 'static,
{
    Arc::new(move |instance: &AnyArc| {
        let typed = unerase::<I>(instance).ok_or(DiError::TypeMismatch(std::any::type_name::<I>()))?;
        f(&typed);
        Ok(())
    })
}
