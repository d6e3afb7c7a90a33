//! Registration storage and the registration API of [`Container`].

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::collection::{CollectionProducer, CollectionSource, ElementSource, Elements};
use crate::component::{initializer, Component, Implements, Initializer};
use crate::conditional::{ConditionalProducer, PredicateContext};
use crate::container::{Container, UnregisteredTypeEventArgs};
use crate::context::ResolverContext;
use crate::decoration::{DecoratorOptions, DecoratorPredicateContext, DecoratorRegistration, ServiceDecorator};
use crate::error::{DiError, DiResult};
use crate::expression::FunctionDecorator;
use crate::generic::{OpenGeneric, OpenGenericDecorator};
use crate::key::{erase, instance_address, unerase, AnyArc, Service, ServiceType};
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;
use crate::registration::{Closing, Registration, RegistrationSource};

pub(crate) type UnregisteredTypeHandler = Arc<dyn Fn(&mut UnregisteredTypeEventArgs) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum ServiceEntry {
    Single(Arc<InstanceProducer>),
    Conditional(Vec<ConditionalProducer>),
}

#[derive(Clone)]
pub(crate) enum CollectionEntry {
    Controlled(Vec<Arc<InstanceProducer>>),
    Uncontrolled(Arc<CollectionProducer>),
}

impl CollectionEntry {
    pub(crate) fn service_type(&self) -> Option<ServiceType> {
        match self {
            CollectionEntry::Controlled(producers) => producers.first().map(|producer| producer.service_type()),
            CollectionEntry::Uncontrolled(collection) => Some(collection.service_type()),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) services: HashMap<TypeId, ServiceEntry>,
    pub(crate) order: Vec<ServiceType>,
    pub(crate) collections: HashMap<TypeId, CollectionEntry>,
    pub(crate) decorators: Vec<Arc<DecoratorRegistration>>,
    pub(crate) open_generics: Vec<Arc<OpenGeneric>>,
    pub(crate) initializers: Vec<(ServiceType, Initializer)>,
    pub(crate) handlers: Vec<UnregisteredTypeHandler>,
}

impl Registry {
    fn insert_single(&mut self, producer: Arc<InstanceProducer>, allow_overriding: bool) -> DiResult<()> {
        let service = producer.service_type();
        match self.services.get(&service.id()) {
            Some(ServiceEntry::Single(_)) if !allow_overriding => {
                return Err(DiError::AlreadyRegistered { service: service.name() })
            }
            Some(ServiceEntry::Conditional(_)) => return Err(mixed_registrations(service)),
            Some(ServiceEntry::Single(_)) => {}
            None => self.order.push(service),
        }
        self.services.insert(service.id(), ServiceEntry::Single(producer));
        Ok(())
    }

    fn insert_conditional(&mut self, conditional: ConditionalProducer) -> DiResult<()> {
        let service = conditional.producer.service_type();
        match self.services.get_mut(&service.id()) {
            Some(ServiceEntry::Single(_)) => Err(mixed_registrations(service)),
            Some(ServiceEntry::Conditional(candidates)) => {
                candidates.push(conditional);
                Ok(())
            }
            None => {
                self.order.push(service);
                self.services.insert(service.id(), ServiceEntry::Conditional(vec![conditional]));
                Ok(())
            }
        }
    }

    fn append(&mut self, producer: Arc<InstanceProducer>) -> DiResult<()> {
        let service = producer.service_type();
        match self
            .collections
            .entry(service.id())
            .or_insert_with(|| CollectionEntry::Controlled(Vec::new()))
        {
            CollectionEntry::Controlled(producers) => {
                producers.push(producer);
                Ok(())
            }
            CollectionEntry::Uncontrolled(_) => Err(DiError::InvalidRegistration {
                service: service.name(),
                reason: "a collection of existing instances is registered for this service; \
                         elements cannot be appended to it"
                    .into(),
            }),
        }
    }

    fn insert_uncontrolled(&mut self, collection: Arc<CollectionProducer>, allow_overriding: bool) -> DiResult<()> {
        let service = collection.service_type();
        match self.collections.get(&service.id()) {
            Some(CollectionEntry::Controlled(_)) => {
                return Err(DiError::InvalidRegistration {
                    service: service.name(),
                    reason: "elements were appended to this collection; it cannot also be registered \
                             from existing instances"
                        .into(),
                })
            }
            Some(CollectionEntry::Uncontrolled(_)) if !allow_overriding => {
                return Err(DiError::AlreadyRegistered { service: service.name() })
            }
            _ => {}
        }
        self.collections.insert(service.id(), CollectionEntry::Uncontrolled(collection));
        Ok(())
    }
}

fn mixed_registrations(service: ServiceType) -> DiError {
    DiError::InvalidRegistration {
        service: service.name(),
        reason: "conditional and unconditional registrations of the same service cannot be mixed".into(),
    }
}

impl Container {
    /// Register `I` as the implementation of service `S`.
    pub fn register<S, I>(&self, lifestyle: Lifestyle) -> DiResult<()>
    where
        S: ?Sized + Service,
        I: Component + Implements<S>,
    {
        self.inner.ensure_unlocked()?;
        let registration = Registration::component::<I>(&self.inner, lifestyle);
        self.add_registration::<S, I>(registration)
    }

    /// Register `I` for `S` with the lifestyle chosen by the container's
    /// [`LifestyleSelectionBehavior`](crate::LifestyleSelectionBehavior).
    pub fn register_default<S, I>(&self) -> DiResult<()>
    where
        S: ?Sized + Service,
        I: Component + Implements<S>,
    {
        let lifestyle = self.inner.options().lifestyle_selection.select_lifestyle(ServiceType::of::<I>());
        self.register::<S, I>(lifestyle)
    }

    /// Register a concrete component as its own service.
    pub fn register_concrete<I: Component>(&self, lifestyle: Lifestyle) -> DiResult<()> {
        self.register::<I, I>(lifestyle)
    }

    /// Register a factory producing `S`.
    ///
    /// The factory receives a [`ResolverContext`] resolving against the scope
    /// of the resolution in progress.
    pub fn register_factory<S, F>(&self, lifestyle: Lifestyle, factory: F) -> DiResult<()>
    where
        S: ?Sized + Service,
        F: Fn(&ResolverContext<'_>) -> DiResult<Arc<S>> + Send + Sync + 'static,
    {
        self.inner.ensure_unlocked()?;
        let registration = Lifestyle::create_factory_registration::<S, F>(&lifestyle, self, factory);
        self.add_registration::<S, S>(registration)
    }

    /// Register an existing instance. The container never disposes it.
    pub fn register_instance<S: ?Sized + Service>(&self, instance: Arc<S>) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        let registration = Registration::new(
            &self.inner,
            Lifestyle::Singleton,
            ServiceType::of::<S>(),
            RegistrationSource::Instance(erase(instance)),
        );
        registration.suppress_disposal(true);
        self.add_registration::<S, S>(registration)
    }

    /// Register `I` for `S`, used only where `predicate` holds.
    ///
    /// Several conditional registrations may exist for one service; exactly
    /// one must apply to each consumer. Predicates run while dependent
    /// producers are being built and must not resolve through a container
    /// they capture.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use wiregraph::{Component, Constructor, Container, Lifestyle, Parameter, Resolver, ServiceType};
    ///
    /// trait Logger: Send + Sync { fn target(&self) -> &'static str; }
    /// struct FileLogger;
    /// impl Logger for FileLogger { fn target(&self) -> &'static str { "file" } }
    /// struct ConsoleLogger;
    /// impl Logger for ConsoleLogger { fn target(&self) -> &'static str { "console" } }
    /// impl Component for FileLogger {
    ///     fn constructors() -> Vec<Constructor<Self>> { vec![Constructor::new(vec![], |_| Ok(FileLogger))] }
    /// }
    /// impl Component for ConsoleLogger {
    ///     fn constructors() -> Vec<Constructor<Self>> { vec![Constructor::new(vec![], |_| Ok(ConsoleLogger))] }
    /// }
    /// wiregraph::implements!(FileLogger => dyn Logger);
    /// wiregraph::implements!(ConsoleLogger => dyn Logger);
    ///
    /// struct Billing { logger: Arc<dyn Logger> }
    /// impl Component for Billing {
    ///     fn constructors() -> Vec<Constructor<Self>> {
    ///         vec![Constructor::new(vec![Parameter::service::<dyn Logger>("logger")], |a| {
    ///             Ok(Billing { logger: a.next()? })
    ///         })]
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .register_conditional::<dyn Logger, FileLogger, _>(Lifestyle::Singleton, |c| {
    ///         c.consumer().is_some_and(|c| c.implementation_type() == ServiceType::of::<Billing>())
    ///     })
    ///     .unwrap();
    /// container
    ///     .register_conditional::<dyn Logger, ConsoleLogger, _>(Lifestyle::Singleton, |c| !c.handled())
    ///     .unwrap();
    /// container.register_concrete::<Billing>(Lifestyle::Transient).unwrap();
    ///
    /// assert_eq!(container.get::<Billing>().unwrap().logger.target(), "file");
    /// assert_eq!(container.get::<dyn Logger>().unwrap().target(), "console");
    /// ```
    pub fn register_conditional<S, I, P>(&self, lifestyle: Lifestyle, predicate: P) -> DiResult<()>
    where
        S: ?Sized + Service,
        I: Component + Implements<S>,
        P: Fn(&PredicateContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.inner.ensure_unlocked()?;
        let registration = Registration::component::<I>(&self.inner, lifestyle);
        let producer = InstanceProducer::new::<S, I>(registration)?;
        log_registration("conditional", &producer);
        self.inner
            .registry
            .write()
            .insert_conditional(ConditionalProducer { producer, predicate: Arc::new(predicate) })
    }

    /// Register decorator `D` for service `S`.
    ///
    /// `D` declares a [`Parameter::decoratee`](crate::Parameter::decoratee) or
    /// [`Parameter::decoratee_factory`](crate::Parameter::decoratee_factory)
    /// of type `S`. Decorators wrap in registration order: the last
    /// registered is the outermost.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use wiregraph::{Component, Constructor, Container, Lifestyle, Parameter, Resolver};
    ///
    /// trait Sender: Send + Sync { fn send(&self) -> String; }
    /// struct Smtp;
    /// impl Sender for Smtp { fn send(&self) -> String { "smtp".into() } }
    /// impl Component for Smtp {
    ///     fn constructors() -> Vec<Constructor<Self>> { vec![Constructor::new(vec![], |_| Ok(Smtp))] }
    /// }
    /// wiregraph::implements!(Smtp => dyn Sender);
    ///
    /// struct Retrying { inner: Arc<dyn Sender> }
    /// impl Sender for Retrying { fn send(&self) -> String { format!("retry({})", self.inner.send()) } }
    /// impl Component for Retrying {
    ///     fn constructors() -> Vec<Constructor<Self>> {
    ///         vec![Constructor::new(vec![Parameter::decoratee::<dyn Sender>("inner")], |a| {
    ///             Ok(Retrying { inner: a.next()? })
    ///         })]
    ///     }
    /// }
    /// wiregraph::implements!(Retrying => dyn Sender);
    ///
    /// let container = Container::new();
    /// container.register::<dyn Sender, Smtp>(Lifestyle::Singleton).unwrap();
    /// container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();
    /// assert_eq!(container.get::<dyn Sender>().unwrap().send(), "retry(smtp)");
    /// ```
    pub fn register_decorator<S, D>(&self, lifestyle: Lifestyle) -> DiResult<()>
    where
        S: ?Sized + Service,
        D: Component + Implements<S>,
    {
        self.register_decorator_with::<S, D>(lifestyle, DecoratorOptions::default())
    }

    /// Register decorator `D` for `S`, applied where `predicate` holds when
    /// the decorated producer is built.
    pub fn register_decorator_when<S, D, P>(&self, lifestyle: Lifestyle, predicate: P) -> DiResult<()>
    where
        S: ?Sized + Service,
        D: Component + Implements<S>,
        P: Fn(&DecoratorPredicateContext) -> bool + Send + Sync + 'static,
    {
        self.register_decorator_with::<S, D>(lifestyle, DecoratorOptions::new().when(predicate))
    }

    pub fn register_decorator_with<S, D>(&self, lifestyle: Lifestyle, options: DecoratorOptions) -> DiResult<()>
    where
        S: ?Sized + Service,
        D: Component + Implements<S>,
    {
        self.add_decorator(DecoratorRegistration::exact(Closing::component::<S, D>(), lifestyle, options))
    }

    /// Register a function decorating every `S`.
    pub fn register_decorator_fn<S, F>(&self, lifestyle: Lifestyle, decorator: F) -> DiResult<()>
    where
        S: ?Sized + Service,
        F: Fn(Arc<S>, &ResolverContext<'_>) -> DiResult<Arc<S>> + Send + Sync + 'static,
    {
        let service = ServiceType::of::<S>();
        let decorator: FunctionDecorator = Arc::new(move |instance: AnyArc, resolver: &ResolverContext<'_>| {
            let typed = unerase::<S>(&instance).ok_or(DiError::TypeMismatch(service.name()))?;
            decorator(typed, resolver).map(erase::<S>)
        });
        self.add_decorator(DecoratorRegistration::exact(
            Closing::function(service, decorator),
            lifestyle,
            DecoratorOptions::default(),
        ))
    }

    /// Register a [`ServiceDecorator`] object for every `S`.
    pub fn register_service_decorator<S, D>(&self, lifestyle: Lifestyle, decorator: D) -> DiResult<()>
    where
        S: ?Sized + Service,
        D: ServiceDecorator<S>,
    {
        self.register_decorator_fn::<S, _>(lifestyle, move |original, resolver| decorator.decorate(original, resolver))
    }

    pub fn register_open_generic_decorator(&self, decorator: OpenGenericDecorator) -> DiResult<()> {
        let (matcher, lifestyle, options) = decorator.into_parts();
        matcher.validate()?;
        self.add_decorator(DecoratorRegistration::open_generic(matcher, lifestyle, options))
    }

    fn add_decorator(&self, decorator: DecoratorRegistration) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        debug!(
            target: "wiregraph",
            decorator = decorator.id(),
            lifestyle = decorator.lifestyle().name(),
            "Registering decorator"
        );
        self.inner.registry.write().decorators.push(Arc::new(decorator));
        Ok(())
    }

    /// Register an open-generic registration, consulted for services with no
    /// explicit registration.
    pub fn register_open_generic(&self, open_generic: OpenGeneric) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        open_generic.validate()?;
        debug!(
            target: "wiregraph",
            pattern = %open_generic.pattern(),
            lifestyle = open_generic.lifestyle().name(),
            "Registering open generic"
        );
        self.inner.registry.write().open_generics.push(Arc::new(open_generic));
        Ok(())
    }

    /// Append `I` to the container-controlled collection of `S`.
    pub fn append_to_collection<S, I>(&self, lifestyle: Lifestyle) -> DiResult<()>
    where
        S: ?Sized + Service,
        I: Component + Implements<S>,
    {
        self.inner.ensure_unlocked()?;
        let registration = Registration::component::<I>(&self.inner, lifestyle);
        self.append_producer(InstanceProducer::new::<S, I>(registration)?)
    }

    /// Append a producer to the container-controlled collection of its service.
    pub fn append_producer(&self, producer: Arc<InstanceProducer>) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        self.ensure_owned(producer.registration())?;
        log_registration("collection element", &producer);
        self.inner.registry.write().append(producer)
    }

    /// Register a fixed collection of existing instances.
    ///
    /// The container does not create or dispose the elements. Decorators of
    /// `S` are applied to each element on enumeration.
    pub fn register_collection<S: ?Sized + Service>(&self, elements: Vec<Arc<S>>) -> DiResult<()> {
        let elements = Elements::Fixed(elements.into_iter().map(erase::<S>).collect());
        self.register_uncontrolled::<S>(elements)
    }

    /// Register a collection whose elements are enumerated from `source` on
    /// every resolution.
    pub fn register_collection_source<S, F>(&self, source: F) -> DiResult<()>
    where
        S: ?Sized + Service,
        F: Fn() -> Vec<Arc<S>> + Send + Sync + 'static,
    {
        let source: ElementSource = Arc::new(move || source().into_iter().map(erase::<S>).collect());
        self.register_uncontrolled::<S>(Elements::Dynamic(source))
    }

    fn register_uncontrolled<S: ?Sized + Service>(&self, elements: Elements) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        let service = ServiceType::of::<S>();
        let collection = CollectionProducer::new(
            service,
            CollectionSource::Uncontrolled { elements, identity: instance_address::<S> },
        );
        debug!(target: "wiregraph", service = service.name(), "Registering uncontrolled collection");
        let allow_overriding = self.inner.options().allow_overriding_registrations;
        self.inner.registry.write().insert_uncontrolled(collection, allow_overriding)
    }

    /// Run `f` on every new `I` after property injection.
    pub fn register_initializer<I, F>(&self, f: F) -> DiResult<()>
    where
        I: Service,
        F: Fn(&I) + Send + Sync + 'static,
    {
        self.inner.ensure_unlocked()?;
        let implementation = ServiceType::of::<I>();
        debug!(target: "wiregraph", implementation = implementation.name(), "Registering initializer");
        self.inner.registry.write().initializers.push((implementation, initializer::<I, F>(f)));
        Ok(())
    }

    /// Register service `S` using an existing registration of `I`.
    ///
    /// Services registered from the same registration share its instances.
    pub fn add_registration<S, I>(&self, registration: Arc<Registration>) -> DiResult<()>
    where
        S: ?Sized + Service,
        I: ?Sized + Implements<S>,
    {
        self.add_producer(InstanceProducer::new::<S, I>(registration)?)
    }

    /// Register an explicitly built producer.
    pub fn add_producer(&self, producer: Arc<InstanceProducer>) -> DiResult<()> {
        self.inner.ensure_unlocked()?;
        self.ensure_owned(producer.registration())?;
        log_registration("service", &producer);
        let allow_overriding = self.inner.options().allow_overriding_registrations;
        self.inner.registry.write().insert_single(producer, allow_overriding)
    }

    /// Subscribe a handler asked for producers of unregistered services.
    ///
    /// Handlers run in subscription order on the first request of a missing
    /// service; the first one to supply a producer wins and the result is
    /// cached. Handlers are consulted before the container takes its build
    /// lock, so they may resolve other services through the container they
    /// are handed.
    pub fn on_resolve_unregistered_type<F>(&self, handler: F) -> DiResult<()>
    where
        F: Fn(&mut UnregisteredTypeEventArgs) + Send + Sync + 'static,
    {
        self.inner.ensure_unlocked()?;
        self.inner.registry.write().handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Registered producers in registration order, conditional ones included.
    pub fn registrations(&self) -> Vec<Arc<InstanceProducer>> {
        let registry = self.inner.registry.read();
        registry
            .order
            .iter()
            .filter_map(|service| registry.services.get(&service.id()))
            .flat_map(|entry| match entry {
                ServiceEntry::Single(producer) => vec![producer.clone()],
                ServiceEntry::Conditional(candidates) => {
                    candidates.iter().map(|candidate| candidate.producer.clone()).collect()
                }
            })
            .collect()
    }

    /// The producer registered for `S`, if it has a single unconditional one.
    pub fn get_registration<S: ?Sized + Service>(&self) -> Option<Arc<InstanceProducer>> {
        let service = ServiceType::of::<S>();
        if let Some(producer) = self.inner.resolved.get(&service.id()) {
            return Some(producer.clone());
        }
        match self.inner.registry.read().services.get(&service.id()) {
            Some(ServiceEntry::Single(producer)) => Some(producer.clone()),
            _ => None,
        }
    }

    pub(crate) fn ensure_owned(&self, registration: &Registration) -> DiResult<()> {
        if registration.container_id() != self.inner.id() {
            return Err(DiError::InvalidRegistration {
                service: registration.implementation_type().name(),
                reason: "the registration was created for a different container".into(),
            });
        }
        Ok(())
    }
}

fn log_registration(kind: &'static str, producer: &InstanceProducer) {
    debug!(
        target: "wiregraph",
        kind,
        service = producer.service_type().name(),
        implementation = producer.implementation_type().name(),
        lifestyle = producer.lifestyle().name(),
        "Registering service"
    );
}
