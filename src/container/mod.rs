//! The container: registrations, resolution and singleton ownership.
//!
//! Registration happens through `&self` methods and is allowed until the
//! first call to `get`, `get_all` or `verify`, which locks the container.
//! After that, producers are looked up through a concurrent cache and
//! resolution runs compiled creators without taking locks.

mod registry;
mod unregistered;
mod verification;

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, trace};

use crate::collection::{CollectionProducer, CollectionSource};
use crate::component::{Initializer, Parameter, ParameterKind};
use crate::conditional::{self, InjectionConsumer};
use crate::context::Activation;
use crate::decoration::DecoratorRegistration;
use crate::error::{DiError, DiResult, DisposalFailure};
use crate::internal::{dispose_all, dispose_all_async, next_id, DisposeBag, Disposer, StackGuard};
use crate::key::{AnyArc, ServiceType};
use crate::options::ContainerOptions;
use crate::producer::InstanceProducer;
use crate::registration::Registration;
use crate::scope::Scope;
use crate::traits::ResolverCore;

pub(crate) use registry::{CollectionEntry, Registry, ServiceEntry};
pub use unregistered::UnregisteredTypeEventArgs;

type ProducerCache<T> = DashMap<TypeId, Arc<T>, ahash::RandomState>;

/// Dependency injection container.
///
/// `Container` is a cheap, clonable handle; clones share registrations,
/// singletons and caches. Resolving through the container uses the ambient
/// scope of each scoped lifestyle. Resolve through a [`Scope`] to supply one
/// explicitly.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wiregraph::{Component, Constructor, Container, Lifestyle, Parameter, Resolver};
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
/// struct FixedClock;
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 { 42 }
/// }
/// impl Component for FixedClock {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(vec![], |_| Ok(FixedClock))]
///     }
/// }
/// wiregraph::implements!(FixedClock => dyn Clock);
///
/// struct Scheduler {
///     clock: Arc<dyn Clock>,
/// }
/// impl Component for Scheduler {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(vec![Parameter::service::<dyn Clock>("clock")], |args| {
///             Ok(Scheduler { clock: args.next()? })
///         })]
///     }
/// }
///
/// let container = Container::new();
/// container.register::<dyn Clock, FixedClock>(Lifestyle::Singleton).unwrap();
/// container.register_concrete::<Scheduler>(Lifestyle::Transient).unwrap();
/// container.verify().unwrap();
///
/// let scheduler = container.get::<Scheduler>().unwrap();
/// assert_eq!(scheduler.clock.now(), 42);
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    id: u64,
    options: RwLock<ContainerOptions>,
    registry: RwLock<Registry>,
    locked: AtomicBool,
    disposed: AtomicBool,
    pub(crate) build_lock: ReentrantMutex<()>,
    resolved: ProducerCache<InstanceProducer>,
    resolved_collections: ProducerCache<CollectionProducer>,
    singletons: Mutex<DisposeBag>,
}

impl Container {
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        let inner = Arc::new(ContainerInner {
            id: next_id(),
            options: RwLock::new(options),
            registry: RwLock::new(Registry::default()),
            locked: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            build_lock: ReentrantMutex::new(()),
            resolved: DashMap::with_hasher(ahash::RandomState::new()),
            resolved_collections: DashMap::with_hasher(ahash::RandomState::new()),
            singletons: Mutex::new(DisposeBag::default()),
        });

        debug!(target: "wiregraph", container = inner.id, "Container created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// A copy of the current options.
    pub fn options(&self) -> ContainerOptions {
        self.inner.options()
    }

    /// Change the options. Registrations made earlier keep the default scoped
    /// lifestyle they were created with.
    pub fn configure<F>(&self, f: F) -> DiResult<()>
    where
        F: FnOnce(&mut ContainerOptions) -> DiResult<()>,
    {
        self.inner.ensure_unlocked()?;
        let mut options = self.inner.options.write();
        f(&mut options)?;
        debug!(target: "wiregraph", container = self.inner.id, options = ?*options, "Container configured");
        Ok(())
    }

    /// Whether the container has been locked by its first resolution.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Begin a scope that is not ambient. Scoped instances are cached in it
    /// when resolving through it.
    pub fn begin_scope(&self) -> Scope {
        Scope::new(&self.inner, None, None)
    }

    /// Dispose every disposable singleton, in reverse creation order.
    ///
    /// Every disposer runs even when some fail; failures are returned
    /// together. Resolution fails with [`DiError::ContainerDisposed`]
    /// afterwards. Disposing twice does nothing.
    pub fn dispose(&self) -> DiResult<()> {
        into_result(self.inner.dispose())
    }

    /// Dispose every disposable singleton, awaiting async disposers.
    pub async fn dispose_async(&self) -> DiResult<()> {
        if !self.inner.begin_dispose() {
            return Ok(());
        }
        let entries = self.inner.singletons.lock().take();
        let failures = dispose_all_async(entries).await;
        self.inner.log_disposed(&failures);
        into_result(failures)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("services", &registry.services.len())
            .field("collections", &registry.collections.len())
            .field("decorators", &registry.decorators.len())
            .field("locked", &self.is_locked())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ResolverCore for Container {
    fn resolve_any(&self, service: &ServiceType) -> DiResult<AnyArc> {
        self.inner.resolve(*service, None)
    }

    fn resolve_all(&self, service: &ServiceType) -> DiResult<Vec<AnyArc>> {
        self.inner.resolve_all(*service, None)
    }

    fn push_disposer(&self, disposer: Disposer) {
        self.inner.track_singleton(disposer);
    }
}

impl ContainerInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn options(&self) -> ContainerOptions {
        self.options.read().clone()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_unlocked(&self) -> DiResult<()> {
        if self.is_disposed() {
            return Err(DiError::ContainerDisposed);
        }
        if self.locked.load(Ordering::Acquire) {
            return Err(DiError::Locked);
        }
        Ok(())
    }

    fn lock(&self) {
        if !self.locked.swap(true, Ordering::AcqRel) {
            let registry = self.registry.read();
            debug!(
                target: "wiregraph",
                container = self.id,
                services = registry.services.len(),
                collections = registry.collections.len(),
                decorators = registry.decorators.len(),
                "Container locked"
            );
        }
    }

    fn ensure_usable(&self, scope: Option<&Scope>) -> DiResult<()> {
        if self.is_disposed() {
            return Err(DiError::ContainerDisposed);
        }
        if let Some(scope) = scope {
            if scope.is_disposed() {
                return Err(DiError::ScopeDisposed { scope: scope.id() });
            }
        }
        Ok(())
    }

    /// Top-level resolution of `service`, locking the container.
    pub(crate) fn resolve(self: &Arc<Self>, service: ServiceType, scope: Option<&Scope>) -> DiResult<AnyArc> {
        self.ensure_usable(scope)?;
        self.lock();
        let activation = Activation::new(self, scope);
        self.resolve_with(service, &activation)
    }

    pub(crate) fn resolve_all(self: &Arc<Self>, service: ServiceType, scope: Option<&Scope>) -> DiResult<Vec<AnyArc>> {
        self.ensure_usable(scope)?;
        self.lock();
        let activation = Activation::new(self, scope);
        self.resolve_all_with(service, &activation)
    }

    /// Resolution within an activation, for top-level calls and for
    /// resolvers handed to factories.
    pub(crate) fn resolve_with(self: &Arc<Self>, service: ServiceType, activation: &Activation<'_>) -> DiResult<AnyArc> {
        let _frame = StackGuard::resolve(service)?;
        let producer = self
            .producer_for(service, None)?
            .ok_or_else(|| DiError::NotRegistered { service: service.name(), chain: Vec::new() })?;

        trace!(
            target: "wiregraph",
            service = service.name(),
            implementation = producer.implementation_type().name(),
            "Resolving service"
        );
        producer.create(self, activation)
    }

    pub(crate) fn resolve_all_with(
        self: &Arc<Self>,
        service: ServiceType,
        activation: &Activation<'_>,
    ) -> DiResult<Vec<AnyArc>> {
        let _frame = StackGuard::resolve_collection(service)?;
        let collection = self
            .collection_for(service)?
            .ok_or_else(|| DiError::NotRegistered { service: service.name(), chain: Vec::new() })?;

        trace!(target: "wiregraph", service = service.name(), "Resolving collection");
        let creator = collection.creator(self)?;
        creator(activation)
    }

    /// The producer of `service` for `consumer`.
    ///
    /// Looks in the resolved cache, then the registered services, then the
    /// open-generic registrations, then asks the unregistered-type handlers
    /// in subscription order. Conditional registrations are selected per
    /// consumer and are not cached; everything else is cached, first insert
    /// winning.
    pub(crate) fn producer_for(
        self: &Arc<Self>,
        service: ServiceType,
        consumer: Option<&InjectionConsumer>,
    ) -> DiResult<Option<Arc<InstanceProducer>>> {
        if let Some(producer) = self.resolved.get(&service.id()) {
            return Ok(Some(producer.clone()));
        }

        let entry = self.registry.read().services.get(&service.id()).cloned();
        match entry {
            Some(ServiceEntry::Single(producer)) => return Ok(Some(self.cache_producer(service, producer))),
            Some(ServiceEntry::Conditional(candidates)) => {
                return conditional::select(service, &candidates, consumer)
            }
            None => {}
        }

        let open_generics = self.registry.read().open_generics.clone();
        for open_generic in &open_generics {
            if let Some(producer) = open_generic.producer_for(self, service)? {
                trace!(
                    target: "wiregraph",
                    service = service.name(),
                    pattern = %open_generic.pattern(),
                    "Open generic registration closed"
                );
                return Ok(Some(self.cache_producer(service, producer)));
            }
        }

        let handlers = self.registry.read().handlers.clone();
        for handler in &handlers {
            let mut args = UnregisteredTypeEventArgs::new(service, Container::from_inner(self.clone()));
            handler(&mut args);
            if let Some(producer) = args.into_producer()? {
                debug!(
                    target: "wiregraph",
                    service = service.name(),
                    implementation = producer.implementation_type().name(),
                    "Unregistered type resolved by handler"
                );
                return Ok(Some(self.cache_producer(service, producer)));
            }
        }

        Ok(None)
    }

    /// Look up, ahead of a build, every service reachable from `roots`.
    ///
    /// Unregistered-type handlers receive a [`Container`] and may resolve
    /// through it, so they are consulted here while `build_lock` is free and
    /// their producers land in the resolved cache before the build asks for
    /// them. Lookups failing here are reported again by the build.
    pub(crate) fn prepare_dependencies(self: &Arc<Self>, roots: impl IntoIterator<Item = Arc<Registration>>) {
        if self.build_lock.is_owned_by_current_thread() {
            return;
        }
        let mut pending: Vec<Arc<Registration>> = roots.into_iter().collect();
        let mut seen = HashSet::new();
        while let Some(registration) = pending.pop() {
            if !seen.insert(registration.id()) {
                continue;
            }
            for (service, consumer) in registration.constructor_dependencies() {
                if let Ok(Some(producer)) = self.producer_for(service, Some(&consumer)) {
                    pending.push(producer.registration().clone());
                }
            }
        }
    }

    fn cache_producer(&self, service: ServiceType, producer: Arc<InstanceProducer>) -> Arc<InstanceProducer> {
        self.resolved.entry(service.id()).or_insert(producer).clone()
    }

    pub(crate) fn collection_for(self: &Arc<Self>, service: ServiceType) -> DiResult<Option<Arc<CollectionProducer>>> {
        if let Some(collection) = self.resolved_collections.get(&service.id()) {
            return Ok(Some(collection.clone()));
        }

        let entry = self.registry.read().collections.get(&service.id()).cloned();
        let collection = match entry {
            None => return Ok(None),
            Some(CollectionEntry::Controlled(producers)) => {
                CollectionProducer::new(service, CollectionSource::Controlled(producers))
            }
            Some(CollectionEntry::Uncontrolled(collection)) => collection,
        };
        Ok(Some(self.resolved_collections.entry(service.id()).or_insert(collection).clone()))
    }

    /// Whether `parameter` of `implementation` can be supplied.
    pub(crate) fn can_resolve(
        self: &Arc<Self>,
        implementation: ServiceType,
        parameter: &Parameter,
        in_decorator: bool,
    ) -> bool {
        match parameter.kind() {
            ParameterKind::Service(service) | ParameterKind::Value(service) => {
                let consumer = InjectionConsumer::new(implementation, parameter.name());
                matches!(self.producer_for(service, Some(&consumer)), Ok(Some(_)))
            }
            ParameterKind::Collection(service) => self.registry.read().collections.contains_key(&service.id()),
            ParameterKind::Decoratee(_) | ParameterKind::DecorateeFactory(_) | ParameterKind::DecoratorContext => {
                in_decorator
            }
        }
    }

    pub(crate) fn initializers_for(&self, implementation: ServiceType) -> Vec<Initializer> {
        self.registry
            .read()
            .initializers
            .iter()
            .filter(|(target, _)| *target == implementation)
            .map(|(_, initializer)| initializer.clone())
            .collect()
    }

    pub(crate) fn decorators(&self) -> Vec<Arc<DecoratorRegistration>> {
        self.registry.read().decorators.clone()
    }

    /// Register a disposer owned by the container.
    pub(crate) fn track_singleton(&self, disposer: Disposer) {
        if self.is_disposed() {
            error!(
                target: "wiregraph",
                container = self.id,
                instance = disposer.instance(),
                "Disposable created after the container was disposed; disposing it now"
            );
            for failure in dispose_all(vec![disposer]) {
                error!(target: "wiregraph", container = self.id, %failure, "Disposer failed");
            }
            return;
        }
        self.singletons.lock().push(disposer);
    }

    fn begin_dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    fn dispose(&self) -> Vec<DisposalFailure> {
        if !self.begin_dispose() {
            return Vec::new();
        }
        let entries = self.singletons.lock().take();
        let failures = dispose_all(entries);
        self.log_disposed(&failures);
        failures
    }

    fn log_disposed(&self, failures: &[DisposalFailure]) {
        if failures.is_empty() {
            debug!(target: "wiregraph", container = self.id, "Container disposed");
        } else {
            for failure in failures {
                error!(target: "wiregraph", container = self.id, %failure, "Disposer failed");
            }
        }
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        // Failures are logged by dispose
        let _ = self.dispose();
    }
}

fn into_result(failures: Vec<DisposalFailure>) -> DiResult<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DiError::DisposalFailed { failures })
    }
}
