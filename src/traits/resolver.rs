//! Resolver traits for service resolution.

use std::sync::Arc;

use crate::error::{DiError, DiResult};
use crate::internal::{BoxFutureUnit, Disposer};
use crate::key::{unerase, AnyArc, Service, ServiceType};
use crate::traits::{AsyncDispose, Dispose};

/// Core resolver trait for object-safe service resolution.
///
/// This trait provides the non-generic resolution surface that can be used as
/// a trait object: resolving a single erased instance, resolving a collection,
/// and registering disposal hooks with whatever owns the current resolution
/// (a scope, or the container for singletons).
///
/// Most users should use the [`Resolver`] trait instead, which provides
/// typed generic methods built on top of this trait.
pub trait ResolverCore: Send + Sync {
    /// Resolves a single service.
    ///
    /// Returns the instance erased as `Arc<dyn Any>` wrapping an `Arc<S>` for
    /// the requested service type.
    ///
    /// # Returns
    ///
    /// * `Ok(AnyArc)` - The resolved instance
    /// * `Err(DiError)` - Resolution error (not registered, no active scope, cycle, etc.)
    fn resolve_any(&self, service: &ServiceType) -> DiResult<AnyArc>;

    /// Resolves every element of the collection registered for a service, in
    /// registration order.
    fn resolve_all(&self, service: &ServiceType) -> DiResult<Vec<AnyArc>>;

    /// Registers a disposal hook with the owner of the current resolution.
    fn push_disposer(&self, disposer: Disposer);
}

/// High-level resolver interface with generic methods for type-safe service resolution.
///
/// `Container` resolves against the ambient scope, `Scope` against itself, and
/// `ResolverContext` (handed to factories) against the scope of the resolution
/// in progress.
///
/// # Examples
///
/// ```
/// use wiregraph::{Container, Lifestyle, Resolver};
/// use std::sync::Arc;
///
/// trait Logger: Send + Sync {
///     fn log(&self, msg: &str) -> String;
/// }
///
/// struct ConsoleLogger;
/// impl Logger for ConsoleLogger {
///     fn log(&self, msg: &str) -> String {
///         format!("LOG: {}", msg)
///     }
/// }
///
/// let container = Container::new();
/// container.register_instance(Arc::new(42usize)).unwrap();
/// container
///     .register_factory::<dyn Logger, _>(Lifestyle::Singleton, |_| Ok(Arc::new(ConsoleLogger)))
///     .unwrap();
///
/// assert_eq!(*container.get_required::<usize>(), 42);
/// let logger = container.get::<dyn Logger>().unwrap();
/// assert_eq!(logger.log("resolved"), "LOG: resolved");
/// ```
pub trait Resolver: ResolverCore {
    /// Resolves a service, concrete or trait object.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<S>)` - The resolved instance
    /// * `Err(DiError)` - Resolution error
    fn get<S: ?Sized + Service>(&self) -> DiResult<Arc<S>> {
        let service = ServiceType::of::<S>();
        let any = self.resolve_any(&service)?;
        unerase::<S>(&any).ok_or(DiError::TypeMismatch(service.name()))
    }

    /// Resolves a service, panicking on failure.
    ///
    /// Use this when the registration is known to exist and a configuration
    /// error should fail fast.
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be resolved.
    fn get_required<S: ?Sized + Service>(&self) -> Arc<S> {
        self.get::<S>()
            .unwrap_or_else(|e| panic!("Failed to resolve {}: {}", std::any::type_name::<S>(), e))
    }

    /// Resolves every element of the collection registered for `S`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiregraph::{Component, Constructor, Container, Implements, Lifestyle, Resolver};
    /// use std::sync::Arc;
    ///
    /// trait Plugin: Send + Sync {
    ///     fn name(&self) -> &str;
    /// }
    ///
    /// struct PluginA;
    /// impl Plugin for PluginA {
    ///     fn name(&self) -> &str { "Plugin A" }
    /// }
    /// impl Component for PluginA {
    ///     fn constructors() -> Vec<Constructor<Self>> {
    ///         vec![Constructor::new(vec![], |_| Ok(PluginA))]
    ///     }
    /// }
    /// wiregraph::implements!(PluginA => dyn Plugin);
    ///
    /// let container = Container::new();
    /// container.append_to_collection::<dyn Plugin, PluginA>(Lifestyle::Singleton).unwrap();
    /// container.append_to_collection::<dyn Plugin, PluginA>(Lifestyle::Transient).unwrap();
    ///
    /// let plugins = container.get_all::<dyn Plugin>().unwrap();
    /// assert_eq!(plugins.len(), 2);
    /// assert_eq!(plugins[0].name(), "Plugin A");
    /// ```
    fn get_all<S: ?Sized + Service>(&self) -> DiResult<Vec<Arc<S>>> {
        let service = ServiceType::of::<S>();
        self.resolve_all(&service)?
            .iter()
            .map(|any| unerase::<S>(any).ok_or(DiError::TypeMismatch(service.name())))
            .collect()
    }

    /// Registers an instance for synchronous disposal.
    ///
    /// Factories call this for instances they create themselves; the hook runs
    /// when the owning scope (or the container, for singletons) is disposed,
    /// in reverse registration order.
    fn register_disposer<T: Dispose>(&self, instance: Arc<T>) {
        self.push_disposer(Disposer::sync(
            std::any::type_name::<T>(),
            Box::new(move || instance.dispose()),
        ));
    }

    /// Registers an instance for asynchronous disposal.
    fn register_async_disposer<T: AsyncDispose>(&self, instance: Arc<T>) {
        self.push_disposer(Disposer::asynchronous(
            std::any::type_name::<T>(),
            Box::new(move || -> BoxFutureUnit {
                Box::pin(async move {
                    instance.dispose().await;
                })
            }),
        ));
    }
}

impl<R: ResolverCore + ?Sized> Resolver for R {}
