//! Service lifestyle definitions.

use std::fmt;
use std::sync::Arc;

use crate::component::{Component, ComponentModel};
use crate::container::Container;
use crate::context::{Activation, ResolverContext};
use crate::error::DiResult;
use crate::expression::{InstanceCreator, UserFactory};
use crate::key::{erase, Service, ServiceType};
use crate::registration::{Registration, RegistrationSource};
use crate::scope::{ambient, Scope};

/// Service lifestyles controlling instance caching behavior
///
/// A lifestyle decides how long an instance lives and who shares it. Each
/// lifestyle has a *length*, used by verification to flag components that
/// depend on something shorter lived than themselves.
///
/// | Lifestyle | Caching | Length |
/// |-----------|---------|--------|
/// | `Transient` | none, new instance per resolution | 1 |
/// | `Scoped` / `ScopedWith` | one instance per scope | 500 |
/// | `Singleton` | one instance per container | 1000 |
/// | `Custom` | decided by the user function | user defined |
///
/// `Scoped` means the container's default scoped lifestyle
/// ([`ContainerOptions::default_scoped_lifestyle`](crate::ContainerOptions)),
/// fixed when the registration is created.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use wiregraph::{Container, Lifestyle, Resolver, ThreadScopedLifestyle};
///
/// struct Database { url: String }
/// struct UnitOfWork;
/// struct Request;
///
/// let container = Container::new();
/// container.register_factory::<Database, _>(Lifestyle::Singleton, |_| {
///     Ok(Arc::new(Database { url: "postgres://localhost".into() }))
/// }).unwrap();
/// container.register_factory::<UnitOfWork, _>(Lifestyle::Scoped, |_| Ok(Arc::new(UnitOfWork))).unwrap();
/// container.register_factory::<Request, _>(Lifestyle::Transient, |_| Ok(Arc::new(Request))).unwrap();
///
/// let scope = ThreadScopedLifestyle::begin_scope(&container);
///
/// // Singleton: same instance everywhere
/// let db1 = container.get::<Database>().unwrap();
/// let db2 = scope.get::<Database>().unwrap();
/// assert!(Arc::ptr_eq(&db1, &db2));
///
/// // Scoped: same instance within the scope
/// let uow1 = container.get::<UnitOfWork>().unwrap();
/// let uow2 = container.get::<UnitOfWork>().unwrap();
/// assert!(Arc::ptr_eq(&uow1, &uow2));
///
/// // Transient: always a new instance
/// let r1 = container.get::<Request>().unwrap();
/// let r2 = container.get::<Request>().unwrap();
/// assert!(!Arc::ptr_eq(&r1, &r2));
///
/// scope.dispose().unwrap();
/// ```
#[derive(Clone)]
pub enum Lifestyle {
    /// New instance per resolution, never cached
    Transient,
    /// Single instance per container, created on first use
    Singleton,
    /// Single instance per scope of the container's default scoped lifestyle
    Scoped,
    /// Single instance per scope of a specific scoped lifestyle
    ScopedWith(ScopedLifestyle),
    /// User-defined caching strategy
    Custom(CustomLifestyle),
}

impl Lifestyle {
    /// Create a custom lifestyle.
    ///
    /// `wrap` receives the creator for the undecorated instance and returns
    /// the creator the container uses instead. It is called once per
    /// registration, when the registration is compiled.
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use parking_lot::Mutex;
    /// use wiregraph::{Container, Lifestyle, Resolver};
    ///
    /// // Caches the first instance per registration, like a singleton that
    /// // is allowed to depend on anything.
    /// let sticky = Lifestyle::custom("Sticky", 900, |creator| {
    ///     let cache = Arc::new(Mutex::new(None));
    ///     wiregraph::instance_creator(move |activation| {
    ///         let mut slot = cache.lock();
    ///         if let Some(instance) = &*slot {
    ///             return Ok(Arc::clone(instance));
    ///         }
    ///         let instance = creator(activation)?;
    ///         *slot = Some(instance.clone());
    ///         Ok(instance)
    ///     })
    /// });
    ///
    /// struct Settings;
    /// let container = Container::new();
    /// container.register_factory::<Settings, _>(sticky, |_| Ok(Arc::new(Settings))).unwrap();
    /// let a = container.get::<Settings>().unwrap();
    /// let b = container.get::<Settings>().unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// ```
    pub fn custom<F>(name: &'static str, length: u32, wrap: F) -> Self
    where
        F: Fn(InstanceCreator) -> InstanceCreator + Send + Sync + 'static,
    {
        Lifestyle::Custom(CustomLifestyle { name, length, wrap: Arc::new(wrap) })
    }

    /// Display name of the lifestyle.
    pub fn name(&self) -> &'static str {
        match self {
            Lifestyle::Transient => "Transient",
            Lifestyle::Singleton => "Singleton",
            Lifestyle::Scoped => "Scoped",
            Lifestyle::ScopedWith(scoped) => scoped.name(),
            Lifestyle::Custom(custom) => custom.name,
        }
    }

    /// Relative lifetime, used by the lifestyle-mismatch diagnostic.
    pub fn length(&self) -> u32 {
        match self {
            Lifestyle::Transient => 1,
            Lifestyle::Scoped | Lifestyle::ScopedWith(_) => 500,
            Lifestyle::Singleton => 1000,
            Lifestyle::Custom(custom) => custom.length,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Lifestyle::Transient)
    }

    /// Create a registration that auto-wires `I` with this lifestyle.
    ///
    /// Registrations can be shared between services through
    /// [`Container::add_registration`]; every service then gets the same
    /// cached instance.
    pub fn create_registration<I: Component>(&self, container: &Container) -> Arc<Registration> {
        Registration::new(
            container.inner(),
            self.clone(),
            ServiceType::of::<I>(),
            RegistrationSource::Component(ComponentModel::of::<I>()),
        )
    }

    /// Create a registration whose instances come from `factory`.
    pub fn create_factory_registration<S, F>(&self, container: &Container, factory: F) -> Arc<Registration>
    where
        S: ?Sized + Service,
        F: Fn(&ResolverContext<'_>) -> DiResult<Arc<S>> + Send + Sync + 'static,
    {
        let factory: UserFactory = Arc::new(move |resolver: &ResolverContext<'_>| factory(resolver).map(erase::<S>));
        Registration::new(
            container.inner(),
            self.clone(),
            ServiceType::of::<S>(),
            RegistrationSource::Factory(factory),
        )
    }

    /// Replace `Scoped` with the container's default scoped lifestyle.
    pub(crate) fn normalize(self, default_scoped: ScopedLifestyle) -> Self {
        match self {
            Lifestyle::Scoped => Lifestyle::ScopedWith(default_scoped),
            other => other,
        }
    }
}

impl PartialEq for Lifestyle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Lifestyle::Transient, Lifestyle::Transient)
            | (Lifestyle::Singleton, Lifestyle::Singleton)
            | (Lifestyle::Scoped, Lifestyle::Scoped) => true,
            (Lifestyle::ScopedWith(a), Lifestyle::ScopedWith(b)) => a == b,
            (Lifestyle::Custom(a), Lifestyle::Custom(b)) => a.name == b.name && a.length == b.length,
            _ => false,
        }
    }
}

impl fmt::Debug for Lifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a scoped lifestyle finds the scope of the current operation.
///
/// An explicitly passed scope (resolving through [`Scope`]) always wins.
/// Without one:
///
/// - `ThreadScoped` uses the innermost active scope begun on the current
///   thread with [`ThreadScopedLifestyle::begin_scope`](crate::ThreadScopedLifestyle::begin_scope)
/// - `Flowing` has no ambient scope; instances must be resolved through a `Scope`
/// - `AsyncScoped` uses the innermost scope of the current async flow
///   (requires the `async` feature)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopedLifestyle {
    ThreadScoped,
    Flowing,
    #[cfg(feature = "async")]
    AsyncScoped,
}

impl ScopedLifestyle {
    pub fn name(&self) -> &'static str {
        match self {
            ScopedLifestyle::ThreadScoped => "Thread Scoped",
            ScopedLifestyle::Flowing => "Flowing",
            #[cfg(feature = "async")]
            ScopedLifestyle::AsyncScoped => "Async Scoped",
        }
    }

    /// The ambient scope of `container` for this lifestyle, if one is active.
    pub fn current_scope_of(&self, container: &Container) -> Option<Scope> {
        self.ambient(container.inner().id())
    }

    pub(crate) fn current_scope(&self, activation: &Activation<'_>) -> Option<Scope> {
        match activation.scope {
            Some(scope) => Some(scope.clone()),
            None => self.ambient(activation.container.id()),
        }
    }

    fn ambient(&self, container_id: u64) -> Option<Scope> {
        match self {
            ScopedLifestyle::ThreadScoped => ambient::current_thread_scope(container_id),
            ScopedLifestyle::Flowing => None,
            #[cfg(feature = "async")]
            ScopedLifestyle::AsyncScoped => ambient::current_async_scope(container_id),
        }
    }

    pub(crate) fn hint(&self) -> &'static str {
        match self {
            ScopedLifestyle::ThreadScoped => {
                "Begin a scope with ThreadScopedLifestyle::begin_scope on the resolving thread."
            }
            ScopedLifestyle::Flowing => "Resolve the instance through a Scope.",
            #[cfg(feature = "async")]
            ScopedLifestyle::AsyncScoped => {
                "Run the operation inside AsyncScopedLifestyle::run_in_scope."
            }
        }
    }
}

/// A user-defined lifestyle. Create with [`Lifestyle::custom`].
#[derive(Clone)]
pub struct CustomLifestyle {
    name: &'static str,
    length: u32,
    wrap: Arc<dyn Fn(InstanceCreator) -> InstanceCreator + Send + Sync>,
}

impl CustomLifestyle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub(crate) fn wrap(&self, creator: InstanceCreator) -> InstanceCreator {
        (self.wrap)(creator)
    }
}

impl fmt::Debug for CustomLifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomLifestyle")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish()
    }
}
