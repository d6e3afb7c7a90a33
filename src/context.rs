//! Resolution context handed to compiled creators and user factories.

use std::sync::Arc;

use tracing::trace;

use crate::container::{Container, ContainerInner};
use crate::error::DiResult;
use crate::internal::Disposer;
use crate::key::{AnyArc, ServiceType};
use crate::scope::Scope;
use crate::traits::ResolverCore;

/// Who receives disposables created during an activation.
#[derive(Clone, Copy)]
pub(crate) enum Owner<'a> {
    Scope(&'a Scope),
    Root,
    Untracked,
}

/// State of one resolution in progress.
///
/// Compiled [`InstanceCreator`](crate::InstanceCreator)s receive an
/// activation; custom lifestyles pass it through to the creator they wrap.
/// It carries the explicitly supplied scope, if any, and the owner that
/// newly created disposable instances are registered with.
pub struct Activation<'a> {
    pub(crate) container: &'a Arc<ContainerInner>,
    pub(crate) scope: Option<&'a Scope>,
    pub(crate) owner: Owner<'a>,
    pub(crate) element: Option<&'a AnyArc>,
}

impl<'a> Activation<'a> {
    pub(crate) fn new(container: &'a Arc<ContainerInner>, scope: Option<&'a Scope>) -> Self {
        Self {
            container,
            scope,
            owner: scope.map(Owner::Scope).unwrap_or(Owner::Untracked),
            element: None,
        }
    }

    /// Activation for building a singleton: no explicit scope, disposables
    /// owned by the container.
    pub(crate) fn for_singleton(&self) -> Activation<'a> {
        Activation { container: self.container, scope: None, owner: Owner::Root, element: None }
    }

    /// Activation for building an instance cached in `scope`.
    pub(crate) fn within<'b>(&self, scope: &'b Scope) -> Activation<'b>
    where
        'a: 'b,
    {
        Activation { container: self.container, scope: Some(scope), owner: Owner::Scope(scope), element: None }
    }

    /// Activation decorating one element of an uncontrolled collection.
    pub(crate) fn with_element<'b>(&'b self, element: &'b AnyArc) -> Activation<'b> {
        Activation { container: self.container, scope: self.scope, owner: self.owner, element: Some(element) }
    }

    /// Activation for a resolution requested from inside this one.
    pub(crate) fn nested(&self) -> Activation<'a> {
        Activation { container: self.container, scope: self.scope, owner: self.owner, element: None }
    }

    /// Register a disposer with the owner of this activation.
    pub(crate) fn track(&self, disposer: Disposer) {
        match self.owner {
            Owner::Scope(scope) => scope.track(disposer),
            Owner::Root => self.container.track_singleton(disposer),
            Owner::Untracked => {
                trace!(
                    target: "wiregraph",
                    instance = disposer.instance(),
                    "Disposable created outside any scope is not tracked"
                );
            }
        }
    }

    /// The scope explicitly supplied to this resolution.
    pub fn scope(&self) -> Option<&Scope> {
        self.scope
    }

    /// The container performing the resolution.
    pub fn container(&self) -> Container {
        Container::from_inner(self.container.clone())
    }
}

/// Resolver handed to factory closures.
///
/// Resolves against the same scope as the resolution that invoked the
/// factory, and registers disposers with the owner of that resolution.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wiregraph::{Container, Lifestyle, Resolver, ThreadScopedLifestyle};
///
/// struct Connection(u32);
/// struct Repository { connection: Arc<Connection> }
///
/// let container = Container::new();
/// container.register_factory::<Connection, _>(Lifestyle::Scoped, |_| Ok(Arc::new(Connection(7)))).unwrap();
/// container
///     .register_factory::<Repository, _>(Lifestyle::Transient, |r| {
///         Ok(Arc::new(Repository { connection: r.get::<Connection>()? }))
///     })
///     .unwrap();
///
/// let scope = ThreadScopedLifestyle::begin_scope(&container);
/// let a = container.get::<Repository>().unwrap();
/// let b = container.get::<Repository>().unwrap();
/// assert!(Arc::ptr_eq(&a.connection, &b.connection));
/// scope.dispose().unwrap();
/// ```
pub struct ResolverContext<'a> {
    activation: &'a Activation<'a>,
}

impl<'a> ResolverContext<'a> {
    pub(crate) fn new(activation: &'a Activation<'a>) -> Self {
        Self { activation }
    }

    /// The scope explicitly supplied to the current resolution.
    pub fn scope(&self) -> Option<&Scope> {
        self.activation.scope
    }

    /// The container performing the resolution.
    pub fn container(&self) -> Container {
        self.activation.container()
    }
}

impl ResolverCore for ResolverContext<'_> {
    fn resolve_any(&self, service: &ServiceType) -> DiResult<AnyArc> {
        let activation = self.activation.nested();
        self.activation.container.resolve_with(*service, &activation)
    }

    fn resolve_all(&self, service: &ServiceType) -> DiResult<Vec<AnyArc>> {
        let activation = self.activation.nested();
        self.activation.container.resolve_all_with(*service, &activation)
    }

    fn push_disposer(&self, disposer: Disposer) {
        self.activation.track(disposer);
    }
}
