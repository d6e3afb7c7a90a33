//! Scopes: units of work that cache scoped instances and own their disposal.
//!
//! A scope moves through `Active -> Disposing -> Disposed`. Disposing a scope
//! first disposes its live child scopes (innermost first), then runs its
//! end actions, then its disposers in reverse registration order. Disposing
//! an already disposed scope does nothing.

pub mod ambient;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::container::{Container, ContainerInner};
use crate::error::{DiError, DiResult, DisposalFailure};
use crate::internal::dispose_bag::panic_message;
use crate::internal::{dispose_all, dispose_all_async, BoxFutureUnit, DisposeBag, Disposer};
use crate::key::{AnyArc, ServiceType};
use crate::lifestyle::ScopedLifestyle;
use crate::traits::{AsyncDispose, Dispose, ResolverCore};

pub use ambient::ThreadScopedLifestyle;
#[cfg(feature = "async")]
pub use ambient::AsyncScopedLifestyle;

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

type EndAction = Box<dyn FnOnce() + Send>;

/// A unit of work caching scoped instances.
///
/// `Scope` is a cheap, clonable handle. Resolving through a scope uses that
/// scope for every scoped registration in the graph, whatever the scoped
/// lifestyle; resolving through the [`Container`] uses the ambient scope of
/// the lifestyle instead.
///
/// A scope is disposed explicitly with [`dispose`](Scope::dispose) or
/// [`dispose_async`](Scope::dispose_async), or implicitly when the last
/// handle is dropped. Implicit disposal logs failures instead of returning
/// them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use wiregraph::{Container, Dispose, Lifestyle, Resolver};
///
/// struct Connection {
///     closed: Arc<AtomicBool>,
/// }
///
/// impl Dispose for Connection {
///     fn dispose(&self) {
///         self.closed.store(true, Ordering::SeqCst);
///     }
/// }
///
/// let closed = Arc::new(AtomicBool::new(false));
/// let flag = closed.clone();
///
/// let container = Container::new();
/// container
///     .register_factory::<Connection, _>(Lifestyle::Scoped, move |r| {
///         let connection = Arc::new(Connection { closed: flag.clone() });
///         r.register_disposer(connection.clone());
///         Ok(connection)
///     })
///     .unwrap();
///
/// let scope = container.begin_scope();
/// let a = scope.get::<Connection>().unwrap();
/// let b = scope.get::<Connection>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// scope.dispose().unwrap();
/// assert!(closed.load(Ordering::SeqCst));
/// assert!(scope.get::<Connection>().is_err());
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    id: u64,
    container: Arc<ContainerInner>,
    ambient: Option<ScopedLifestyle>,
    parent: Option<Weak<ScopeInner>>,
    children: Mutex<Vec<Weak<ScopeInner>>>,
    state: AtomicU8,
    instances: Mutex<HashMap<u64, Arc<OnceCell<AnyArc>>>>,
    disposables: Mutex<DisposeBag>,
    end_actions: Mutex<Vec<EndAction>>,
}

impl Scope {
    pub(crate) fn new(
        container: &Arc<ContainerInner>,
        parent: Option<&Scope>,
        ambient: Option<ScopedLifestyle>,
    ) -> Self {
        let inner = Arc::new(ScopeInner {
            id: crate::internal::next_id(),
            container: container.clone(),
            ambient,
            parent: parent.map(|p| Arc::downgrade(&p.inner)),
            children: Mutex::new(Vec::new()),
            state: AtomicU8::new(ACTIVE),
            instances: Mutex::new(HashMap::new()),
            disposables: Mutex::new(DisposeBag::default()),
            end_actions: Mutex::new(Vec::new()),
        });

        if let Some(parent) = parent {
            let mut children = parent.inner.children.lock();
            children.retain(|child| child.strong_count() > 0);
            children.push(Arc::downgrade(&inner));
        }

        debug!(
            target: "wiregraph",
            scope = inner.id,
            parent = parent.map(|p| p.id()),
            lifestyle = ambient.map(|l| l.name()).unwrap_or("explicit"),
            "Scope started"
        );

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != ACTIVE
    }

    /// The container this scope belongs to.
    pub fn container(&self) -> Container {
        Container::from_inner(self.inner.container.clone())
    }

    /// The scope this scope was nested in, while it is alive.
    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Scope { inner })
    }

    /// The scoped lifestyle that made this scope ambient, if any.
    pub fn ambient_lifestyle(&self) -> Option<ScopedLifestyle> {
        self.inner.ambient
    }

    /// Begin a nested scope.
    ///
    /// The child has its own cache of scoped instances and is disposed when
    /// this scope is. A child of an ambient thread scope becomes the ambient
    /// scope of the current thread.
    pub fn begin_child(&self) -> Scope {
        let child = Scope::new(&self.inner.container, Some(self), self.inner.ambient);
        if self.inner.ambient == Some(ScopedLifestyle::ThreadScoped) {
            ambient::push(&child);
        }
        child
    }

    /// The instance cached for `registration`, created with `create` on the
    /// first request. Concurrent first requests construct once.
    pub(crate) fn get_or_create<F>(&self, registration: u64, create: F) -> DiResult<AnyArc>
    where
        F: FnOnce() -> DiResult<AnyArc>,
    {
        if self.is_disposed() {
            return Err(DiError::ScopeDisposed { scope: self.id() });
        }

        let cell = self
            .inner
            .instances
            .lock()
            .entry(registration)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(create).cloned()
    }

    pub(crate) fn track(&self, disposer: Disposer) {
        {
            let mut disposables = self.inner.disposables.lock();
            if self.inner.state.load(Ordering::Acquire) != DISPOSED {
                disposables.push(disposer);
                return;
            }
        }
        error!(
            target: "wiregraph",
            scope = self.id(),
            instance = disposer.instance(),
            "Disposable registered with a disposed scope; disposing it now"
        );
        for failure in dispose_all(vec![disposer]) {
            error!(target: "wiregraph", scope = self.id(), %failure, "Disposer failed");
        }
    }

    /// Dispose `instance` when this scope ends.
    pub fn register_for_disposal<T: Dispose>(&self, instance: Arc<T>) -> DiResult<()> {
        self.ensure_active()?;
        self.track(Disposer::sync(std::any::type_name::<T>(), Box::new(move || instance.dispose())));
        Ok(())
    }

    /// Dispose `instance` asynchronously when this scope ends.
    ///
    /// Only [`dispose_async`](Scope::dispose_async) runs asynchronous
    /// disposers; synchronous disposal reports them as failures.
    pub fn register_for_async_disposal<T: AsyncDispose>(&self, instance: Arc<T>) -> DiResult<()> {
        self.ensure_active()?;
        self.track(Disposer::asynchronous(
            std::any::type_name::<T>(),
            Box::new(move || -> BoxFutureUnit {
                Box::pin(async move {
                    instance.dispose().await;
                })
            }),
        ));
        Ok(())
    }

    /// Run `action` when the scope ends, before its instances are disposed.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use wiregraph::Container;
    ///
    /// let container = Container::new();
    /// let scope = container.begin_scope();
    /// let ended = Arc::new(AtomicUsize::new(0));
    /// let counter = ended.clone();
    /// scope.when_scope_ends(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();
    ///
    /// scope.dispose().unwrap();
    /// scope.dispose().unwrap();
    /// assert_eq!(ended.load(Ordering::SeqCst), 1);
    /// ```
    pub fn when_scope_ends<F>(&self, action: F) -> DiResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut actions = self.inner.end_actions.lock();
        self.ensure_active()?;
        actions.push(Box::new(action));
        Ok(())
    }

    /// Run `f` with this scope and dispose the scope afterwards.
    ///
    /// The scope is disposed even when `f` panics; the panic is then resumed.
    pub fn using<R, F>(self, f: F) -> DiResult<R>
    where
        F: FnOnce(&Scope) -> R,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&self)));
        let disposed = self.dispose();
        match result {
            Ok(value) => disposed.map(|_| value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Dispose the scope, its children, and every instance it owns.
    ///
    /// Every disposer is attempted; failures are returned together as
    /// [`DiError::DisposalFailed`]. Disposing a disposed scope is a no-op.
    /// Disposal from another thread than the one that began the scope is
    /// allowed.
    pub fn dispose(&self) -> DiResult<()> {
        into_result(self.inner.dispose())
    }

    /// Dispose the scope, awaiting asynchronous disposers.
    pub async fn dispose_async(&self) -> DiResult<()> {
        into_result(self.inner.clone().dispose_async().await)
    }

    fn ensure_active(&self) -> DiResult<()> {
        if self.is_disposed() {
            Err(DiError::ScopeDisposed { scope: self.id() })
        } else {
            Ok(())
        }
    }

    pub(crate) fn same(&self, other: &Weak<ScopeInner>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), other.as_ptr())
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }
}

impl ScopeInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    fn begin_disposing(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn live_children(&self) -> Vec<Arc<ScopeInner>> {
        let children = std::mem::take(&mut *self.children.lock());
        children.iter().rev().filter_map(Weak::upgrade).collect()
    }

    fn dispose(&self) -> Vec<DisposalFailure> {
        if !self.begin_disposing() {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for child in self.live_children() {
            failures.extend(child.dispose());
        }

        while let Some((actions, disposers)) = self.drain() {
            failures.extend(run_end_actions(actions));
            failures.extend(dispose_all(disposers));
        }

        self.finish(&failures);
        failures
    }

    fn dispose_async(self: Arc<Self>) -> Pin<Box<dyn Future<Output = Vec<DisposalFailure>> + Send>> {
        Box::pin(async move {
            if !self.begin_disposing() {
                return Vec::new();
            }

            let mut failures = Vec::new();
            for child in self.live_children() {
                failures.extend(child.dispose_async().await);
            }

            while let Some((actions, disposers)) = self.drain() {
                failures.extend(run_end_actions(actions));
                failures.extend(dispose_all_async(disposers).await);
            }

            self.finish(&failures);
            failures
        })
    }

    /// Take pending end actions and disposers. Once both are empty the scope
    /// is marked disposed while both locks are still held.
    fn drain(&self) -> Option<(Vec<EndAction>, Vec<Disposer>)> {
        let mut actions = self.end_actions.lock();
        let mut disposables = self.disposables.lock();
        let pending = (std::mem::take(&mut *actions), disposables.take());
        if pending.0.is_empty() && pending.1.is_empty() {
            self.state.store(DISPOSED, Ordering::Release);
            return None;
        }
        Some(pending)
    }

    fn finish(&self, failures: &[DisposalFailure]) {
        self.instances.lock().clear();
        if self.ambient == Some(ScopedLifestyle::ThreadScoped) {
            ambient::remove(self.id);
        }
        debug!(target: "wiregraph", scope = self.id, failures = failures.len(), "Scope disposed");
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        for failure in self.dispose() {
            error!(
                target: "wiregraph",
                scope = self.id,
                %failure,
                "Disposer failed while a dropped scope was disposed"
            );
        }
    }
}

fn run_end_actions(actions: Vec<EndAction>) -> Vec<DisposalFailure> {
    actions
        .into_iter()
        .filter_map(|action| {
            panic::catch_unwind(AssertUnwindSafe(action))
                .err()
                .map(|payload| DisposalFailure { instance: "scope end action", message: panic_message(payload) })
        })
        .collect()
}

fn into_result(failures: Vec<DisposalFailure>) -> DiResult<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DiError::DisposalFailed { failures })
    }
}

impl ResolverCore for Scope {
    fn resolve_any(&self, service: &ServiceType) -> DiResult<AnyArc> {
        self.inner.container.resolve(*service, Some(self))
    }

    fn resolve_all(&self, service: &ServiceType) -> DiResult<Vec<AnyArc>> {
        self.inner.container.resolve_all(*service, Some(self))
    }

    fn push_disposer(&self, disposer: Disposer) {
        self.track(disposer);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("ambient", &self.inner.ambient)
            .field("disposed", &self.is_disposed())
            .field("instances", &self.inner.instances.lock().len())
            .field("disposables", &self.inner.disposables.lock().len())
            .finish()
    }
}
