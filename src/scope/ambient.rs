//! Ambient scopes: the scope a container uses when none is passed explicitly.
//!
//! Thread scopes live on a thread-local stack keyed by container. With the
//! `async` feature, async scopes live in a tokio task-local and follow the
//! future they were started for across threads.

use std::cell::RefCell;
use std::sync::Weak;

use crate::container::Container;
use crate::lifestyle::ScopedLifestyle;
use crate::scope::{Scope, ScopeInner};

struct Entry {
    container: u64,
    scope: u64,
    handle: Weak<ScopeInner>,
}

thread_local! {
    static THREAD_SCOPES: RefCell<Vec<Entry>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn push(scope: &Scope) {
    let entry = Entry {
        container: scope.container().inner().id(),
        scope: scope.id(),
        handle: scope.downgrade(),
    };
    let _ = THREAD_SCOPES.try_with(|stack| stack.borrow_mut().push(entry));
}

/// Innermost active thread scope of `container` on this thread.
///
/// Entries of scopes that were disposed (possibly from another thread) or
/// dropped are pruned on the way.
pub(crate) fn current_thread_scope(container: u64) -> Option<Scope> {
    THREAD_SCOPES
        .try_with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.retain(|entry| entry.handle.upgrade().is_some_and(|inner| inner.is_active()));
            stack
                .iter()
                .rev()
                .find(|entry| entry.container == container)
                .and_then(|entry| entry.handle.upgrade())
                .map(Scope::from_inner)
        })
        .ok()
        .flatten()
}

pub(crate) fn remove(scope: u64) {
    let _ = THREAD_SCOPES.try_with(|stack| {
        if let Ok(mut stack) = stack.try_borrow_mut() {
            stack.retain(|entry| entry.scope != scope);
        }
    });
}

/// Scoped lifestyle whose ambient scope is bound to the current thread.
///
/// Scopes nest: beginning a scope while another is active on the thread
/// makes the new one a child of the active one, and the current scope is
/// always the innermost active one.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wiregraph::{Container, Lifestyle, Resolver, ThreadScopedLifestyle};
///
/// struct UnitOfWork;
///
/// let container = Container::new();
/// container.register_factory::<UnitOfWork, _>(Lifestyle::Scoped, |_| Ok(Arc::new(UnitOfWork))).unwrap();
///
/// let outer = ThreadScopedLifestyle::begin_scope(&container);
/// let a = container.get::<UnitOfWork>().unwrap();
///
/// let inner = ThreadScopedLifestyle::begin_scope(&container);
/// let b = container.get::<UnitOfWork>().unwrap();
/// assert!(!Arc::ptr_eq(&a, &b));
/// inner.dispose().unwrap();
///
/// assert!(Arc::ptr_eq(&a, &container.get::<UnitOfWork>().unwrap()));
/// outer.dispose().unwrap();
/// assert!(container.get::<UnitOfWork>().is_err());
/// ```
pub struct ThreadScopedLifestyle;

impl ThreadScopedLifestyle {
    /// Begin a scope that is ambient on the current thread until disposed.
    pub fn begin_scope(container: &Container) -> Scope {
        let inner = container.inner();
        let parent = current_thread_scope(inner.id());
        let scope = Scope::new(inner, parent.as_ref(), Some(ScopedLifestyle::ThreadScoped));
        push(&scope);
        scope
    }

    /// The innermost active thread scope of `container` on this thread.
    pub fn current_scope(container: &Container) -> Option<Scope> {
        current_thread_scope(container.inner().id())
    }
}

#[cfg(feature = "async")]
pub use self::task::AsyncScopedLifestyle;
#[cfg(feature = "async")]
pub(crate) use self::task::current_async_scope;

#[cfg(feature = "async")]
mod task {
    use std::future::Future;

    use crate::container::Container;
    use crate::error::DiResult;
    use crate::lifestyle::ScopedLifestyle;
    use crate::scope::Scope;

    tokio::task_local! {
        static ASYNC_SCOPES: Vec<(u64, Scope)>;
    }

    pub(crate) fn current_async_scope(container: u64) -> Option<Scope> {
        ASYNC_SCOPES
            .try_with(|stack| {
                stack
                    .iter()
                    .rev()
                    .find(|(owner, scope)| *owner == container && !scope.is_disposed())
                    .map(|(_, scope)| scope.clone())
            })
            .ok()
            .flatten()
    }

    /// Scoped lifestyle whose ambient scope follows an async flow.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use wiregraph::{AsyncScopedLifestyle, Container, ContainerOptions, Lifestyle, Resolver, ScopedLifestyle};
    ///
    /// struct RequestContext;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let container = Container::with_options(ContainerOptions {
    ///     default_scoped_lifestyle: ScopedLifestyle::AsyncScoped,
    ///     ..ContainerOptions::default()
    /// });
    /// container.register_factory::<RequestContext, _>(Lifestyle::Scoped, |_| Ok(Arc::new(RequestContext))).unwrap();
    ///
    /// let same = AsyncScopedLifestyle::run_in_scope(&container, |_scope| {
    ///     let container = container.clone();
    ///     async move {
    ///         let a = container.get::<RequestContext>().unwrap();
    ///         tokio::task::yield_now().await;
    ///         let b = container.get::<RequestContext>().unwrap();
    ///         Arc::ptr_eq(&a, &b)
    ///     }
    /// })
    /// .await
    /// .unwrap();
    /// assert!(same);
    /// # }
    /// ```
    pub struct AsyncScopedLifestyle;

    impl AsyncScopedLifestyle {
        /// Run `f` inside a new scope that is ambient for the returned
        /// future, then dispose the scope asynchronously.
        pub async fn run_in_scope<F, Fut, R>(container: &Container, f: F) -> DiResult<R>
        where
            F: FnOnce(Scope) -> Fut,
            Fut: Future<Output = R>,
        {
            let id = container.inner().id();
            let parent = current_async_scope(id);
            let scope = Scope::new(container.inner(), parent.as_ref(), Some(ScopedLifestyle::AsyncScoped));

            let mut stack = ASYNC_SCOPES.try_with(|stack| stack.clone()).unwrap_or_default();
            stack.push((id, scope.clone()));

            let result = ASYNC_SCOPES.scope(stack, f(scope.clone())).await;
            scope.dispose_async().await?;
            Ok(result)
        }

        /// The innermost active async scope of `container` in the current task.
        pub fn current_scope(container: &Container) -> Option<Scope> {
            current_async_scope(container.inner().id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_thread_scopes() {
        let container = Container::new();
        assert!(ThreadScopedLifestyle::current_scope(&container).is_none());

        let outer = ThreadScopedLifestyle::begin_scope(&container);
        let inner = ThreadScopedLifestyle::begin_scope(&container);
        assert_eq!(ThreadScopedLifestyle::current_scope(&container).unwrap().id(), inner.id());
        assert_eq!(inner.parent().unwrap().id(), outer.id());

        inner.dispose().unwrap();
        assert_eq!(ThreadScopedLifestyle::current_scope(&container).unwrap().id(), outer.id());
        outer.dispose().unwrap();
        assert!(ThreadScopedLifestyle::current_scope(&container).is_none());
    }

    #[test]
    fn test_thread_scopes_are_per_container() {
        let first = Container::new();
        let second = Container::new();
        let scope = ThreadScopedLifestyle::begin_scope(&first);

        assert!(ThreadScopedLifestyle::current_scope(&second).is_none());
        assert!(ThreadScopedLifestyle::current_scope(&first).is_some());
        scope.dispose().unwrap();
    }

    #[test]
    fn test_scope_disposed_elsewhere_is_pruned() {
        let container = Container::new();
        let scope = ThreadScopedLifestyle::begin_scope(&container);
        let handle = scope.clone();

        std::thread::spawn(move || handle.dispose().unwrap()).join().unwrap();
        assert!(ThreadScopedLifestyle::current_scope(&container).is_none());
        drop(scope);
    }

    #[test]
    fn test_thread_scope_is_not_visible_on_other_threads() {
        let container = Container::new();
        let scope = ThreadScopedLifestyle::begin_scope(&container);
        let other = container.clone();

        let seen = std::thread::spawn(move || ThreadScopedLifestyle::current_scope(&other).is_some())
            .join()
            .unwrap();
        assert!(!seen);
        scope.dispose().unwrap();
    }
}
