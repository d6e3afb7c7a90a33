//! Disposal traits for resource cleanup.

/// Trait for synchronous resource disposal.
///
/// Implement this for services that need structured teardown (flushing
/// buffers, closing connections). A component opts in by returning itself
/// from [`Component::as_disposable`](crate::Component::as_disposable); the
/// container then disposes each instance when the scope that owns it ends,
/// or when the container is disposed for singletons. Hooks run in reverse
/// creation order.
///
/// # Examples
///
/// ```
/// use wiregraph::{Component, Constructor, Dispose};
///
/// struct Cache {
///     name: String,
/// }
///
/// impl Dispose for Cache {
///     fn dispose(&self) {
///         println!("Flushing cache: {}", self.name);
///     }
/// }
///
/// impl Component for Cache {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(vec![], |_| Ok(Cache { name: "user_cache".into() }))]
///     }
///
///     fn as_disposable(&self) -> Option<&dyn Dispose> {
///         Some(self)
///     }
/// }
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Perform synchronous cleanup of resources.
    fn dispose(&self);
}

/// Trait for asynchronous resource disposal.
///
/// Implement this for services that require async teardown. Async hooks run
/// when a scope is disposed with [`Scope::dispose_async`](crate::Scope::dispose_async);
/// synchronous disposal of an instance that only supports async teardown is
/// reported as a disposal failure.
///
/// # Examples
///
/// ```
/// use wiregraph::AsyncDispose;
/// use async_trait::async_trait;
///
/// struct DatabaseClient {
///     connection_id: String,
/// }
///
/// #[async_trait]
/// impl AsyncDispose for DatabaseClient {
///     async fn dispose(&self) {
///         println!("Closing database connection: {}", self.connection_id);
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait AsyncDispose: Send + Sync + 'static {
    /// Perform asynchronous cleanup of resources.
    async fn dispose(&self);
}
