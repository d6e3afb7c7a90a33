//! Internal disposal bag for managing cleanup hooks.

use std::any::Any;
use std::future::{poll_fn, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::Poll;

use crate::error::DisposalFailure;

/// Future type for disposal operations.
pub type BoxFutureUnit = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cleanup hook for one instance.
///
/// Carries a synchronous hook, an asynchronous hook, or both. Synchronous
/// disposal runs the synchronous hook; asynchronous disposal prefers the
/// asynchronous one.
pub struct Disposer {
    pub(crate) instance: &'static str,
    pub(crate) sync: Option<Box<dyn FnOnce() + Send>>,
    pub(crate) asynchronous: Option<Box<dyn FnOnce() -> BoxFutureUnit + Send>>,
}

impl Disposer {
    pub(crate) fn sync(instance: &'static str, f: Box<dyn FnOnce() + Send>) -> Self {
        Self { instance, sync: Some(f), asynchronous: None }
    }

    pub(crate) fn asynchronous(
        instance: &'static str,
        f: Box<dyn FnOnce() -> BoxFutureUnit + Send>,
    ) -> Self {
        Self { instance, sync: None, asynchronous: Some(f) }
    }

    pub(crate) fn instance(&self) -> &'static str {
        self.instance
    }
}

/// Disposers in registration order; always drained in reverse (LIFO).
#[derive(Default)]
pub(crate) struct DisposeBag {
    entries: Vec<Disposer>,
}

impl DisposeBag {
    pub(crate) fn push(&mut self, disposer: Disposer) {
        self.entries.push(disposer);
    }

    /// Take every pending disposer, leaving the bag empty.
    ///
    /// Callers run the returned hooks after releasing their lock, so hooks
    /// may register further disposers.
    pub(crate) fn take(&mut self) -> Vec<Disposer> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run synchronous hooks in reverse order, attempting every one.
pub(crate) fn dispose_all(entries: Vec<Disposer>) -> Vec<DisposalFailure> {
    let mut failures = Vec::new();
    for disposer in entries.into_iter().rev() {
        let instance = disposer.instance;
        match disposer.sync {
            Some(hook) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                    failures.push(DisposalFailure { instance, message: panic_message(payload) });
                }
            }
            None => failures.push(DisposalFailure {
                instance,
                message: "instance only supports asynchronous disposal; dispose the scope with dispose_async".into(),
            }),
        }
    }
    failures
}

/// Run hooks in reverse order, awaiting asynchronous ones, attempting every one.
pub(crate) async fn dispose_all_async(entries: Vec<Disposer>) -> Vec<DisposalFailure> {
    let mut failures = Vec::new();
    for disposer in entries.into_iter().rev() {
        let instance = disposer.instance;
        let outcome = match (disposer.asynchronous, disposer.sync) {
            (Some(hook), _) => guarded(hook).await,
            (None, Some(hook)) => panic::catch_unwind(AssertUnwindSafe(hook)).map_err(panic_message),
            (None, None) => Ok(()),
        };
        if let Err(message) = outcome {
            failures.push(DisposalFailure { instance, message });
        }
    }
    failures
}

async fn guarded(hook: Box<dyn FnOnce() -> BoxFutureUnit + Send>) -> Result<(), String> {
    let mut future = panic::catch_unwind(AssertUnwindSafe(hook)).map_err(panic_message)?;
    poll_fn(move |cx| match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
        Ok(Poll::Ready(())) => Poll::Ready(Ok(())),
        Ok(Poll::Pending) => Poll::Pending,
        Err(payload) => Poll::Ready(Err(panic_message(payload))),
    })
    .await
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "disposer panicked".to_string()
    }
}
