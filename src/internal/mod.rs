//! Internal implementation details.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) mod circular;
pub(crate) mod dispose_bag;

pub(crate) use circular::StackGuard;
pub use dispose_bag::{BoxFutureUnit, Disposer};
pub(crate) use dispose_bag::{dispose_all, dispose_all_async, DisposeBag};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide identifier for containers, registrations, producers and scopes.
#[inline]
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
