//! Cycle detection for graph building and factory-driven resolution.
//!
//! Two thread-local stacks are kept. The build stack tracks producers whose
//! expressions are being built; a producer seen twice means the static graph
//! is cyclic. The resolve stack tracks services requested at runtime through
//! a resolver (top-level `get` calls and calls made from inside factories),
//! which the static graph cannot see.

use std::any::TypeId;
use std::cell::RefCell;
use std::thread::LocalKey;

use crate::error::{DiError, DiResult};
use crate::key::ServiceType;

pub(crate) const MAX_DEPTH: usize = 1024;

thread_local! {
    static BUILD_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static RESOLVE_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKey {
    Producer(u64),
    Service(TypeId),
    Collection(TypeId),
}

#[derive(Clone, Copy)]
struct Frame {
    key: FrameKey,
    name: &'static str,
}

type Stack = &'static LocalKey<RefCell<Vec<Frame>>>;

/// Guard for a frame on one of the thread-local stacks; pops on drop.
pub(crate) struct StackGuard {
    stack: Stack,
}

impl StackGuard {
    /// Enter the build of a producer's expression.
    pub(crate) fn build(producer_id: u64, service: ServiceType) -> DiResult<Self> {
        Self::enter(
            &BUILD_STACK,
            Frame {
                key: FrameKey::Producer(producer_id),
                name: service.name(),
            },
        )
    }

    /// Enter a runtime resolution of a service.
    pub(crate) fn resolve(service: ServiceType) -> DiResult<Self> {
        Self::enter(
            &RESOLVE_STACK,
            Frame {
                key: FrameKey::Service(service.id()),
                name: service.name(),
            },
        )
    }

    /// Enter a runtime resolution of every element of a collection.
    pub(crate) fn resolve_collection(service: ServiceType) -> DiResult<Self> {
        Self::enter(
            &RESOLVE_STACK,
            Frame {
                key: FrameKey::Collection(service.id()),
                name: service.name(),
            },
        )
    }

    fn enter(stack: Stack, frame: Frame) -> DiResult<Self> {
        stack.with(|cell| {
            let mut frames = cell.borrow_mut();

            // Cycle check before pushing the new frame
            if let Some(start) = frames.iter().position(|f| f.key == frame.key) {
                let mut path: Vec<&'static str> = frames[start..].iter().map(|f| f.name).collect();
                path.push(frame.name);
                return Err(DiError::CyclicDependency { path });
            }

            if frames.len() >= MAX_DEPTH {
                return Err(DiError::DepthExceeded(frames.len()));
            }

            frames.push(frame);
            Ok(())
        })?;

        Ok(Self { stack })
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.stack.with(|cell| {
            cell.borrow_mut().pop();
        });
    }
}

/// Services whose graphs are currently being built on this thread, outermost first.
pub(crate) fn build_chain() -> Vec<&'static str> {
    BUILD_STACK.with(|cell| cell.borrow().iter().map(|f| f.name).collect())
}
