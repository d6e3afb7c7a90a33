//! # wiregraph
//!
//! A dependency injection container that compiles each registration's object
//! graph into a cached factory and resolves without locks afterwards.
//!
//! ## Features
//!
//! - **Auto-wiring**: components declare their constructors; the container picks
//!   one and resolves its parameters
//! - **Lifestyles**: transient, singleton, thread-scoped, async-flow scoped
//!   (feature `async`) and user-defined
//! - **Decorators**: component, function and open-generic decorators with
//!   build-time and resolve-time predicates
//! - **Collections**: container-controlled lists of producers, or existing
//!   instances decorated per element
//! - **Conditional and open-generic registrations**
//! - **Verification**: build and construct everything up front and report
//!   lifestyle mismatches
//! - **Disposal**: scopes and the container dispose what they created, in
//!   reverse creation order
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use wiregraph::{Component, Constructor, Container, Lifestyle, Parameter, Resolver};
//!
//! struct Database {
//!     url: &'static str,
//! }
//! impl Component for Database {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(vec![], |_| Ok(Database { url: "postgres://localhost" }))]
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//! impl Component for UserService {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(vec![Parameter::service::<Database>("db")], |args| {
//!             Ok(UserService { db: args.next()? })
//!         })]
//!     }
//! }
//!
//! let container = Container::new();
//! container.register_concrete::<Database>(Lifestyle::Singleton).unwrap();
//! container.register_concrete::<UserService>(Lifestyle::Transient).unwrap();
//! container.verify().unwrap();
//!
//! let users = container.get_required::<UserService>();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Scoped Services
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use wiregraph::{Container, Lifestyle, Resolver, ThreadScopedLifestyle};
//!
//! struct RequestId(usize);
//!
//! let container = Container::new();
//! let counter = Arc::new(AtomicUsize::new(0));
//! let next = counter.clone();
//! container
//!     .register_factory::<RequestId, _>(Lifestyle::Scoped, move |_| {
//!         Ok(Arc::new(RequestId(next.fetch_add(1, Ordering::SeqCst))))
//!     })
//!     .unwrap();
//!
//! let scope = ThreadScopedLifestyle::begin_scope(&container);
//! let first = container.get_required::<RequestId>();
//! let again = container.get_required::<RequestId>();
//! assert_eq!(first.0, again.0);
//! scope.dispose().unwrap();
//!
//! // Outside a scope, scoped services cannot be resolved.
//! assert!(container.get::<RequestId>().is_err());
//! ```

pub mod error;
pub mod key;
pub mod traits;

mod behaviors;
mod collection;
mod component;
mod conditional;
mod container;
mod context;
mod decoration;
mod expression;
mod generic;
mod internal;
mod lifestyle;
mod options;
mod producer;
mod registration;
mod scope;

pub use behaviors::{
    ConstructorCandidate, ConstructorResolutionBehavior, FixedLifestyle, InjectAllProperties,
    LifestyleSelectionBehavior, MostResolvableParametersBehavior, NoPropertyInjection, PropertySelectionBehavior,
    SinglePublicConstructorBehavior,
};
pub use component::{Arguments, Component, Constructor, Implements, Parameter, ParameterKind, Property};
pub use conditional::{InjectionConsumer, PredicateContext};
pub use container::{Container, UnregisteredTypeEventArgs};
pub use context::{Activation, ResolverContext};
pub use decoration::{
    AppliedDecorators, DecorateeFactory, DecoratorOptions, DecoratorPredicateContext, ServiceDecorator,
};
pub use error::{DiError, DiResult, DisposalFailure};
pub use expression::{instance_creator, Expression, InstanceCreator};
pub use generic::{
    GenericService, OpenGeneric, OpenGenericDecorator, Substitution, TypeConstraint, TypePattern, TypeShape,
};
pub use internal::{BoxFutureUnit, Disposer};
pub use key::{AnyArc, Service, ServiceType};
pub use lifestyle::{CustomLifestyle, Lifestyle, ScopedLifestyle};
pub use options::{ContainerOptions, VerificationMode};
pub use producer::InstanceProducer;
pub use registration::{DiagnosticKind, KnownRelationship, Registration};
pub use scope::{Scope, ThreadScopedLifestyle};
pub use traits::{AsyncDispose, Dispose, Resolver, ResolverCore};

#[cfg(feature = "async")]
pub use scope::AsyncScopedLifestyle;

#[cfg(feature = "config")]
pub use options::{ContainerSettings, ScopedLifestyleSetting};
