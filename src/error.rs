//! Error types for the dependency injection container.

use std::fmt;
use thiserror::Error;

/// Dependency injection errors
///
/// Represents the failure conditions that can occur while registering
/// services, building and compiling object graphs, resolving instances,
/// verifying the container, or disposing scopes.
///
/// # Examples
///
/// ```rust
/// use wiregraph::{Container, DiError, Resolver};
///
/// let container = Container::new();
/// match container.get::<String>() {
///     Err(DiError::NotRegistered { service, .. }) => {
///         assert_eq!(service, "alloc::string::String");
///     }
///     _ => unreachable!(),
/// }
/// ```
///
/// ```rust
/// use wiregraph::DiError;
///
/// let cycle = DiError::CyclicDependency { path: vec!["ServiceA", "ServiceB", "ServiceA"] };
/// assert_eq!(cycle.to_string(), "Cyclic dependency detected: ServiceA -> ServiceB -> ServiceA");
/// ```
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No registration exists for the requested service.
    ///
    /// `chain` holds the services whose graphs were being built when the
    /// missing dependency was requested, outermost first.
    #[error("No registration for type {service} could be found{}", format_chain(.chain))]
    NotRegistered {
        service: &'static str,
        chain: Vec<&'static str>,
    },

    /// The object graph contains a cycle (includes path).
    #[error("Cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<&'static str> },

    /// The implementation does not expose a constructor the container can use.
    #[error("Type {implementation} has no suitable constructor: {reason}")]
    NoSuitableConstructor {
        implementation: &'static str,
        reason: String,
    },

    /// A constructor or property parameter cannot be injected.
    #[error("Parameter '{parameter}' of type {parameter_type} of {implementation} cannot be injected: {reason}")]
    UnresolvableParameter {
        implementation: &'static str,
        parameter: &'static str,
        parameter_type: &'static str,
        reason: String,
    },

    /// More than one conditional registration applies to the same consumer.
    #[error("Multiple applicable conditional registrations of {service} found for {consumer}: {}", .candidates.join(", "))]
    AmbiguousConditional {
        service: &'static str,
        consumer: String,
        candidates: Vec<&'static str>,
    },

    /// The container is locked after its first resolution and cannot be modified.
    #[error("The container can't be changed after the first call to get, get_all or verify")]
    Locked,

    /// The service already has a registration and overriding is disabled.
    #[error("Type {service} has already been registered and overriding registrations is disabled")]
    AlreadyRegistered { service: &'static str },

    /// A registration is malformed.
    #[error("Invalid registration for {service}: {reason}")]
    InvalidRegistration {
        service: &'static str,
        reason: String,
    },

    /// A scoped instance was requested outside an active scope.
    #[error("{service} is registered with the '{lifestyle}' lifestyle, but the instance is requested outside the context of an active scope. {hint}")]
    NoActiveScope {
        service: &'static str,
        lifestyle: &'static str,
        hint: &'static str,
    },

    /// The scope has been disposed.
    #[error("Scope {scope} has been disposed")]
    ScopeDisposed { scope: u64 },

    /// The container has been disposed.
    #[error("The container has been disposed")]
    ContainerDisposed,

    /// A decorator cannot be applied.
    #[error("Decorator {decorator} cannot be applied to {service}: {reason}")]
    Decoration {
        decorator: &'static str,
        service: &'static str,
        reason: String,
    },

    /// Type downcast failed
    #[error("Type mismatch for: {0}")]
    TypeMismatch(&'static str),

    /// A user supplied constructor or factory failed.
    #[error("Activation of {implementation} failed: {reason}")]
    ActivationFailed {
        implementation: &'static str,
        reason: String,
    },

    /// Maximum recursion depth exceeded
    #[error("Max depth {0} exceeded")]
    DepthExceeded(usize),

    /// A component depends on a service with a shorter lifestyle.
    #[error("{consumer} ({consumer_lifestyle}) depends on {dependency} ({dependency_lifestyle}), which has a shorter lifestyle")]
    LifestyleMismatch {
        consumer: &'static str,
        consumer_lifestyle: &'static str,
        dependency: &'static str,
        dependency_lifestyle: &'static str,
    },

    /// One or more disposers failed. Every disposer was still attempted.
    #[error("{} disposer(s) failed: {}", .failures.len(), format_list(.failures))]
    DisposalFailed { failures: Vec<DisposalFailure> },

    /// Container verification found configuration errors.
    #[error("The configuration is invalid, {} error(s) found: {}", .errors.len(), format_list(.errors))]
    VerificationFailed { errors: Vec<DiError> },

    /// Container settings could not be read.
    #[cfg(feature = "config")]
    #[error("Invalid container settings: {0}")]
    Configuration(String),
}

impl DiError {
    /// Create a NotRegistered error for a type without a dependency chain.
    #[inline]
    pub fn not_registered<T: ?Sized + 'static>() -> Self {
        Self::NotRegistered {
            service: std::any::type_name::<T>(),
            chain: Vec::new(),
        }
    }

    /// Create an ActivationFailed error for an implementation type.
    ///
    /// Convenient inside constructor closures and factories:
    ///
    /// ```rust
    /// use wiregraph::DiError;
    ///
    /// struct Connection;
    /// let err = DiError::activation_failed::<Connection>("port closed");
    /// assert!(err.to_string().contains("port closed"));
    /// ```
    #[inline]
    pub fn activation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::ActivationFailed {
            implementation: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }
}

/// A disposer that panicked while its scope or container was being disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalFailure {
    /// Type name of the instance being disposed.
    pub instance: &'static str,
    /// Panic message captured from the disposer.
    pub message: String,
}

impl fmt::Display for DisposalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.instance, self.message)
    }
}

fn format_chain(chain: &[&'static str]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (required by {})", chain.join(" -> "))
    }
}

fn format_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for DI operations
///
/// A convenience alias for `Result<T, DiError>` used throughout wiregraph.
pub type DiResult<T> = Result<T, DiError>;
