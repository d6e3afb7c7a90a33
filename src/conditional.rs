//! Conditional registrations: several implementations of one service, picked
//! per consumer by predicate.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{DiError, DiResult};
use crate::key::ServiceType;
use crate::producer::InstanceProducer;

/// The component and parameter a dependency is injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InjectionConsumer {
    implementation_type: ServiceType,
    parameter: &'static str,
}

impl InjectionConsumer {
    pub(crate) fn new(implementation_type: ServiceType, parameter: &'static str) -> Self {
        Self { implementation_type, parameter }
    }

    pub fn implementation_type(&self) -> ServiceType {
        self.implementation_type
    }

    pub fn parameter(&self) -> &'static str {
        self.parameter
    }
}

impl fmt::Display for InjectionConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter '{}' of {}", self.parameter, self.implementation_type)
    }
}

/// What a conditional registration's predicate sees.
#[derive(Clone, Copy, Debug)]
pub struct PredicateContext<'a> {
    service_type: ServiceType,
    implementation_type: ServiceType,
    consumer: Option<&'a InjectionConsumer>,
    handled: bool,
}

impl<'a> PredicateContext<'a> {
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Implementation of the conditional registration being considered.
    pub fn implementation_type(&self) -> ServiceType {
        self.implementation_type
    }

    /// Where the service is injected; `None` for a direct resolution.
    pub fn consumer(&self) -> Option<&'a InjectionConsumer> {
        self.consumer
    }

    /// Whether an earlier conditional registration for the service already
    /// applies. `|c| !c.handled()` registers a fallback.
    pub fn handled(&self) -> bool {
        self.handled
    }
}

pub(crate) type ConditionalPredicate = Arc<dyn Fn(&PredicateContext<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ConditionalProducer {
    pub(crate) producer: Arc<InstanceProducer>,
    pub(crate) predicate: ConditionalPredicate,
}

/// The single conditional producer applying to `consumer`, in registration
/// order. `Ok(None)` when none applies.
pub(crate) fn select(
    service: ServiceType,
    candidates: &[ConditionalProducer],
    consumer: Option<&InjectionConsumer>,
) -> DiResult<Option<Arc<InstanceProducer>>> {
    let mut matches: Vec<&ConditionalProducer> = Vec::new();
    for candidate in candidates {
        let context = PredicateContext {
            service_type: service,
            implementation_type: candidate.producer.implementation_type(),
            consumer,
            handled: !matches.is_empty(),
        };
        if (candidate.predicate)(&context) {
            matches.push(candidate);
        }
    }

    match matches.as_slice() {
        [] => Ok(None),
        [only] => {
            trace!(
                target: "wiregraph",
                service = service.name(),
                implementation = only.producer.implementation_type().name(),
                consumer = ?consumer,
                "Conditional registration selected"
            );
            Ok(Some(only.producer.clone()))
        }
        many => Err(DiError::AmbiguousConditional {
            service: service.name(),
            consumer: consumer.map_or_else(|| "a direct resolution".to_string(), |c| c.to_string()),
            candidates: many.iter().map(|c| c.producer.implementation_type().name()).collect(),
        }),
    }
}
