//! Decoration of container-uncontrolled collections.
//!
//! The container does not create the elements of an uncontrolled collection,
//! so decorators cannot be woven into element producers. Each applicable
//! decorator becomes a stage that transforms one element at a time; stages
//! run in registration order on every enumeration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::container::ContainerInner;
use crate::context::Activation;
use crate::decoration::{AppliedDecorators, DecorationBinding, DecoratorPredicateContext};
use crate::error::{DiError, DiResult};
use crate::expression::{Caster, Expression, InstanceCreator, RuntimePredicate};
use crate::key::{AnyArc, ServiceType};
use crate::lifestyle::Lifestyle;

/// Identity of an element, used to find its cached decorated instance.
pub(crate) type ElementIdentity = fn(&AnyArc) -> Option<usize>;

pub(crate) struct Stage {
    decorator: ServiceType,
    creator: InstanceCreator,
    caster: Option<Caster>,
    singleton: bool,
    runtime: Option<RuntimePredicate>,
    context: DecoratorPredicateContext,
    cache: Mutex<HashMap<usize, AnyArc>>,
}

/// The stages decorating uncontrolled collection `target` of `service`.
pub(crate) fn stages(container: &Arc<ContainerInner>, target: u64, service: ServiceType) -> DiResult<Vec<Stage>> {
    let mut stages = Vec::new();
    let mut applied = AppliedDecorators::new();

    for decorator in container.decorators() {
        let Some(closing) = decorator.close_for(service) else {
            continue;
        };

        let element = Expression::element(service);
        let context = DecoratorPredicateContext::new(service, service, element.clone(), applied.clone());
        if let Some(predicate) = &decorator.options().predicate {
            if !predicate(&context) {
                continue;
            }
        }

        let registration = decorator.registration_for(container, target, &closing);
        let singleton = match registration.lifestyle() {
            Lifestyle::Singleton => true,
            Lifestyle::Transient => false,
            other => {
                return Err(DiError::Decoration {
                    decorator: closing.implementation.name(),
                    service: service.name(),
                    reason: format!(
                        "decorators of a container-uncontrolled collection must be transient or singleton, not {}",
                        other.name()
                    ),
                })
            }
        };

        let binding = DecorationBinding {
            service,
            decoratee: element,
            context: context.clone(),
            allow_factory: false,
            decoratee_producer: None,
        };
        let creator = registration.build_element_decorator(container, &binding)?.compile(container)?;

        trace!(
            target: "wiregraph",
            service = service.name(),
            decorator = closing.implementation.name(),
            singleton,
            "Collection element decorator prepared"
        );

        applied.push(closing.implementation);
        stages.push(Stage {
            decorator: closing.implementation,
            creator,
            caster: closing.caster.clone(),
            singleton,
            runtime: decorator.options().runtime.clone(),
            context,
            cache: Mutex::new(HashMap::new()),
        });
    }

    Ok(stages)
}

/// Run every stage over the elements of one enumeration.
pub(crate) fn decorate(
    stages: &[Stage],
    elements: Vec<AnyArc>,
    identity: ElementIdentity,
    activation: &Activation<'_>,
) -> DiResult<Vec<AnyArc>> {
    if stages.is_empty() {
        return Ok(elements);
    }

    let keys: Vec<Option<usize>> = elements.iter().map(identity).collect();
    let mut values = elements;
    for stage in stages {
        values = stage.apply(values, &keys, activation)?;
    }
    Ok(values)
}

impl Stage {
    /// Whether the stage decorates each element once and always applies.
    pub(crate) fn is_cacheable(&self) -> bool {
        self.singleton && self.runtime.is_none()
    }

    /// Decorate `values`, whose original elements are identified by `keys`.
    ///
    /// A singleton stage reuses the instance it built for the same element in
    /// the previous enumeration and only keeps instances for the elements of
    /// the latest one, so elements that drop out of a dynamic source are
    /// released.
    fn apply(&self, values: Vec<AnyArc>, keys: &[Option<usize>], activation: &Activation<'_>) -> DiResult<Vec<AnyArc>> {
        if !self.singleton {
            return values.iter().map(|value| self.create(value, activation)).collect();
        }

        let root = activation.for_singleton();
        let mut cache = self.cache.lock();
        let mut current = HashMap::with_capacity(values.len());
        let mut decorated = Vec::with_capacity(values.len());

        for (value, key) in values.iter().zip(keys) {
            if !self.applies() {
                if let Some(key) = key {
                    if let Some(previous) = cache.get(key).cloned() {
                        current.insert(*key, previous);
                    }
                }
                decorated.push(value.clone());
                continue;
            }

            let cached = key.and_then(|k| current.get(&k).or_else(|| cache.get(&k)).cloned());
            let instance = match cached {
                Some(instance) => instance,
                None => self.decorate_one(value, &root)?,
            };
            if let Some(key) = key {
                current.insert(*key, instance.clone());
            }
            decorated.push(instance);
        }

        *cache = current;
        Ok(decorated)
    }

    fn applies(&self) -> bool {
        self.runtime.as_ref().map_or(true, |predicate| predicate(&self.context))
    }

    fn create(&self, value: &AnyArc, activation: &Activation<'_>) -> DiResult<AnyArc> {
        if !self.applies() {
            return Ok(value.clone());
        }
        self.decorate_one(value, activation)
    }

    fn decorate_one(&self, value: &AnyArc, activation: &Activation<'_>) -> DiResult<AnyArc> {
        let element = activation.with_element(value);
        let instance = (self.creator)(&element).map_err(|error| match error {
            DiError::TypeMismatch(_) => DiError::Decoration {
                decorator: self.decorator.name(),
                service: self.context.service_type().name(),
                reason: error.to_string(),
            },
            other => other,
        })?;
        match &self.caster {
            Some(caster) => caster(instance),
            None => Ok(instance),
        }
    }
}
