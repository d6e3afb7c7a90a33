use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::container::{CollectionEntry, Container, ContainerInner, ServiceEntry};
use crate::context::Activation;
use crate::error::{DiError, DiResult};
use crate::key::ServiceType;
use crate::options::VerificationMode;
use crate::producer::InstanceProducer;
use crate::registration::{DiagnosticKind, Registration};
use crate::scope::Scope;

impl Container {
    /// Build, compile and construct every registration once, using the
    /// verification mode of the container options.
    ///
    /// Locks the container. Scoped instances live in a temporary scope that
    /// is disposed before returning; singletons are kept.
    pub fn verify(&self) -> DiResult<()> {
        self.verify_with(self.inner.options().verification)
    }

    pub fn verify_with(&self, mode: VerificationMode) -> DiResult<()> {
        let inner = &self.inner;
        inner.ensure_usable(None)?;
        inner.lock();

        let (producers, collections) = verification_targets(inner);
        debug!(
            target: "wiregraph",
            container = inner.id(),
            producers = producers.len(),
            collections = collections.len(),
            ?mode,
            "Verifying container"
        );

        let mut errors = Vec::new();
        for producer in &producers {
            if let Err(error) = producer.creator(inner) {
                errors.push(error);
            }
        }
        for service in &collections {
            if let Err(error) = compile_collection(inner, *service) {
                errors.push(error);
            }
        }

        if errors.is_empty() {
            let scope = Scope::new(inner, None, None);
            let activation = Activation::new(inner, Some(&scope));
            for producer in &producers {
                if let Err(error) = producer.create(inner, &activation) {
                    errors.push(error);
                }
            }
            for service in &collections {
                if let Err(error) = inner.resolve_all_with(*service, &activation) {
                    errors.push(error);
                }
            }
            if let Err(error) = scope.dispose() {
                errors.push(error);
            }
        }

        if errors.is_empty() && mode == VerificationMode::VerifyAndDiagnose {
            errors.extend(lifestyle_mismatches(inner, &producers));
        }

        if errors.is_empty() {
            debug!(target: "wiregraph", container = inner.id(), "Container verified");
            Ok(())
        } else {
            warn!(target: "wiregraph", container = inner.id(), errors = errors.len(), "Container verification failed");
            Err(DiError::VerificationFailed { errors })
        }
    }
}

/// Every producer and collection verification covers: registered services,
/// each conditional candidate, every closing of the open-generic
/// registrations and every collection.
fn verification_targets(inner: &Arc<ContainerInner>) -> (Vec<Arc<InstanceProducer>>, Vec<ServiceType>) {
    let (mut producers, open_generics, collections) = {
        let registry = inner.registry.read();
        let producers: Vec<Arc<InstanceProducer>> = registry
            .order
            .iter()
            .filter_map(|service| registry.services.get(&service.id()))
            .flat_map(|entry| match entry {
                ServiceEntry::Single(producer) => vec![producer.clone()],
                ServiceEntry::Conditional(candidates) => {
                    candidates.iter().map(|candidate| candidate.producer.clone()).collect()
                }
            })
            .collect();
        let collections: Vec<ServiceType> = registry
            .collections
            .values()
            .filter_map(CollectionEntry::service_type)
            .collect();
        (producers, registry.open_generics.clone(), collections)
    };

    for open_generic in &open_generics {
        for service in open_generic.matching_services() {
            if let Ok(Some(producer)) = inner.producer_for(service, None) {
                if !producers.iter().any(|known| Arc::ptr_eq(known, &producer)) {
                    producers.push(producer);
                }
            }
        }
    }

    (producers, collections)
}

fn compile_collection(inner: &Arc<ContainerInner>, service: ServiceType) -> DiResult<()> {
    match inner.collection_for(service)? {
        Some(collection) => {
            collection.build(inner)?;
            collection.creator(inner).map(|_| ())
        }
        None => Ok(()),
    }
}

/// Walk every registration reachable from `producers`, decorators and
/// collection elements included, and report dependencies with a shorter
/// lifestyle than their consumer.
fn lifestyle_mismatches(inner: &Arc<ContainerInner>, producers: &[Arc<InstanceProducer>]) -> Vec<DiError> {
    let mut queue: VecDeque<Arc<Registration>> =
        producers.iter().map(|producer| producer.registration().clone()).collect();
    queue.extend(inner.decorators().iter().flat_map(|decorator| decorator.registrations()));
    {
        let registry = inner.registry.read();
        for entry in registry.collections.values() {
            if let CollectionEntry::Controlled(elements) = entry {
                queue.extend(elements.iter().map(|producer| producer.registration().clone()));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut mismatches = Vec::new();

    while let Some(registration) = queue.pop_front() {
        if !seen.insert(registration.id()) {
            continue;
        }
        let suppressed = registration.is_diagnostic_suppressed(DiagnosticKind::LifestyleMismatch);

        for relationship in registration.relationships() {
            let dependency = relationship.dependency();
            queue.push_back(dependency.registration().clone());
            if suppressed || dependency.lifestyle().length() >= relationship.lifestyle().length() {
                continue;
            }
            if !reported.insert((registration.id(), dependency.registration().id())) {
                continue;
            }
            mismatches.push(DiError::LifestyleMismatch {
                consumer: relationship.implementation_type().name(),
                consumer_lifestyle: relationship.lifestyle().name(),
                dependency: dependency.service_type().name(),
                dependency_lifestyle: dependency.lifestyle().name(),
            });
        }
    }

    mismatches
}
