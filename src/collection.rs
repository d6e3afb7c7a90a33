//! Collections: every registered element of a service, in registration order.
//!
//! A container-controlled collection is a list of producers appended with
//! `append_to_collection`; each element has its own lifestyle and is
//! decorated like any other producer. A container-uncontrolled collection
//! hands the container existing instances, either a fixed list or a source
//! re-enumerated on every resolution; its decorators run per element.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::container::ContainerInner;
use crate::context::Activation;
use crate::decoration::collection::{self as uncontrolled, ElementIdentity};
use crate::error::DiResult;
use crate::internal::{next_id, StackGuard};
use crate::key::{AnyArc, ServiceType};
use crate::producer::InstanceProducer;

pub(crate) type CollectionCreator = Arc<dyn for<'a> Fn(&Activation<'a>) -> DiResult<Vec<AnyArc>> + Send + Sync>;

pub(crate) type ElementSource = Arc<dyn Fn() -> Vec<AnyArc> + Send + Sync>;

fn collection_creator<F>(f: F) -> CollectionCreator
where
    F: for<'a> Fn(&Activation<'a>) -> DiResult<Vec<AnyArc>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) enum Elements {
    Fixed(Vec<AnyArc>),
    Dynamic(ElementSource),
}

pub(crate) enum CollectionSource {
    Controlled(Vec<Arc<InstanceProducer>>),
    Uncontrolled { elements: Elements, identity: ElementIdentity },
}

pub(crate) struct CollectionProducer {
    id: u64,
    service: ServiceType,
    source: CollectionSource,
    creator: OnceCell<CollectionCreator>,
}

impl CollectionProducer {
    pub(crate) fn new(service: ServiceType, source: CollectionSource) -> Arc<Self> {
        Arc::new(Self { id: next_id(), service, source, creator: OnceCell::new() })
    }

    pub(crate) fn service_type(&self) -> ServiceType {
        self.service
    }

    /// Element producers of a container-controlled collection.
    pub(crate) fn producers(&self) -> &[Arc<InstanceProducer>] {
        match &self.source {
            CollectionSource::Controlled(producers) => producers,
            CollectionSource::Uncontrolled { .. } => &[],
        }
    }

    /// Build the expression of every element producer.
    pub(crate) fn build(&self, container: &Arc<ContainerInner>) -> DiResult<()> {
        let _frame = StackGuard::build(self.id, self.service)?;
        for producer in self.producers() {
            producer.build_expression(container)?;
        }
        Ok(())
    }

    /// Compile (once) the creator returning every element.
    pub(crate) fn creator(&self, container: &Arc<ContainerInner>) -> DiResult<CollectionCreator> {
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        if let CollectionSource::Controlled(producers) = &self.source {
            container.prepare_dependencies(producers.iter().map(|producer| producer.registration().clone()));
        }
        let _lock = container.build_lock.lock();
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        let _frame = StackGuard::build(self.id, self.service)?;
        let creator = match &self.source {
            CollectionSource::Controlled(producers) => {
                let creators = producers
                    .iter()
                    .map(|producer| producer.creator(container))
                    .collect::<DiResult<Vec<_>>>()?;
                collection_creator(move |activation| creators.iter().map(|create| create(activation)).collect())
            }
            CollectionSource::Uncontrolled { elements, identity } => {
                let stages = Arc::new(uncontrolled::stages(container, self.id, self.service)?);
                let identity = *identity;
                match elements {
                    Elements::Fixed(fixed) if stages.iter().all(|stage| stage.is_cacheable()) => {
                        let fixed = fixed.clone();
                        let decorated: Arc<OnceCell<Vec<AnyArc>>> = Arc::new(OnceCell::new());
                        collection_creator(move |activation| {
                            decorated
                                .get_or_try_init(|| {
                                    uncontrolled::decorate(&stages, fixed.clone(), identity, activation)
                                })
                                .cloned()
                        })
                    }
                    Elements::Fixed(fixed) => {
                        let fixed = fixed.clone();
                        collection_creator(move |activation| {
                            uncontrolled::decorate(&stages, fixed.clone(), identity, activation)
                        })
                    }
                    Elements::Dynamic(source) => {
                        let source = source.clone();
                        collection_creator(move |activation| {
                            uncontrolled::decorate(&stages, source(), identity, activation)
                        })
                    }
                }
            }
        };

        debug!(
            target: "wiregraph",
            service = self.service.name(),
            kind = self.kind(),
            elements = self.producers().len(),
            "Collection compiled"
        );

        let _ = self.creator.set(creator.clone());
        Ok(creator)
    }

    fn kind(&self) -> &'static str {
        match &self.source {
            CollectionSource::Controlled(_) => "controlled",
            CollectionSource::Uncontrolled { elements: Elements::Fixed(_), .. } => "fixed",
            CollectionSource::Uncontrolled { elements: Elements::Dynamic(_), .. } => "dynamic",
        }
    }
}

impl fmt::Debug for CollectionProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionProducer")
            .field("service", &self.service)
            .field("kind", &self.kind())
            .field("elements", &self.producers().len())
            .finish()
    }
}
