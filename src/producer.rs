//! Instance producers: the unit the container caches per service.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::component::Implements;
use crate::container::ContainerInner;
use crate::context::Activation;
use crate::decoration;
use crate::error::{DiError, DiResult};
use crate::expression::{caster, Caster, Expression, InstanceCreator};
use crate::internal::{next_id, StackGuard};
use crate::key::{AnyArc, Service, ServiceType};
use crate::lifestyle::Lifestyle;
use crate::registration::{KnownRelationship, Registration};

/// Binds a service type to the [`Registration`] that produces it.
///
/// The producer builds its expression lazily: the registration's
/// expression, converted to the service type, then wrapped by every
/// applicable decorator. The result is compiled once and shared by all
/// callers; the first compilation wins under concurrent first use.
///
/// Producers are created by the `register*` methods, or explicitly with
/// [`InstanceProducer::new`] and added through
/// [`Container::add_producer`](crate::Container::add_producer).
pub struct InstanceProducer {
    id: u64,
    service: ServiceType,
    registration: Arc<Registration>,
    caster: Option<Caster>,
    expression: OnceCell<Expression>,
    creator: OnceCell<InstanceCreator>,
    decorators: OnceCell<Vec<ServiceType>>,
}

impl InstanceProducer {
    /// Producer of service `S` from a registration of implementation `I`.
    ///
    /// Fails when the registration does not produce `I`.
    pub fn new<S, I>(registration: Arc<Registration>) -> DiResult<Arc<Self>>
    where
        S: ?Sized + Service,
        I: ?Sized + Implements<S>,
    {
        if !registration.implementation_type().is::<I>() {
            return Err(DiError::InvalidRegistration {
                service: std::any::type_name::<S>(),
                reason: format!(
                    "the registration produces {}, not {}",
                    registration.implementation_type(),
                    std::any::type_name::<I>()
                ),
            });
        }

        let service = ServiceType::of::<S>();
        let caster = (service != registration.implementation_type()).then(caster::<S, I>);
        Ok(Self::with_caster(service, registration, caster))
    }

    pub(crate) fn with_caster(
        service: ServiceType,
        registration: Arc<Registration>,
        caster: Option<Caster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            service,
            registration,
            caster,
            expression: OnceCell::new(),
            creator: OnceCell::new(),
            decorators: OnceCell::new(),
        })
    }

    /// Producer for a registration whose implementation is the service itself.
    pub(crate) fn for_registration(service: ServiceType, registration: Arc<Registration>) -> DiResult<Arc<Self>> {
        if registration.implementation_type() != service {
            return Err(DiError::InvalidRegistration {
                service: service.name(),
                reason: format!(
                    "the registration produces {}; use InstanceProducer::new to convert it",
                    registration.implementation_type()
                ),
            });
        }
        Ok(Self::with_caster(service, registration, None))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service_type(&self) -> ServiceType {
        self.service
    }

    pub fn implementation_type(&self) -> ServiceType {
        self.registration.implementation_type()
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        self.registration.lifestyle()
    }

    /// The built expression, decorators included, once built.
    pub fn expression(&self) -> Option<Expression> {
        self.expression.get().cloned()
    }

    /// Decorators applied to this producer, innermost first.
    pub fn decorators(&self) -> Vec<ServiceType> {
        self.decorators.get().cloned().unwrap_or_default()
    }

    pub fn relationships(&self) -> Vec<KnownRelationship> {
        self.registration.relationships()
    }

    /// Build (once) the decorated expression.
    pub(crate) fn build_expression(&self, container: &Arc<ContainerInner>) -> DiResult<Expression> {
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let _lock = container.build_lock.lock();
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let _frame = StackGuard::build(self.id, self.service)?;

        self.registration.build_expression(container)?;
        let mut expression = Expression::registered(self.registration.clone());
        if let Some(caster) = &self.caster {
            expression = Expression::cast(self.service, caster.clone(), expression);
        }

        let (expression, applied) = decoration::intercept(
            container,
            self.service,
            self.id,
            &self.registration,
            expression,
        )?;

        debug!(
            target: "wiregraph",
            service = self.service.name(),
            implementation = self.registration.implementation_type().name(),
            lifestyle = self.registration.lifestyle().name(),
            decorators = applied.len(),
            "Producer built"
        );

        let _ = self.decorators.set(applied.to_vec());
        let _ = self.expression.set(expression.clone());
        Ok(expression)
    }

    /// Compile (once) the decorated expression.
    pub(crate) fn creator(&self, container: &Arc<ContainerInner>) -> DiResult<InstanceCreator> {
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        container.prepare_dependencies([self.registration.clone()]);
        let _lock = container.build_lock.lock();
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        let creator = self.build_expression(container)?.compile(container)?;
        let _ = self.creator.set(creator.clone());
        Ok(creator)
    }

    pub(crate) fn create(&self, container: &Arc<ContainerInner>, activation: &Activation<'_>) -> DiResult<AnyArc> {
        let creator = self.creator(container)?;
        creator(activation)
    }
}

impl fmt::Debug for InstanceProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceProducer")
            .field("service", &self.service)
            .field("implementation", &self.registration.implementation_type())
            .field("lifestyle", self.registration.lifestyle())
            .finish()
    }
}
