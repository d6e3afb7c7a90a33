use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::key::ServiceType;
use crate::producer::InstanceProducer;
use crate::registration::Registration;

/// Passed to unregistered-type handlers.
///
/// A handler supplies a producer through [`register`](Self::register) or
/// [`register_producer`](Self::register_producer); handlers after the first
/// one that does are not asked.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wiregraph::{Container, Lifestyle, Resolver};
///
/// struct Settings { name: &'static str }
///
/// let container = Container::new();
/// container
///     .on_resolve_unregistered_type(|args| {
///         if args.service_type().is::<Settings>() {
///             let registration = Lifestyle::Singleton.create_factory_registration::<Settings, _>(
///                 args.container(),
///                 |_| Ok(Arc::new(Settings { name: "fallback" })),
///             );
///             args.register(registration);
///         }
///     })
///     .unwrap();
///
/// assert_eq!(container.get::<Settings>().unwrap().name, "fallback");
/// ```
pub struct UnregisteredTypeEventArgs {
    service: ServiceType,
    container: Container,
    result: Option<DiResult<Arc<InstanceProducer>>>,
}

impl UnregisteredTypeEventArgs {
    pub(crate) fn new(service: ServiceType, container: Container) -> Self {
        Self { service, container, result: None }
    }

    /// The requested service.
    pub fn service_type(&self) -> ServiceType {
        self.service
    }

    /// The container resolving the service, for creating registrations.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Whether a producer has been supplied.
    pub fn handled(&self) -> bool {
        self.result.is_some()
    }

    /// Supply a registration producing the requested service itself.
    ///
    /// Registrations of another implementation must be wrapped in an
    /// [`InstanceProducer`] and passed to
    /// [`register_producer`](Self::register_producer).
    pub fn register(&mut self, registration: Arc<Registration>) {
        let result = self
            .container
            .ensure_owned(&registration)
            .and_then(|()| InstanceProducer::for_registration(self.service, registration));
        self.result = Some(result);
    }

    /// Supply a producer for the requested service.
    pub fn register_producer(&mut self, producer: Arc<InstanceProducer>) {
        let result = if producer.service_type() != self.service {
            Err(DiError::InvalidRegistration {
                service: self.service.name(),
                reason: format!("the handler supplied a producer of {}", producer.service_type()),
            })
        } else {
            self.container.ensure_owned(producer.registration()).map(|()| producer)
        };
        self.result = Some(result);
    }

    pub(crate) fn into_producer(self) -> DiResult<Option<Arc<InstanceProducer>>> {
        self.result.transpose()
    }
}

impl fmt::Debug for UnregisteredTypeEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnregisteredTypeEventArgs")
            .field("service", &self.service)
            .field("handled", &self.handled())
            .finish()
    }
}
