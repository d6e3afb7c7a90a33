//! Registrations: how one implementation is built, cached and compiled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::trace;

use crate::behaviors::ConstructorCandidate;
use crate::component::{Component, ComponentModel, Implements, Parameter, ParameterKind};
use crate::conditional::InjectionConsumer;
use crate::container::ContainerInner;
use crate::decoration::DecorationBinding;
use crate::error::{DiError, DiResult};
use crate::expression::{
    caster, ArgumentExpression, Cache, Caster, Expression, FunctionDecorator, InstanceCreator, Node, UserFactory,
};
use crate::internal::{circular, next_id};
use crate::key::{AnyArc, Service, ServiceType};
use crate::lifestyle::{Lifestyle, ScopedLifestyle};
use crate::producer::InstanceProducer;

/// Diagnostic checks a registration can opt out of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A component depending on a service with a shorter lifestyle.
    LifestyleMismatch,
}

pub(crate) enum RegistrationSource {
    Component(Arc<ComponentModel>),
    Factory(UserFactory),
    Instance(AnyArc),
    FunctionDecorator(FunctionDecorator),
}

/// How instances of one implementation are created and cached.
///
/// A registration belongs to the container that created it. It builds its
/// expression (constructor selection, dependencies, property injection,
/// initializers), wraps it in the lifestyle's cache, and compiles it once.
/// Several [`InstanceProducer`]s may share a registration, in which case
/// they share its cached instances.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use wiregraph::{Component, Constructor, Container, Lifestyle, Resolver, ServiceType};
///
/// trait Reader: Send + Sync {}
/// trait Writer: Send + Sync {}
///
/// struct FileStore;
/// impl Reader for FileStore {}
/// impl Writer for FileStore {}
/// impl Component for FileStore {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(vec![], |_| Ok(FileStore))]
///     }
/// }
/// wiregraph::implements!(FileStore => dyn Reader, dyn Writer);
///
/// let container = Container::new();
/// let registration = Lifestyle::Singleton.create_registration::<FileStore>(&container);
/// container.add_producer(
///     wiregraph::InstanceProducer::new::<dyn Reader, FileStore>(registration.clone()).unwrap(),
/// ).unwrap();
/// container.add_producer(
///     wiregraph::InstanceProducer::new::<dyn Writer, FileStore>(registration).unwrap(),
/// ).unwrap();
///
/// let reader = container.get::<dyn Reader>().unwrap();
/// let writer = container.get::<dyn Writer>().unwrap();
/// assert_eq!(
///     Arc::as_ptr(&reader) as *const () as usize,
///     Arc::as_ptr(&writer) as *const () as usize
/// );
/// ```
pub struct Registration {
    id: u64,
    container_id: u64,
    implementation: ServiceType,
    lifestyle: Lifestyle,
    source: RegistrationSource,
    singleton: Arc<OnceCell<AnyArc>>,
    expression: OnceCell<Expression>,
    creator: OnceCell<InstanceCreator>,
    relationships: OnceCell<Vec<KnownRelationship>>,
    suppress_disposal: AtomicBool,
    suppressed: Mutex<Vec<DiagnosticKind>>,
}

impl Registration {
    pub(crate) fn new(
        container: &Arc<ContainerInner>,
        lifestyle: Lifestyle,
        implementation: ServiceType,
        source: RegistrationSource,
    ) -> Arc<Self> {
        let lifestyle = match source {
            RegistrationSource::Instance(_) => Lifestyle::Singleton,
            _ => lifestyle.normalize(container.options().default_scoped_lifestyle),
        };

        Arc::new(Self {
            id: next_id(),
            container_id: container.id(),
            implementation,
            lifestyle,
            source,
            singleton: Arc::new(OnceCell::new()),
            expression: OnceCell::new(),
            creator: OnceCell::new(),
            relationships: OnceCell::new(),
            suppress_disposal: AtomicBool::new(false),
            suppressed: Mutex::new(Vec::new()),
        })
    }

    /// Auto-wired registration of `I`.
    pub(crate) fn component<I: Component>(container: &Arc<ContainerInner>, lifestyle: Lifestyle) -> Arc<Self> {
        Self::new(
            container,
            lifestyle,
            ServiceType::of::<I>(),
            RegistrationSource::Component(ComponentModel::of::<I>()),
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every service a constructor of this registration can ask for, with
    /// the consumer it is asked for.
    pub(crate) fn constructor_dependencies(&self) -> Vec<(ServiceType, InjectionConsumer)> {
        let RegistrationSource::Component(model) = &self.source else {
            return Vec::new();
        };
        model
            .constructors()
            .iter()
            .flat_map(|constructor| constructor.parameters.iter())
            .filter_map(|parameter| match parameter.kind() {
                ParameterKind::Service(service) | ParameterKind::Value(service) => {
                    Some((service, InjectionConsumer::new(self.implementation, parameter.name())))
                }
                _ => None,
            })
            .collect()
    }

    /// The type this registration produces.
    pub fn implementation_type(&self) -> ServiceType {
        self.implementation
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    pub(crate) fn container_id(&self) -> u64 {
        self.container_id
    }

    /// Stop the container from disposing instances of this registration.
    pub fn suppress_disposal(&self, suppress: bool) {
        self.suppress_disposal.store(suppress, Ordering::Release);
    }

    pub fn is_disposal_suppressed(&self) -> bool {
        self.suppress_disposal.load(Ordering::Acquire)
    }

    /// Exclude this registration from a diagnostic check.
    pub fn suppress_diagnostic(&self, kind: DiagnosticKind) {
        let mut suppressed = self.suppressed.lock();
        if !suppressed.contains(&kind) {
            suppressed.push(kind);
        }
    }

    pub fn is_diagnostic_suppressed(&self, kind: DiagnosticKind) -> bool {
        self.suppressed.lock().contains(&kind)
    }

    /// Dependencies discovered when the expression was built.
    pub fn relationships(&self) -> Vec<KnownRelationship> {
        self.relationships.get().cloned().unwrap_or_default()
    }

    /// The built expression, once the registration has been built.
    pub fn expression(&self) -> Option<Expression> {
        self.expression.get().cloned()
    }

    /// Build (once) the lifestyle-wrapped expression.
    pub(crate) fn build_expression(&self, container: &Arc<ContainerInner>) -> DiResult<Expression> {
        self.build_expression_with(container, None)
    }

    /// Build (once) the lifestyle-wrapped expression of a decorator
    /// registration around the decoratee in `binding`.
    pub(crate) fn build_decorator_expression(
        &self,
        container: &Arc<ContainerInner>,
        binding: &DecorationBinding,
    ) -> DiResult<Expression> {
        self.build_expression_with(container, Some(binding))
    }

    fn build_expression_with(
        &self,
        container: &Arc<ContainerInner>,
        binding: Option<&DecorationBinding>,
    ) -> DiResult<Expression> {
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let _lock = container.build_lock.lock();
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let (creation, relationships) = self.build_creation(container, binding)?;
        let expression = self.wrap(creation);

        trace!(
            target: "wiregraph",
            implementation = self.implementation.name(),
            lifestyle = self.lifestyle.name(),
            expression = %expression,
            "Registration built"
        );

        let _ = self.relationships.set(relationships);
        let _ = self.expression.set(expression.clone());
        Ok(expression)
    }

    /// Build (once) the creation expression of a decorator registration
    /// without lifestyle caching. Decorators of uncontrolled collections
    /// cache per element instead.
    pub(crate) fn build_element_decorator(
        &self,
        container: &Arc<ContainerInner>,
        binding: &DecorationBinding,
    ) -> DiResult<Expression> {
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let _lock = container.build_lock.lock();
        if let Some(expression) = self.expression.get() {
            return Ok(expression.clone());
        }

        let (creation, relationships) = self.build_creation(container, Some(binding))?;
        let _ = self.relationships.set(relationships);
        let _ = self.expression.set(creation.clone());
        Ok(creation)
    }

    fn build_creation(
        &self,
        container: &Arc<ContainerInner>,
        binding: Option<&DecorationBinding>,
    ) -> DiResult<(Expression, Vec<KnownRelationship>)> {
        match &self.source {
            RegistrationSource::Instance(value) => Ok((
                Expression::from_node(Node::Constant { product: self.implementation, value: value.clone() }),
                Vec::new(),
            )),
            RegistrationSource::Factory(factory) => Ok((
                Expression::from_node(Node::Invoke { product: self.implementation, factory: factory.clone() }),
                Vec::new(),
            )),
            RegistrationSource::FunctionDecorator(decorator) => {
                let binding = binding.ok_or_else(|| DiError::InvalidRegistration {
                    service: self.implementation.name(),
                    reason: "a decorator function can only be applied as a decorator".into(),
                })?;
                Ok((
                    Expression::from_node(Node::Decorate {
                        product: binding.service,
                        decorator: decorator.clone(),
                        decoratee: binding.decoratee.clone(),
                    }),
                    Vec::new(),
                ))
            }
            RegistrationSource::Component(model) => self.build_component(container, model, binding),
        }
    }

    fn build_component(
        &self,
        container: &Arc<ContainerInner>,
        model: &Arc<ComponentModel>,
        binding: Option<&DecorationBinding>,
    ) -> DiResult<(Expression, Vec<KnownRelationship>)> {
        let options = container.options();
        let implementation = model.implementation();

        let candidates: Vec<ConstructorCandidate<'_>> = model
            .constructors()
            .iter()
            .enumerate()
            .map(|(index, info)| ConstructorCandidate {
                index,
                parameters: &info.parameters,
                is_public: info.public,
            })
            .collect();
        let in_decorator = binding.is_some();
        let resolvable = |parameter: &Parameter| container.can_resolve(implementation, parameter, in_decorator);

        let constructor = options
            .constructor_resolution
            .select_constructor(implementation, &candidates, &resolvable)
            .map_err(|reason| DiError::NoSuitableConstructor { implementation: implementation.name(), reason })?;
        let parameters = &model.constructors()[constructor].parameters;

        if let Some(binding) = binding {
            let decoratees = parameters
                .iter()
                .filter(|p| matches!(p.kind(), ParameterKind::Decoratee(_) | ParameterKind::DecorateeFactory(_)))
                .count();
            if decoratees != 1 {
                return Err(DiError::Decoration {
                    decorator: implementation.name(),
                    service: binding.service.name(),
                    reason: format!(
                        "a decorator needs exactly one decoratee or decoratee factory parameter, found {}",
                        decoratees
                    ),
                });
            }
        }

        let mut relationships = Vec::new();
        let mut arguments = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            arguments.push(self.build_argument(container, implementation, parameter, binding, &mut relationships)?);
        }

        let mut properties = Vec::new();
        for (index, parameter) in model.properties().iter().enumerate() {
            if options.property_selection.select_property(implementation, parameter) {
                let argument = self.build_argument(container, implementation, parameter, binding, &mut relationships)?;
                properties.push((index, argument));
            }
        }

        let creation = Expression::from_node(Node::New {
            model: model.clone(),
            constructor,
            arguments,
            properties,
            initializers: container.initializers_for(implementation),
            track_disposal: !self.is_disposal_suppressed(),
        });
        Ok((creation, relationships))
    }

    fn build_argument(
        &self,
        container: &Arc<ContainerInner>,
        implementation: ServiceType,
        parameter: &Parameter,
        binding: Option<&DecorationBinding>,
        relationships: &mut Vec<KnownRelationship>,
    ) -> DiResult<ArgumentExpression> {
        let consumer = InjectionConsumer::new(implementation, parameter.name());

        match parameter.kind() {
            ParameterKind::Service(service) | ParameterKind::Value(service) => {
                let producer = match container.producer_for(service, Some(&consumer))? {
                    Some(producer) => producer,
                    None if matches!(parameter.kind(), ParameterKind::Value(_)) => {
                        return Err(DiError::UnresolvableParameter {
                            implementation: implementation.name(),
                            parameter: parameter.name(),
                            parameter_type: service.name(),
                            reason: "value types can only be injected when registered explicitly".into(),
                        });
                    }
                    None => return Err(not_registered(service, implementation)),
                };

                producer.build_expression(container)?;
                relationships.push(KnownRelationship {
                    implementation_type: implementation,
                    lifestyle: self.lifestyle.clone(),
                    dependency: producer.clone(),
                });
                Ok(ArgumentExpression::Single(Expression::producer(producer)))
            }
            ParameterKind::Collection(service) => {
                let collection = container
                    .collection_for(service)?
                    .ok_or_else(|| not_registered(service, implementation))?;
                collection.build(container)?;
                Ok(ArgumentExpression::Many(collection))
            }
            ParameterKind::Decoratee(service) => {
                let binding = decoratee_binding(implementation, parameter, service, binding)?;
                if let Some(decoratee) = &binding.decoratee_producer {
                    relationships.push(KnownRelationship {
                        implementation_type: implementation,
                        lifestyle: self.lifestyle.clone(),
                        dependency: decoratee.clone(),
                    });
                }
                Ok(ArgumentExpression::Single(binding.decoratee.clone()))
            }
            ParameterKind::DecorateeFactory(service) => {
                let binding = decoratee_binding(implementation, parameter, service, binding)?;
                if !binding.allow_factory {
                    return Err(DiError::Decoration {
                        decorator: implementation.name(),
                        service: service.name(),
                        reason: "decoratee factories are not supported when decorating a container-uncontrolled collection".into(),
                    });
                }
                Ok(ArgumentExpression::Factory { service, decoratee: binding.decoratee.clone() })
            }
            ParameterKind::DecoratorContext => match binding {
                Some(binding) => Ok(ArgumentExpression::Context(binding.context.clone())),
                None => Err(DiError::InvalidRegistration {
                    service: implementation.name(),
                    reason: format!(
                        "parameter '{}' asks for a decorator context, which is only available to decorators",
                        parameter.name()
                    ),
                }),
            },
        }
    }

    /// Compile (once) the expression into the creator shared by every
    /// producer of this registration.
    pub(crate) fn creator(&self, container: &Arc<ContainerInner>) -> DiResult<InstanceCreator> {
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        let _lock = container.build_lock.lock();
        if let Some(creator) = self.creator.get() {
            return Ok(creator.clone());
        }

        let expression = self.build_expression(container)?;
        let creator = expression.compile(container)?;
        let _ = self.creator.set(creator.clone());
        Ok(creator)
    }

    fn wrap(&self, creation: Expression) -> Expression {
        if matches!(self.source, RegistrationSource::Instance(_)) {
            return creation;
        }

        let cache = match &self.lifestyle {
            Lifestyle::Transient => return creation,
            Lifestyle::Singleton => Cache::Singleton(self.singleton.clone()),
            Lifestyle::Scoped => Cache::Scoped(ScopedLifestyle::ThreadScoped),
            Lifestyle::ScopedWith(scoped) => Cache::Scoped(*scoped),
            Lifestyle::Custom(custom) => Cache::Custom(custom.clone()),
        };

        Expression::from_node(Node::Cached {
            registration: self.id,
            implementation: self.implementation,
            cache,
            inner: creation,
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("implementation", &self.implementation)
            .field("lifestyle", &self.lifestyle)
            .finish()
    }
}

pub(crate) type RegistrationFactory =
    Arc<dyn Fn(&Arc<ContainerInner>, Lifestyle) -> Arc<Registration> + Send + Sync>;

/// One implementation serving one service, registered lazily.
///
/// Used where registrations are created per match: open-generic closings and
/// decorators, which get a registration per decorated producer.
#[derive(Clone)]
pub(crate) struct Closing {
    pub(crate) service: ServiceType,
    pub(crate) implementation: ServiceType,
    pub(crate) make: RegistrationFactory,
    pub(crate) caster: Option<Caster>,
}

impl Closing {
    pub(crate) fn component<S, I>() -> Self
    where
        S: ?Sized + Service,
        I: Component + Implements<S>,
    {
        let service = ServiceType::of::<S>();
        let implementation = ServiceType::of::<I>();
        Self {
            service,
            implementation,
            make: Arc::new(|container: &Arc<ContainerInner>, lifestyle: Lifestyle| {
                Registration::component::<I>(container, lifestyle)
            }),
            caster: (service != implementation).then(caster::<S, I>),
        }
    }

    pub(crate) fn function(service: ServiceType, decorator: FunctionDecorator) -> Self {
        Self {
            service,
            implementation: service,
            make: Arc::new(move |container: &Arc<ContainerInner>, lifestyle: Lifestyle| {
                Registration::new(
                    container,
                    lifestyle,
                    service,
                    RegistrationSource::FunctionDecorator(decorator.clone()),
                )
            }),
            caster: None,
        }
    }

    pub(crate) fn registration(&self, container: &Arc<ContainerInner>, lifestyle: Lifestyle) -> Arc<Registration> {
        (self.make)(container, lifestyle)
    }

    pub(crate) fn producer(&self, container: &Arc<ContainerInner>, lifestyle: Lifestyle) -> Arc<InstanceProducer> {
        InstanceProducer::with_caster(self.service, self.registration(container, lifestyle), self.caster.clone())
    }
}

fn decoratee_binding<'b>(
    implementation: ServiceType,
    parameter: &Parameter,
    service: ServiceType,
    binding: Option<&'b DecorationBinding>,
) -> DiResult<&'b DecorationBinding> {
    match binding {
        Some(binding) if binding.service == service => Ok(binding),
        Some(binding) => Err(DiError::Decoration {
            decorator: implementation.name(),
            service: binding.service.name(),
            reason: format!(
                "decoratee parameter '{}' is of type {}, which is not the decorated service",
                parameter.name(),
                service.name()
            ),
        }),
        None => Err(DiError::InvalidRegistration {
            service: implementation.name(),
            reason: format!(
                "parameter '{}' is a decoratee, but {} is not registered as a decorator",
                parameter.name(),
                implementation.name()
            ),
        }),
    }
}

fn not_registered(service: ServiceType, consumer: ServiceType) -> DiError {
    let mut chain = circular::build_chain();
    if chain.is_empty() {
        chain.push(consumer.name());
    }
    DiError::NotRegistered { service: service.name(), chain }
}

/// A dependency discovered while building a registration.
///
/// Used by verification to detect lifestyle mismatches.
#[derive(Clone)]
pub struct KnownRelationship {
    implementation_type: ServiceType,
    lifestyle: Lifestyle,
    dependency: Arc<InstanceProducer>,
}

impl KnownRelationship {
    /// The consuming implementation.
    pub fn implementation_type(&self) -> ServiceType {
        self.implementation_type
    }

    /// Lifestyle of the consuming implementation.
    pub fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    /// The producer the consumer depends on.
    pub fn dependency(&self) -> &Arc<InstanceProducer> {
        &self.dependency
    }
}

impl fmt::Debug for KnownRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) -> {} ({})",
            self.implementation_type,
            self.lifestyle.name(),
            self.dependency.service_type(),
            self.dependency.lifestyle().name()
        )
    }
}
