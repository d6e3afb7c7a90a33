//! Declarative object-graph expressions and their compilation into creators.
//!
//! Building a producer yields an [`Expression`]: a tree describing how the
//! instance is made (constructor call, factory call, lifestyle cache,
//! decorator wrapping, references to other producers). The decorator
//! pipeline rewrites this tree; compiling it produces an
//! [`InstanceCreator`] closure that is invoked on every resolution.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::collection::CollectionProducer;
use crate::component::{Argument, ComponentModel, Implements, Initializer};
use crate::container::ContainerInner;
use crate::context::{Activation, ResolverContext};
use crate::decoration::{DecoratorPredicateContext, ErasedDecorateeFactory};
use crate::error::{DiError, DiResult};
use crate::key::{erase, unerase, AnyArc, Service, ServiceType};
use crate::lifestyle::{CustomLifestyle, ScopedLifestyle};
use crate::producer::InstanceProducer;
use crate::registration::Registration;

/// Compiled creator: produces one instance per call, honouring the lifestyle
/// caches and decorators that were part of the expression it came from.
pub type InstanceCreator = Arc<dyn for<'a> Fn(&Activation<'a>) -> DiResult<AnyArc> + Send + Sync>;

pub(crate) type Caster = Arc<dyn Fn(AnyArc) -> DiResult<AnyArc> + Send + Sync>;
pub(crate) type UserFactory =
    Arc<dyn for<'a> Fn(&ResolverContext<'a>) -> DiResult<AnyArc> + Send + Sync>;
pub(crate) type FunctionDecorator =
    Arc<dyn for<'a> Fn(AnyArc, &ResolverContext<'a>) -> DiResult<AnyArc> + Send + Sync>;
pub(crate) type RuntimePredicate = Arc<dyn Fn(&DecoratorPredicateContext) -> bool + Send + Sync>;

type ArgumentCreator = Arc<dyn for<'a> Fn(&Activation<'a>) -> DiResult<Argument> + Send + Sync>;

/// Build an [`InstanceCreator`] from a closure.
///
/// Custom lifestyles use this to wrap the creator they receive.
pub fn instance_creator<F>(f: F) -> InstanceCreator
where
    F: for<'a> Fn(&Activation<'a>) -> DiResult<AnyArc> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn argument_creator<F>(f: F) -> ArgumentCreator
where
    F: for<'a> Fn(&Activation<'a>) -> DiResult<Argument> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Upcast an erased `Arc<I>` into an erased `Arc<S>`.
pub(crate) fn caster<S, I>() -> Caster
where
    S: ?Sized + Service,
    I: ?Sized + Implements<S>,
{
    Arc::new(|any: AnyArc| -> DiResult<AnyArc> {
        let implementation =
            unerase::<I>(&any).ok_or(DiError::TypeMismatch(std::any::type_name::<I>()))?;
        Ok(erase::<S>(<I as Implements<S>>::upcast(implementation)))
    })
}

/// Lifestyle cache applied around a creation.
#[derive(Clone)]
pub(crate) enum Cache {
    Singleton(Arc<OnceCell<AnyArc>>),
    Scoped(ScopedLifestyle),
    Custom(CustomLifestyle),
}

pub(crate) enum Node {
    Constant {
        product: ServiceType,
        value: AnyArc,
    },
    New {
        model: Arc<ComponentModel>,
        constructor: usize,
        arguments: Vec<ArgumentExpression>,
        properties: Vec<(usize, ArgumentExpression)>,
        initializers: Vec<Initializer>,
        track_disposal: bool,
    },
    Invoke {
        product: ServiceType,
        factory: UserFactory,
    },
    Decorate {
        product: ServiceType,
        decorator: FunctionDecorator,
        decoratee: Expression,
    },
    Cached {
        registration: u64,
        implementation: ServiceType,
        cache: Cache,
        inner: Expression,
    },
    Registered(Arc<Registration>),
    Producer(Arc<InstanceProducer>),
    Cast {
        product: ServiceType,
        caster: Caster,
        inner: Expression,
    },
    Conditional {
        predicate: RuntimePredicate,
        context: DecoratorPredicateContext,
        decorated: Expression,
        undecorated: Expression,
    },
    Element {
        product: ServiceType,
    },
}

pub(crate) enum ArgumentExpression {
    Single(Expression),
    Many(Arc<CollectionProducer>),
    Factory { service: ServiceType, decoratee: Expression },
    Context(DecoratorPredicateContext),
}

/// Description of how an instance is produced.
///
/// Expressions are immutable and cheap to clone. Decorator predicates see
/// the expression built so far through
/// [`DecoratorPredicateContext::expression`](crate::DecoratorPredicateContext::expression).
#[derive(Clone)]
pub struct Expression(Arc<Node>);

impl Expression {
    pub(crate) fn from_node(node: Node) -> Self {
        Self(Arc::new(node))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    pub(crate) fn registered(registration: Arc<Registration>) -> Self {
        Self::from_node(Node::Registered(registration))
    }

    pub(crate) fn producer(producer: Arc<InstanceProducer>) -> Self {
        Self::from_node(Node::Producer(producer))
    }

    pub(crate) fn cast(product: ServiceType, caster: Caster, inner: Expression) -> Self {
        Self::from_node(Node::Cast { product, caster, inner })
    }

    pub(crate) fn element(product: ServiceType) -> Self {
        Self::from_node(Node::Element { product })
    }

    /// The type of the instance this expression produces.
    pub fn product_type(&self) -> ServiceType {
        match self.node() {
            Node::Constant { product, .. }
            | Node::Invoke { product, .. }
            | Node::Decorate { product, .. }
            | Node::Cast { product, .. }
            | Node::Element { product } => *product,
            Node::New { model, .. } => model.implementation(),
            Node::Cached { implementation, .. } => *implementation,
            Node::Registered(registration) => registration.implementation_type(),
            Node::Producer(producer) => producer.service_type(),
            Node::Conditional { decorated, .. } => decorated.product_type(),
        }
    }

    /// Whether this expression caches what it produces (a singleton, scoped
    /// or custom lifestyle, or a constant).
    pub fn is_cached(&self) -> bool {
        match self.node() {
            Node::Constant { .. } | Node::Cached { .. } => true,
            Node::Registered(registration) => !registration.lifestyle().is_transient(),
            Node::Cast { inner, .. } => inner.is_cached(),
            _ => false,
        }
    }

    /// Human readable rendering of the tree, for diagnostics.
    pub fn describe(&self) -> String {
        match self.node() {
            Node::Constant { product, .. } => format!("constant {}", product.short_name()),
            Node::New { model, arguments, .. } => {
                let args: Vec<String> = arguments.iter().map(ArgumentExpression::describe).collect();
                format!("new {}({})", model.implementation().short_name(), args.join(", "))
            }
            Node::Invoke { product, .. } => format!("factory {}", product.short_name()),
            Node::Decorate { product, decoratee, .. } => {
                format!("decorate {}({})", product.short_name(), decoratee.describe())
            }
            Node::Cached { cache, inner, .. } => format!("{}({})", cache.name(), inner.describe()),
            Node::Registered(registration) => format!(
                "registration {} ({})",
                registration.implementation_type().short_name(),
                registration.lifestyle().name()
            ),
            Node::Producer(producer) => format!("producer {}", producer.service_type().short_name()),
            Node::Cast { inner, .. } => inner.describe(),
            Node::Conditional { decorated, undecorated, .. } => format!(
                "when predicate {} else {}",
                decorated.describe(),
                undecorated.describe()
            ),
            Node::Element { product } => format!("element {}", product.short_name()),
        }
    }

    /// Compile into a creator. Referenced producers and registrations are
    /// compiled (once) and shared.
    pub(crate) fn compile(&self, container: &Arc<ContainerInner>) -> DiResult<InstanceCreator> {
        let creator: InstanceCreator = match self.node() {
            Node::Constant { value, .. } => {
                let value = value.clone();
                instance_creator(move |_| Ok(value.clone()))
            }
            Node::New { model, constructor, arguments, properties, initializers, track_disposal } => {
                let arguments = arguments
                    .iter()
                    .map(|a| a.compile(container))
                    .collect::<DiResult<Vec<_>>>()?;
                let properties = properties
                    .iter()
                    .map(|(index, a)| Ok((*index, a.compile(container)?)))
                    .collect::<DiResult<Vec<_>>>()?;
                let model = model.clone();
                let constructor = *constructor;
                let initializers = initializers.clone();
                let track_disposal = *track_disposal;

                instance_creator(move |activation| {
                    let values = arguments
                        .iter()
                        .map(|create| create(activation))
                        .collect::<DiResult<Vec<_>>>()?;
                    let assigned = properties
                        .iter()
                        .map(|(index, create)| Ok((*index, create(activation)?)))
                        .collect::<DiResult<Vec<_>>>()?;

                    let activated = model.activate(constructor, values, assigned)?;
                    for initializer in &initializers {
                        initializer(&activated.instance)?;
                    }
                    if let (true, Some(disposer)) = (track_disposal, activated.disposer) {
                        activation.track(disposer);
                    }
                    Ok(activated.instance)
                })
            }
            Node::Invoke { factory, .. } => {
                let factory = factory.clone();
                instance_creator(move |activation| factory(&ResolverContext::new(activation)))
            }
            Node::Decorate { decorator, decoratee, .. } => {
                let decorator = decorator.clone();
                let decoratee = decoratee.compile(container)?;
                instance_creator(move |activation| {
                    let inner = decoratee(activation)?;
                    decorator(inner, &ResolverContext::new(activation))
                })
            }
            Node::Cached { registration, implementation, cache, inner } => {
                let inner = inner.compile(container)?;
                cache.apply(*registration, *implementation, inner)
            }
            Node::Registered(registration) => registration.creator(container)?,
            Node::Producer(producer) => producer.creator(container)?,
            Node::Cast { caster, inner, .. } => {
                let caster = caster.clone();
                let inner = inner.compile(container)?;
                instance_creator(move |activation| caster(inner(activation)?))
            }
            Node::Conditional { predicate, context, decorated, undecorated } => {
                let predicate = predicate.clone();
                let context = context.clone();
                let decorated = decorated.compile(container)?;
                let undecorated = undecorated.compile(container)?;
                instance_creator(move |activation| {
                    if predicate(&context) {
                        decorated(activation)
                    } else {
                        undecorated(activation)
                    }
                })
            }
            Node::Element { product } => {
                let product = *product;
                instance_creator(move |activation| {
                    activation.element.cloned().ok_or(DiError::TypeMismatch(product.name()))
                })
            }
        };
        Ok(creator)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl ArgumentExpression {
    fn describe(&self) -> String {
        match self {
            ArgumentExpression::Single(expression) => expression.describe(),
            ArgumentExpression::Many(collection) => {
                format!("collection<{}>", collection.service_type().short_name())
            }
            ArgumentExpression::Factory { service, .. } => format!("factory<{}>", service.short_name()),
            ArgumentExpression::Context(_) => "decorator context".to_string(),
        }
    }

    fn compile(&self, container: &Arc<ContainerInner>) -> DiResult<ArgumentCreator> {
        let creator: ArgumentCreator = match self {
            ArgumentExpression::Single(expression) => {
                let create = expression.compile(container)?;
                argument_creator(move |activation| Ok(Argument::Instance(create(activation)?)))
            }
            ArgumentExpression::Many(collection) => {
                let create = collection.creator(container)?;
                argument_creator(move |activation| Ok(Argument::Collection(create(activation)?)))
            }
            ArgumentExpression::Factory { service, decoratee } => {
                let factory = Arc::new(ErasedDecorateeFactory::new(
                    *service,
                    decoratee.compile(container)?,
                    Arc::downgrade(container),
                ));
                argument_creator(move |_| Ok(Argument::Factory(factory.clone())))
            }
            ArgumentExpression::Context(context) => {
                let context = context.clone();
                argument_creator(move |_| Ok(Argument::Context(context.clone())))
            }
        };
        Ok(creator)
    }
}

impl Cache {
    fn name(&self) -> &'static str {
        match self {
            Cache::Singleton(_) => "Singleton",
            Cache::Scoped(lifestyle) => lifestyle.name(),
            Cache::Custom(lifestyle) => lifestyle.name(),
        }
    }

    fn apply(&self, registration: u64, implementation: ServiceType, inner: InstanceCreator) -> InstanceCreator {
        match self {
            Cache::Singleton(cell) => {
                let cell = cell.clone();
                instance_creator(move |activation| {
                    cell.get_or_try_init(|| {
                        let instance = inner(&activation.for_singleton())?;
                        debug!(
                            target: "wiregraph",
                            implementation = implementation.name(),
                            registration,
                            "Singleton created"
                        );
                        Ok(instance)
                    })
                    .cloned()
                })
            }
            Cache::Scoped(lifestyle) => {
                let lifestyle = *lifestyle;
                instance_creator(move |activation| {
                    let scope = lifestyle.current_scope(activation).ok_or(DiError::NoActiveScope {
                        service: implementation.name(),
                        lifestyle: lifestyle.name(),
                        hint: lifestyle.hint(),
                    })?;
                    scope.get_or_create(registration, || inner(&activation.within(&scope)))
                })
            }
            Cache::Custom(lifestyle) => lifestyle.wrap(inner),
        }
    }
}
