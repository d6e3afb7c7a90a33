use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wiregraph::{
    Component, Constructor, Container, DecorateeFactory, DecoratorOptions, DecoratorPredicateContext, DiError, DiResult, Lifestyle,
    Parameter, Resolver, ResolverContext, ServiceDecorator, ServiceType, ThreadScopedLifestyle,
};

trait Sender: Send + Sync {
    fn send(&self) -> String;
}

struct Smtp;
impl Sender for Smtp {
    fn send(&self) -> String {
        "smtp".into()
    }
}
impl Component for Smtp {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(Smtp))]
    }
}
wiregraph::implements!(Smtp => dyn Sender);

struct Sms;
impl Sender for Sms {
    fn send(&self) -> String {
        "sms".into()
    }
}
impl Component for Sms {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(Sms))]
    }
}
wiregraph::implements!(Sms => dyn Sender);

macro_rules! wrapping_decorator {
    ($name:ident, $label:literal) => {
        struct $name {
            inner: Arc<dyn Sender>,
        }
        impl Sender for $name {
            fn send(&self) -> String {
                format!("{}({})", $label, self.inner.send())
            }
        }
        impl Component for $name {
            fn constructors() -> Vec<Constructor<Self>> {
                vec![Constructor::new(vec![Parameter::decoratee::<dyn Sender>("inner")], |args| {
                    Ok($name { inner: args.next()? })
                })]
            }
        }
        wiregraph::implements!($name => dyn Sender);
    };
}

wrapping_decorator!(Retrying, "retry");
wrapping_decorator!(Logging, "log");

#[test]
fn test_decorators_wrap_in_registration_order() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Logging>(Lifestyle::Transient).unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "log(retry(smtp))");

    let producer = container.get_registration::<dyn Sender>().unwrap();
    assert_eq!(producer.decorators(), vec![ServiceType::of::<Retrying>(), ServiceType::of::<Logging>()]);
}

#[test]
fn test_decorators_can_be_registered_before_the_service() {
    let container = Container::new();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();
    container.register::<dyn Sender, Sms>(Lifestyle::Transient).unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "retry(sms)");
}

#[test]
fn test_build_time_predicate_sees_implementation() {
    let container = Container::new();
    container.register::<dyn Sender, Sms>(Lifestyle::Transient).unwrap();
    container
        .register_decorator_when::<dyn Sender, Retrying, _>(Lifestyle::Transient, |context| {
            context.implementation_type() == ServiceType::of::<Smtp>()
        })
        .unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "sms");
    assert!(container.get_registration::<dyn Sender>().unwrap().decorators().is_empty());
}

#[test]
fn test_predicate_sees_applied_decorators() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();

    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();
    container
        .register_decorator_when::<dyn Sender, Logging, _>(Lifestyle::Transient, move |context| {
            record.lock().unwrap().extend(context.applied_decorators().iter().copied());
            !context.applied_decorators().contains(&ServiceType::of::<Retrying>())
        })
        .unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "retry(smtp)");
    assert_eq!(*seen.lock().unwrap(), vec![ServiceType::of::<Retrying>()]);
}

#[test]
fn test_runtime_predicate_is_evaluated_per_resolution() {
    let enabled = Arc::new(AtomicBool::new(false));
    let flag = enabled.clone();

    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container
        .register_decorator_with::<dyn Sender, Logging>(
            Lifestyle::Transient,
            DecoratorOptions::new().when_resolved(move |_| flag.load(Ordering::SeqCst)),
        )
        .unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "smtp");
    enabled.store(true, Ordering::SeqCst);
    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "log(smtp)");
}

#[test]
fn test_singleton_decorator_wraps_once() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Singleton).unwrap();

    let a = container.get::<dyn Sender>().unwrap();
    let b = container.get::<dyn Sender>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_transient_decorator_around_singleton() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Singleton).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();

    let a = container.get::<dyn Sender>().unwrap();
    let b = container.get::<dyn Sender>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.send(), "retry(smtp)");
}

#[test]
fn test_function_decorator() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container
        .register_decorator_fn::<dyn Sender, _>(Lifestyle::Transient, |inner, _| {
            Ok(Arc::new(Logging { inner }) as Arc<dyn Sender>)
        })
        .unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "log(smtp)");
}

struct Prefix(&'static str);

struct Prefixing;
impl ServiceDecorator<dyn Sender> for Prefixing {
    fn decorate(&self, original: Arc<dyn Sender>, resolver: &ResolverContext<'_>) -> DiResult<Arc<dyn Sender>> {
        struct Prefixed(&'static str, Arc<dyn Sender>);
        impl Sender for Prefixed {
            fn send(&self) -> String {
                format!("{}:{}", self.0, self.1.send())
            }
        }
        let prefix = resolver.get::<Prefix>()?;
        Ok(Arc::new(Prefixed(prefix.0, original)))
    }
}

#[test]
fn test_service_decorator_resolves_dependencies() {
    let container = Container::new();
    container.register_instance(Arc::new(Prefix("eu"))).unwrap();
    container.register::<dyn Sender, Sms>(Lifestyle::Transient).unwrap();
    container.register_service_decorator::<dyn Sender, _>(Lifestyle::Transient, Prefixing).unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "eu:sms");
}

struct Auditing {
    inner: Arc<dyn Sender>,
    decorated: ServiceType,
}
impl Sender for Auditing {
    fn send(&self) -> String {
        format!("audit[{}]({})", self.decorated.short_name(), self.inner.send())
    }
}
impl Component for Auditing {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(
            vec![Parameter::decoratee::<dyn Sender>("inner"), Parameter::decorator_context("context")],
            |args| {
                let inner = args.next()?;
                let context: DecoratorPredicateContext = args.next_context()?;
                Ok(Auditing { inner, decorated: context.implementation_type() })
            },
        )]
    }
}
wiregraph::implements!(Auditing => dyn Sender);

#[test]
fn test_decorator_receives_context() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Auditing>(Lifestyle::Transient).unwrap();

    let sent = container.get::<dyn Sender>().unwrap().send();
    assert!(sent.starts_with("audit["));
    assert!(sent.contains("Smtp"));
    assert!(sent.ends_with("(smtp)"));
}

struct NotADecorator;
impl Sender for NotADecorator {
    fn send(&self) -> String {
        "none".into()
    }
}
impl Component for NotADecorator {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(NotADecorator))]
    }
}
wiregraph::implements!(NotADecorator => dyn Sender);

#[test]
fn test_decorator_without_decoratee_is_rejected() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, NotADecorator>(Lifestyle::Transient).unwrap();

    assert!(matches!(container.get::<dyn Sender>(), Err(DiError::Decoration { .. })));
}

#[test]
fn test_decoratee_outside_decorator_is_rejected() {
    let container = Container::new();
    container.register::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();

    assert!(matches!(container.get::<dyn Sender>(), Err(DiError::InvalidRegistration { .. })));
}

#[test]
fn test_decorators_apply_per_service() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient).unwrap();

    assert_eq!(container.get::<dyn Sender>().unwrap().send(), "retry(smtp)");
    assert_eq!(container.get::<Smtp>().unwrap().send(), "smtp");
}

#[test]
fn test_decorator_registration_after_lock_fails() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.get::<dyn Sender>().unwrap();

    let result = container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Transient);
    assert!(matches!(result, Err(DiError::Locked)));
}

#[test]
fn test_transient_decorator_around_scoped_decoratee() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Scoped).unwrap();
    container.register_decorator::<dyn Sender, Logging>(Lifestyle::Transient).unwrap();

    let first_scope = container.begin_scope();
    let second_scope = container.begin_scope();
    let a = first_scope.get::<dyn Sender>().unwrap();
    let b = first_scope.get::<dyn Sender>().unwrap();
    let c = second_scope.get::<dyn Sender>().unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.send(), "log(smtp)");
    assert_eq!(c.send(), "log(smtp)");
    first_scope.dispose().unwrap();
    second_scope.dispose().unwrap();
}

struct Deferred {
    factory: DecorateeFactory<dyn Sender>,
    created: Arc<AtomicUsize>,
}
impl Sender for Deferred {
    fn send(&self) -> String {
        self.created.fetch_add(1, Ordering::SeqCst);
        match self.factory.create() {
            Ok(inner) => format!("deferred({})", inner.send()),
            Err(error) => format!("deferred failed: {}", error),
        }
    }
}
impl Component for Deferred {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(
            vec![
                Parameter::decoratee_factory::<dyn Sender>("factory"),
                Parameter::service::<AtomicUsize>("created"),
            ],
            |args| Ok(Deferred { factory: args.next_factory()?, created: args.next()? }),
        )]
    }
}
wiregraph::implements!(Deferred => dyn Sender);

#[test]
fn test_singleton_decorator_with_decoratee_factory_creates_per_scope() {
    let smtp_created = Arc::new(AtomicUsize::new(0));
    let counter = smtp_created.clone();

    let container = Container::new();
    let sends = Arc::new(AtomicUsize::new(0));
    container.register_instance(sends.clone()).unwrap();
    container
        .register_factory::<dyn Sender, _>(Lifestyle::Scoped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Smtp) as Arc<dyn Sender>)
        })
        .unwrap();
    container.register_decorator::<dyn Sender, Deferred>(Lifestyle::Singleton).unwrap();

    let sender = container.get::<dyn Sender>().unwrap();
    assert!(Arc::ptr_eq(&sender, &container.get::<dyn Sender>().unwrap()));
    assert!(sender.send().starts_with("deferred failed"));

    let scope = ThreadScopedLifestyle::begin_scope(&container);
    assert_eq!(sender.send(), "deferred(smtp)");
    assert_eq!(sender.send(), "deferred(smtp)");
    scope.dispose().unwrap();
    assert_eq!(smtp_created.load(Ordering::SeqCst), 1);

    let scope = ThreadScopedLifestyle::begin_scope(&container);
    sender.send();
    scope.dispose().unwrap();
    assert_eq!(smtp_created.load(Ordering::SeqCst), 2);
    assert_eq!(sends.load(Ordering::SeqCst), 4);
}
