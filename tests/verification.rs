use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wiregraph::{
    Component, Constructor, Container, ContainerOptions, DiError, DiagnosticKind, Lifestyle, Parameter, Resolver,
    VerificationMode,
};

struct Clock;
impl Component for Clock {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(Clock))]
    }
}

struct Scheduler {
    clock: Arc<Clock>,
}
impl Component for Scheduler {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::service::<Clock>("clock")], |args| {
            Ok(Scheduler { clock: args.next()? })
        })]
    }
}

struct Missing;

struct Broken;
impl Component for Broken {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::service::<Missing>("missing")], |args| {
            args.next::<Missing>()?;
            Ok(Broken)
        })]
    }
}

#[test]
fn test_valid_configuration_verifies_and_locks() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Singleton).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Transient).unwrap();

    container.verify().unwrap();
    assert!(container.is_locked());
    let scheduler = container.get::<Scheduler>().unwrap();
    assert!(Arc::ptr_eq(&scheduler.clock, &container.get::<Clock>().unwrap()));
}

#[test]
fn test_verification_collects_build_errors() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Singleton).unwrap();
    container.register_concrete::<Broken>(Lifestyle::Transient).unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(&errors[0], DiError::NotRegistered { service, .. } if *service == std::any::type_name::<Missing>()));
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

#[test]
fn test_verification_constructs_every_registration() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();

    let container = Container::new();
    container
        .register_factory::<Clock, _>(Lifestyle::Scoped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Clock))
        })
        .unwrap();

    container.verify().unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_verification_reports_activation_failures() {
    let container = Container::new();
    container
        .register_factory::<Clock, _>(Lifestyle::Transient, |_| Err(DiError::activation_failed::<Clock>("no time source")))
        .unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert!(matches!(&errors[0], DiError::ActivationFailed { reason, .. } if reason == "no time source"));
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

#[test]
fn test_verification_covers_collections() {
    trait Check: Send + Sync {}
    impl Check for Broken {}
    wiregraph::implements!(Broken => dyn Check);

    let container = Container::new();
    container.append_to_collection::<dyn Check, Broken>(Lifestyle::Transient).unwrap();

    assert!(matches!(container.verify(), Err(DiError::VerificationFailed { .. })));
}

#[test]
fn test_lifestyle_mismatch_is_diagnosed() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Singleton).unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            match &errors[0] {
                DiError::LifestyleMismatch { consumer, consumer_lifestyle, dependency, dependency_lifestyle } => {
                    assert_eq!(*consumer, std::any::type_name::<Scheduler>());
                    assert_eq!(*consumer_lifestyle, "Singleton");
                    assert_eq!(*dependency, std::any::type_name::<Clock>());
                    assert_eq!(*dependency_lifestyle, "Transient");
                }
                other => panic!("expected LifestyleMismatch, got {:?}", other),
            }
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

trait Sender: Send + Sync {}

struct Smtp;
impl Sender for Smtp {}
impl Component for Smtp {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(Smtp))]
    }
}
wiregraph::implements!(Smtp => dyn Sender);

struct Retrying {
    _inner: Arc<dyn Sender>,
}
impl Sender for Retrying {}
impl Component for Retrying {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::decoratee::<dyn Sender>("inner")], |args| {
            Ok(Retrying { _inner: args.next()? })
        })]
    }
}
wiregraph::implements!(Retrying => dyn Sender);

struct Batching {
    _factory: wiregraph::DecorateeFactory<dyn Sender>,
}
impl Sender for Batching {}
impl Component for Batching {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::decoratee_factory::<dyn Sender>("factory")], |args| {
            Ok(Batching { _factory: args.next_factory()? })
        })]
    }
}
wiregraph::implements!(Batching => dyn Sender);

#[test]
fn test_singleton_decorator_over_transient_decoratee_is_diagnosed() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Singleton).unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            match &errors[0] {
                DiError::LifestyleMismatch { consumer, consumer_lifestyle, dependency_lifestyle, .. } => {
                    assert_eq!(*consumer, std::any::type_name::<Retrying>());
                    assert_eq!(*consumer_lifestyle, "Singleton");
                    assert_eq!(*dependency_lifestyle, "Transient");
                }
                other => panic!("expected LifestyleMismatch, got {:?}", other),
            }
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

#[test]
fn test_outer_decorator_is_checked_against_inner_decorator() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Singleton).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Scoped).unwrap();
    container.register_decorator::<dyn Sender, Retrying>(Lifestyle::Singleton).unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(
                &errors[0],
                DiError::LifestyleMismatch { consumer_lifestyle, dependency_lifestyle, .. }
                    if *consumer_lifestyle == "Singleton" && *dependency_lifestyle == "Scoped"
            ));
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

#[test]
fn test_decoratee_factory_is_exempt_from_lifestyle_diagnostics() {
    let container = Container::new();
    container.register::<dyn Sender, Smtp>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Sender, Batching>(Lifestyle::Singleton).unwrap();

    container.verify().unwrap();
}

#[test]
fn test_verify_only_skips_diagnostics() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Singleton).unwrap();

    container.verify_with(VerificationMode::VerifyOnly).unwrap();
}

#[test]
fn test_verification_mode_from_options() {
    let container = Container::with_options(ContainerOptions {
        verification: VerificationMode::VerifyOnly,
        ..ContainerOptions::default()
    });
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Singleton).unwrap();

    container.verify().unwrap();
}

#[test]
fn test_suppressed_mismatch_is_not_reported() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    let registration = Lifestyle::Singleton.create_registration::<Scheduler>(&container);
    registration.suppress_diagnostic(DiagnosticKind::LifestyleMismatch);
    container.add_registration::<Scheduler, Scheduler>(registration).unwrap();

    container.verify().unwrap();
}

#[test]
fn test_longer_dependencies_are_fine() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Singleton).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Scoped).unwrap();

    container.verify().unwrap();
}

#[test]
fn test_scoped_consumer_of_transient_is_diagnosed() {
    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Scheduler>(Lifestyle::Scoped).unwrap();

    assert!(matches!(container.verify(), Err(DiError::VerificationFailed { .. })));
}

#[test]
fn test_verify_after_dispose_fails() {
    let container = Container::new();
    container.dispose().unwrap();
    assert!(matches!(container.verify(), Err(DiError::ContainerDisposed)));
}

#[test]
fn test_verification_error_message_lists_errors() {
    let container = Container::new();
    container.register_concrete::<Broken>(Lifestyle::Transient).unwrap();

    let message = container.verify().err().unwrap().to_string();
    assert!(message.contains("1 error(s)"));
    assert!(message.contains("Missing"));
}

#[test]
fn test_custom_lifestyle_length_takes_part_in_diagnostics() {
    let sticky = Lifestyle::custom("Sticky", 900, |creator| {
        let cache = Arc::new(parking_lot::Mutex::new(None));
        wiregraph::instance_creator(move |activation| {
            let mut slot = cache.lock();
            if let Some(instance) = &*slot {
                return Ok(Arc::clone(instance));
            }
            let instance = creator(activation)?;
            *slot = Some(instance.clone());
            Ok(instance)
        })
    });

    let container = Container::new();
    container.register_concrete::<Clock>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Scheduler>(sticky).unwrap();

    match container.verify() {
        Err(DiError::VerificationFailed { errors }) => {
            assert!(matches!(&errors[0], DiError::LifestyleMismatch { consumer_lifestyle, .. } if *consumer_lifestyle == "Sticky"));
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
    let first = container.get::<Scheduler>().unwrap();
    assert!(Arc::ptr_eq(&first, &container.get::<Scheduler>().unwrap()));
}
