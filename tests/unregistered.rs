use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use wiregraph::{
    Component, Constructor, Container, DiError, InstanceProducer, Lifestyle, Parameter, Resolver, ServiceType,
};

struct Settings {
    name: &'static str,
}

struct Consumer {
    settings: Arc<Settings>,
}
impl Component for Consumer {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::service::<Settings>("settings")], |args| {
            Ok(Consumer { settings: args.next()? })
        })]
    }
}

#[test]
fn test_handler_supplies_missing_service() {
    let container = Container::new();
    container
        .on_resolve_unregistered_type(|args| {
            if args.service_type().is::<Settings>() {
                let registration = Lifestyle::Singleton
                    .create_factory_registration::<Settings, _>(args.container(), |_| {
                        Ok(Arc::new(Settings { name: "fallback" }))
                    });
                args.register(registration);
            }
        })
        .unwrap();
    container.register_concrete::<Consumer>(Lifestyle::Transient).unwrap();

    assert_eq!(container.get::<Consumer>().unwrap().settings.name, "fallback");
    assert!(Arc::ptr_eq(&container.get::<Settings>().unwrap(), &container.get::<Settings>().unwrap()));
}

#[test]
fn test_handler_result_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let container = Container::new();
    container
        .on_resolve_unregistered_type(move |args| {
            if args.service_type().is::<Settings>() {
                counter.fetch_add(1, Ordering::SeqCst);
                let registration = Lifestyle::Transient
                    .create_factory_registration::<Settings, _>(args.container(), |_| {
                        Ok(Arc::new(Settings { name: "transient" }))
                    });
                args.register(registration);
            }
        })
        .unwrap();

    container.get::<Settings>().unwrap();
    container.get::<Settings>().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_first_handler_to_answer_wins() {
    let second_called = Arc::new(AtomicUsize::new(0));
    let counter = second_called.clone();

    let container = Container::new();
    container.on_resolve_unregistered_type(|_| {}).unwrap();
    container
        .on_resolve_unregistered_type(|args| {
            let registration = Lifestyle::Transient
                .create_factory_registration::<Settings, _>(args.container(), |_| Ok(Arc::new(Settings { name: "first" })));
            args.register(registration);
        })
        .unwrap();
    container
        .on_resolve_unregistered_type(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(container.get::<Settings>().unwrap().name, "first");
    assert_eq!(second_called.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unhandled_service_is_not_registered() {
    let container = Container::new();
    container.on_resolve_unregistered_type(|_| {}).unwrap();
    assert!(matches!(container.get::<Settings>(), Err(DiError::NotRegistered { .. })));
}

#[test]
fn test_explicit_registrations_take_precedence() {
    let container = Container::new();
    container.register_instance(Arc::new(Settings { name: "explicit" })).unwrap();
    container
        .on_resolve_unregistered_type(|_| panic!("handler must not run for registered services"))
        .unwrap();

    assert_eq!(container.get::<Settings>().unwrap().name, "explicit");
}

#[test]
fn test_producer_for_wrong_service_is_rejected() {
    struct Other;

    let container = Container::new();
    container
        .on_resolve_unregistered_type(|args| {
            let registration = Lifestyle::Transient
                .create_factory_registration::<Other, _>(args.container(), |_| Ok(Arc::new(Other)));
            if let Ok(producer) = InstanceProducer::new::<Other, Other>(registration) {
                args.register_producer(producer);
            }
        })
        .unwrap();

    assert!(matches!(container.get::<Settings>(), Err(DiError::InvalidRegistration { .. })));
}

#[test]
fn test_handler_may_resolve_other_services() {
    struct Prefix(&'static str);

    let container = Container::new();
    container.register_instance(Arc::new(Prefix("env"))).unwrap();
    container
        .on_resolve_unregistered_type(|args| {
            if args.service_type() == ServiceType::of::<Settings>() {
                let registration =
                    Lifestyle::Transient.create_factory_registration::<Settings, _>(args.container(), |r| {
                        Ok(Arc::new(Settings { name: r.get::<Prefix>()?.0 }))
                    });
                args.register(registration);
            }
        })
        .unwrap();

    assert_eq!(container.get::<Settings>().unwrap().name, "env");
}

#[test]
fn test_handlers_cannot_be_added_after_lock() {
    let container = Container::new();
    container.get::<Settings>().ok();
    assert!(matches!(container.on_resolve_unregistered_type(|_| {}), Err(DiError::Locked)));
}

#[test]
fn test_handler_resolving_singleton_under_construction_does_not_deadlock() {
    struct Clock;
    struct Tick;

    let gate = Arc::new(Barrier::new(2));
    let container = Container::new();
    container.register_factory::<Tick, _>(Lifestyle::Transient, |_| Ok(Arc::new(Tick))).unwrap();
    let clock_gate = gate.clone();
    container
        .register_factory::<Clock, _>(Lifestyle::Singleton, move |r| {
            clock_gate.wait();
            r.get::<Tick>()?;
            Ok(Arc::new(Clock))
        })
        .unwrap();
    let handler_gate = gate.clone();
    container
        .on_resolve_unregistered_type(move |args| {
            if args.service_type().is::<Settings>() {
                handler_gate.wait();
                if args.container().get::<Clock>().is_ok() {
                    let registration = Lifestyle::Transient
                        .create_factory_registration::<Settings, _>(args.container(), |_| {
                            Ok(Arc::new(Settings { name: "clocked" }))
                        });
                    args.register(registration);
                }
            }
        })
        .unwrap();
    container.register_concrete::<Consumer>(Lifestyle::Transient).unwrap();

    let (done, finished) = mpsc::channel();
    let clock_container = container.clone();
    let clock_done = done.clone();
    thread::spawn(move || {
        clock_done.send(clock_container.get::<Clock>().is_ok()).ok();
    });
    let consumer_container = container.clone();
    thread::spawn(move || {
        let name = consumer_container.get::<Consumer>().map(|consumer| consumer.settings.name);
        done.send(matches!(name, Ok("clocked"))).ok();
    });

    for _ in 0..2 {
        assert_eq!(finished.recv_timeout(Duration::from_secs(10)), Ok(true));
    }
}
