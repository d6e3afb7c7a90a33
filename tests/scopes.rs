use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wiregraph::{
    Component, Constructor, Container, ContainerOptions, DiError, Lifestyle, Parameter, Resolver, ScopedLifestyle,
    ThreadScopedLifestyle,
};

struct UnitOfWork {
    id: usize,
}

struct Handler {
    unit: Arc<UnitOfWork>,
}
impl Component for Handler {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::service::<UnitOfWork>("unit")], |args| {
            Ok(Handler { unit: args.next()? })
        })]
    }
}

fn container_with(options: ContainerOptions) -> Container {
    let container = Container::with_options(options);
    let counter = Arc::new(AtomicUsize::new(0));
    container
        .register_factory::<UnitOfWork, _>(Lifestyle::Scoped, move |_| {
            Ok(Arc::new(UnitOfWork { id: counter.fetch_add(1, Ordering::SeqCst) }))
        })
        .unwrap();
    container.register_concrete::<Handler>(Lifestyle::Transient).unwrap();
    container
}

fn thread_scoped_container() -> Container {
    container_with(ContainerOptions::default())
}

#[test]
fn test_scoped_instance_shared_within_scope() {
    let container = thread_scoped_container();
    let scope = container.begin_scope();

    let first = scope.get::<Handler>().unwrap();
    let second = scope.get::<Handler>().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.unit, &second.unit));
    assert!(Arc::ptr_eq(&first.unit, &scope.get::<UnitOfWork>().unwrap()));
    scope.dispose().unwrap();
}

#[test]
fn test_scopes_do_not_share_instances() {
    let container = thread_scoped_container();
    let a = container.begin_scope();
    let b = container.begin_scope();

    let from_a = a.get::<UnitOfWork>().unwrap();
    let from_b = b.get::<UnitOfWork>().unwrap();
    assert_ne!(from_a.id, from_b.id);
}

#[test]
fn test_scoped_outside_scope_fails() {
    let container = thread_scoped_container();
    match container.get::<UnitOfWork>() {
        Err(DiError::NoActiveScope { lifestyle, .. }) => assert_eq!(lifestyle, "Thread Scoped"),
        other => panic!("expected NoActiveScope, got {:?}", other.err()),
    }
    // Also when the scoped service is a dependency.
    assert!(matches!(container.get::<Handler>(), Err(DiError::NoActiveScope { .. })));
}

#[test]
fn test_ambient_thread_scope() {
    let container = thread_scoped_container();
    let scope = ThreadScopedLifestyle::begin_scope(&container);

    let handler = container.get::<Handler>().unwrap();
    assert!(Arc::ptr_eq(&handler.unit, &container.get::<UnitOfWork>().unwrap()));
    assert!(Arc::ptr_eq(&handler.unit, &scope.get::<UnitOfWork>().unwrap()));
    assert_eq!(ThreadScopedLifestyle::current_scope(&container).unwrap().id(), scope.id());

    scope.dispose().unwrap();
    assert!(ThreadScopedLifestyle::current_scope(&container).is_none());
    assert!(container.get::<UnitOfWork>().is_err());
}

#[test]
fn test_explicit_scope_wins_over_ambient() {
    let container = thread_scoped_container();
    let ambient = ThreadScopedLifestyle::begin_scope(&container);
    let explicit = container.begin_scope();

    let from_ambient = container.get::<UnitOfWork>().unwrap();
    let from_explicit = explicit.get::<UnitOfWork>().unwrap();
    assert!(!Arc::ptr_eq(&from_ambient, &from_explicit));

    explicit.dispose().unwrap();
    ambient.dispose().unwrap();
}

#[test]
fn test_ambient_scope_is_per_thread() {
    let container = thread_scoped_container();
    let scope = ThreadScopedLifestyle::begin_scope(&container);
    let here = container.get::<UnitOfWork>().unwrap();

    let other = container.clone();
    let elsewhere = std::thread::spawn(move || {
        assert!(other.get::<UnitOfWork>().is_err());
        let scope = ThreadScopedLifestyle::begin_scope(&other);
        let id = other.get::<UnitOfWork>().unwrap().id;
        scope.dispose().unwrap();
        id
    })
    .join()
    .unwrap();

    assert_ne!(here.id, elsewhere);
    scope.dispose().unwrap();
}

#[test]
fn test_flowing_scopes_have_no_ambient_scope() {
    let container = container_with(ContainerOptions {
        default_scoped_lifestyle: ScopedLifestyle::Flowing,
        ..ContainerOptions::default()
    });

    let thread_scope = ThreadScopedLifestyle::begin_scope(&container);
    assert!(matches!(container.get::<UnitOfWork>(), Err(DiError::NoActiveScope { .. })));
    thread_scope.dispose().unwrap();

    let scope = container.begin_scope();
    let handler = scope.get::<Handler>().unwrap();
    assert!(Arc::ptr_eq(&handler.unit, &scope.get::<UnitOfWork>().unwrap()));
}

#[test]
fn test_child_scopes_have_own_instances() {
    let container = thread_scoped_container();
    let parent = container.begin_scope();
    let child = parent.begin_child();

    assert_eq!(child.parent().unwrap().id(), parent.id());
    let from_parent = parent.get::<UnitOfWork>().unwrap();
    let from_child = child.get::<UnitOfWork>().unwrap();
    assert!(!Arc::ptr_eq(&from_parent, &from_child));

    parent.dispose().unwrap();
    assert!(child.is_disposed());
}

#[test]
fn test_thread_scope_children_become_ambient() {
    let container = thread_scoped_container();
    let outer = ThreadScopedLifestyle::begin_scope(&container);
    let outer_unit = container.get::<UnitOfWork>().unwrap();

    let inner = outer.begin_child();
    assert_eq!(inner.ambient_lifestyle(), Some(ScopedLifestyle::ThreadScoped));
    assert!(!Arc::ptr_eq(&outer_unit, &container.get::<UnitOfWork>().unwrap()));

    inner.dispose().unwrap();
    assert!(Arc::ptr_eq(&outer_unit, &container.get::<UnitOfWork>().unwrap()));
    outer.dispose().unwrap();
}

#[test]
fn test_disposed_scope_rejects_resolution() {
    let container = thread_scoped_container();
    let scope = container.begin_scope();
    scope.get::<UnitOfWork>().unwrap();
    scope.dispose().unwrap();

    assert!(scope.is_disposed());
    let id = scope.id();
    assert!(matches!(scope.get::<UnitOfWork>(), Err(DiError::ScopeDisposed { scope }) if scope == id));
    assert!(matches!(scope.when_scope_ends(|| {}), Err(DiError::ScopeDisposed { .. })));
}

#[test]
fn test_using_disposes_scope() {
    let container = thread_scoped_container();
    let scope = container.begin_scope();
    let handle = scope.clone();

    let id = scope.using(|scope| scope.get::<UnitOfWork>().unwrap().id).unwrap();
    assert_eq!(id, 0);
    assert!(handle.is_disposed());
}

#[test]
fn test_scoped_with_specific_lifestyle() {
    let container = Container::with_options(ContainerOptions {
        default_scoped_lifestyle: ScopedLifestyle::Flowing,
        ..ContainerOptions::default()
    });
    container
        .register_factory::<UnitOfWork, _>(Lifestyle::ScopedWith(ScopedLifestyle::ThreadScoped), |_| {
            Ok(Arc::new(UnitOfWork { id: 7 }))
        })
        .unwrap();

    let producer = container.get_registration::<UnitOfWork>().unwrap();
    assert_eq!(producer.lifestyle(), &Lifestyle::ScopedWith(ScopedLifestyle::ThreadScoped));

    let scope = ThreadScopedLifestyle::begin_scope(&container);
    assert_eq!(container.get::<UnitOfWork>().unwrap().id, 7);
    scope.dispose().unwrap();
}

#[test]
fn test_scoped_registration_uses_default_at_registration_time() {
    let container = thread_scoped_container();
    let producer = container.get_registration::<UnitOfWork>().unwrap();
    assert_eq!(producer.lifestyle().name(), "Thread Scoped");
}

#[test]
fn test_singleton_depending_on_scoped_captures_first_scope() {
    struct Cache {
        unit: Arc<UnitOfWork>,
    }
    impl Component for Cache {
        fn constructors() -> Vec<Constructor<Self>> {
            vec![Constructor::new(vec![Parameter::service::<UnitOfWork>("unit")], |args| {
                Ok(Cache { unit: args.next()? })
            })]
        }
    }

    let container = thread_scoped_container();
    container.register_concrete::<Cache>(Lifestyle::Singleton).unwrap();

    // The singleton is built without an explicit scope, so the scoped
    // dependency needs an ambient one.
    let scope = ThreadScopedLifestyle::begin_scope(&container);
    let cache = container.get::<Cache>().unwrap();
    assert_eq!(cache.unit.id, 0);
    scope.dispose().unwrap();

    let later = container.begin_scope();
    assert!(Arc::ptr_eq(&cache, &later.get::<Cache>().unwrap()));
}
