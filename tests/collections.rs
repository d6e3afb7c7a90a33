use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wiregraph::{Component, Constructor, Container, DiError, Lifestyle, Parameter, Resolver};

trait Plugin: Send + Sync {
    fn name(&self) -> String;
}

macro_rules! plugin {
    ($name:ident, $label:literal) => {
        struct $name;
        impl Plugin for $name {
            fn name(&self) -> String {
                $label.into()
            }
        }
        impl Component for $name {
            fn constructors() -> Vec<Constructor<Self>> {
                vec![Constructor::new(vec![], |_| Ok($name))]
            }
        }
        wiregraph::implements!($name => dyn Plugin);
    };
}

plugin!(Metrics, "metrics");
plugin!(Tracing, "tracing");
plugin!(Health, "health");

struct Named(&'static str);
impl Plugin for Named {
    fn name(&self) -> String {
        self.0.into()
    }
}

struct Traced {
    inner: Arc<dyn Plugin>,
}
impl Plugin for Traced {
    fn name(&self) -> String {
        format!("traced({})", self.inner.name())
    }
}
impl Component for Traced {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::decoratee::<dyn Plugin>("inner")], |args| {
            Ok(Traced { inner: args.next()? })
        })]
    }
}
wiregraph::implements!(Traced => dyn Plugin);

struct Host {
    plugins: Vec<Arc<dyn Plugin>>,
}
impl Component for Host {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::collection::<dyn Plugin>("plugins")], |args| {
            Ok(Host { plugins: args.next_all()? })
        })]
    }
}

fn names(plugins: &[Arc<dyn Plugin>]) -> Vec<String> {
    plugins.iter().map(|plugin| plugin.name()).collect()
}

#[test]
fn test_controlled_collection_in_registration_order() {
    let container = Container::new();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();
    container.append_to_collection::<dyn Plugin, Tracing>(Lifestyle::Singleton).unwrap();
    container.append_to_collection::<dyn Plugin, Health>(Lifestyle::Transient).unwrap();

    let plugins = container.get_all::<dyn Plugin>().unwrap();
    assert_eq!(names(&plugins), vec!["metrics", "tracing", "health"]);
}

#[test]
fn test_controlled_elements_keep_their_lifestyles() {
    let container = Container::new();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();
    container.append_to_collection::<dyn Plugin, Tracing>(Lifestyle::Singleton).unwrap();

    let first = container.get_all::<dyn Plugin>().unwrap();
    let second = container.get_all::<dyn Plugin>().unwrap();
    assert!(!Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));
}

#[test]
fn test_collection_injected_into_component() {
    let container = Container::new();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();
    container.append_to_collection::<dyn Plugin, Health>(Lifestyle::Transient).unwrap();
    container.register_concrete::<Host>(Lifestyle::Transient).unwrap();

    let host = container.get::<Host>().unwrap();
    assert_eq!(names(&host.plugins), vec!["metrics", "health"]);
}

#[test]
fn test_collection_is_separate_from_single_registration() {
    let container = Container::new();
    container.register::<dyn Plugin, Health>(Lifestyle::Transient).unwrap();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();

    assert_eq!(container.get::<dyn Plugin>().unwrap().name(), "health");
    assert_eq!(names(&container.get_all::<dyn Plugin>().unwrap()), vec!["metrics"]);
}

#[test]
fn test_unregistered_collection_fails() {
    let container = Container::new();
    assert!(matches!(container.get_all::<dyn Plugin>(), Err(DiError::NotRegistered { .. })));

    let container = Container::new();
    container.register_concrete::<Host>(Lifestyle::Transient).unwrap();
    assert!(matches!(container.get::<Host>(), Err(DiError::NotRegistered { .. })));
}

#[test]
fn test_decorators_apply_to_controlled_elements() {
    let container = Container::new();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();
    container.append_to_collection::<dyn Plugin, Health>(Lifestyle::Transient).unwrap();
    container.register_decorator::<dyn Plugin, Traced>(Lifestyle::Transient).unwrap();

    let plugins = container.get_all::<dyn Plugin>().unwrap();
    assert_eq!(names(&plugins), vec!["traced(metrics)", "traced(health)"]);
}

#[test]
fn test_fixed_collection_of_instances() {
    let container = Container::new();
    let elements: Vec<Arc<dyn Plugin>> = vec![Arc::new(Named("a")), Arc::new(Named("b"))];
    container.register_collection(elements.clone()).unwrap();

    let resolved = container.get_all::<dyn Plugin>().unwrap();
    assert_eq!(names(&resolved), vec!["a", "b"]);
    assert!(Arc::ptr_eq(&resolved[0], &elements[0]));
}

#[test]
fn test_uncontrolled_elements_decorated_per_element() {
    let container = Container::new();
    let elements: Vec<Arc<dyn Plugin>> = vec![Arc::new(Named("a")), Arc::new(Named("b"))];
    container.register_collection(elements).unwrap();
    container.register_decorator::<dyn Plugin, Traced>(Lifestyle::Transient).unwrap();

    let first = container.get_all::<dyn Plugin>().unwrap();
    let second = container.get_all::<dyn Plugin>().unwrap();
    assert_eq!(names(&first), vec!["traced(a)", "traced(b)"]);
    assert!(!Arc::ptr_eq(&first[0], &second[0]));
}

#[test]
fn test_singleton_decorator_cached_per_element() {
    let container = Container::new();
    let elements: Vec<Arc<dyn Plugin>> = vec![Arc::new(Named("a")), Arc::new(Named("b"))];
    container.register_collection(elements).unwrap();
    container.register_decorator::<dyn Plugin, Traced>(Lifestyle::Singleton).unwrap();

    let first = container.get_all::<dyn Plugin>().unwrap();
    let second = container.get_all::<dyn Plugin>().unwrap();
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));
    assert!(!Arc::ptr_eq(&first[0], &first[1]));
}

#[test]
fn test_dynamic_source_is_enumerated_per_resolution() {
    let source: Arc<Mutex<Vec<Arc<dyn Plugin>>>> = Arc::new(Mutex::new(vec![Arc::new(Named("a"))]));
    let calls = Arc::new(AtomicUsize::new(0));

    let container = Container::new();
    let (elements, counter) = (source.clone(), calls.clone());
    container
        .register_collection_source::<dyn Plugin, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            elements.lock().clone()
        })
        .unwrap();

    assert_eq!(names(&container.get_all::<dyn Plugin>().unwrap()), vec!["a"]);
    source.lock().push(Arc::new(Named("b")));
    assert_eq!(names(&container.get_all::<dyn Plugin>().unwrap()), vec!["a", "b"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_singleton_decorator_follows_element_identity_in_dynamic_source() {
    let kept: Arc<dyn Plugin> = Arc::new(Named("kept"));
    let source = Arc::new(Mutex::new(vec![kept.clone()]));

    let container = Container::new();
    let elements = source.clone();
    container.register_collection_source::<dyn Plugin, _>(move || elements.lock().clone()).unwrap();
    container.register_decorator::<dyn Plugin, Traced>(Lifestyle::Singleton).unwrap();

    let before = container.get_all::<dyn Plugin>().unwrap();
    source.lock().insert(0, Arc::new(Named("new")));
    let after = container.get_all::<dyn Plugin>().unwrap();

    assert_eq!(names(&after), vec!["traced(new)", "traced(kept)"]);
    assert!(Arc::ptr_eq(&before[0], &after[1]));
}

#[test]
fn test_scoped_decorator_on_uncontrolled_collection_is_rejected() {
    let container = Container::new();
    container.register_collection::<dyn Plugin>(vec![Arc::new(Named("a"))]).unwrap();
    container.register_decorator::<dyn Plugin, Traced>(Lifestyle::Scoped).unwrap();

    assert!(matches!(container.get_all::<dyn Plugin>(), Err(DiError::Decoration { .. })));
}

#[test]
fn test_decoratee_factory_on_uncontrolled_collection_is_rejected() {
    struct Deferred {
        factory: wiregraph::DecorateeFactory<dyn Plugin>,
    }
    impl Plugin for Deferred {
        fn name(&self) -> String {
            self.factory.create().map(|p| p.name()).unwrap_or_default()
        }
    }
    impl Component for Deferred {
        fn constructors() -> Vec<Constructor<Self>> {
            vec![Constructor::new(vec![Parameter::decoratee_factory::<dyn Plugin>("factory")], |args| {
                Ok(Deferred { factory: args.next_factory()? })
            })]
        }
    }
    wiregraph::implements!(Deferred => dyn Plugin);

    let container = Container::new();
    container.register_collection::<dyn Plugin>(vec![Arc::new(Named("a"))]).unwrap();
    container.register_decorator::<dyn Plugin, Deferred>(Lifestyle::Transient).unwrap();

    assert!(matches!(container.get_all::<dyn Plugin>(), Err(DiError::Decoration { .. })));
}

#[test]
fn test_mixing_collection_kinds_is_rejected() {
    let container = Container::new();
    container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient).unwrap();
    let result = container.register_collection::<dyn Plugin>(vec![Arc::new(Named("a"))]);
    assert!(matches!(result, Err(DiError::InvalidRegistration { .. })));

    let container = Container::new();
    container.register_collection::<dyn Plugin>(vec![Arc::new(Named("a"))]).unwrap();
    let result = container.append_to_collection::<dyn Plugin, Metrics>(Lifestyle::Transient);
    assert!(matches!(result, Err(DiError::InvalidRegistration { .. })));
}

#[test]
fn test_duplicate_uncontrolled_collection() {
    let container = Container::new();
    container.register_collection::<dyn Plugin>(vec![Arc::new(Named("a"))]).unwrap();
    let result = container.register_collection::<dyn Plugin>(vec![Arc::new(Named("b"))]);
    assert!(matches!(result, Err(DiError::AlreadyRegistered { .. })));
}
