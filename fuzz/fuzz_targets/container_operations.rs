#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use wiregraph::{
    Component, Constructor, Container, DiError, Lifestyle, Parameter, Resolver, ThreadScopedLifestyle,
};

trait Sender: Send + Sync {
    fn send(&self) -> usize;
}

struct Leaf;
impl Component for Leaf {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![], |_| Ok(Leaf))]
    }
}
impl Sender for Leaf {
    fn send(&self) -> usize {
        0
    }
}
wiregraph::implements!(Leaf => dyn Sender);

struct Middle {
    _leaf: Arc<Leaf>,
}
impl Component for Middle {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::service::<Leaf>("leaf")], |args| {
            Ok(Middle { _leaf: args.next()? })
        })]
    }
}

struct Top {
    _middle: Arc<Middle>,
    _leaf: Arc<Leaf>,
}
impl Component for Top {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(
            vec![Parameter::service::<Middle>("middle"), Parameter::service::<Leaf>("leaf")],
            |args| Ok(Top { _middle: args.next()?, _leaf: args.next()? }),
        )]
    }
}

struct Wrapped(Arc<dyn Sender>);
impl Sender for Wrapped {
    fn send(&self) -> usize {
        self.0.send() + 1
    }
}
impl Component for Wrapped {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(vec![Parameter::decoratee::<dyn Sender>("inner")], |args| {
            Ok(Wrapped(args.next()?))
        })]
    }
}
wiregraph::implements!(Wrapped => dyn Sender);

fn lifestyle(byte: u8) -> Lifestyle {
    match byte % 3 {
        0 => Lifestyle::Transient,
        1 => Lifestyle::Scoped,
        _ => Lifestyle::Singleton,
    }
}

fn resolve(resolver: &impl Resolver, which: u8) -> Result<(), DiError> {
    match which % 5 {
        0 => resolver.get::<Leaf>().map(drop),
        1 => resolver.get::<Middle>().map(drop),
        2 => resolver.get::<Top>().map(drop),
        3 => resolver.get::<dyn Sender>().map(|s| drop(s.send())),
        _ => resolver.get_all::<dyn Sender>().map(drop),
    }
}

fuzz_target!(|data: &[u8]| {
    let container = Container::new();

    for chunk in data.chunks(2) {
        let (op, arg) = (chunk[0], chunk.get(1).copied().unwrap_or(0));

        // Errors are expected outcomes; only panics are findings.
        match op % 10 {
            0 => drop(container.register_concrete::<Leaf>(lifestyle(arg))),
            1 => drop(container.register_concrete::<Middle>(lifestyle(arg))),
            2 => drop(container.register_concrete::<Top>(lifestyle(arg))),
            3 => drop(container.register::<dyn Sender, Leaf>(lifestyle(arg))),
            4 => drop(container.register_decorator::<dyn Sender, Wrapped>(lifestyle(arg))),
            5 => drop(container.append_to_collection::<dyn Sender, Leaf>(lifestyle(arg))),
            6 => drop(resolve(&container, arg)),
            7 => {
                let scope = container.begin_scope();
                if let (Ok(a), Ok(b)) = (scope.get::<Leaf>(), scope.get::<Leaf>()) {
                    if !matches!(container.get_registration::<Leaf>().map(|p| p.lifestyle().name()), Some("Transient")) {
                        assert!(Arc::ptr_eq(&a, &b));
                    }
                }
                drop(resolve(&scope, arg));
                drop(scope.dispose());
            }
            8 => {
                let scope = ThreadScopedLifestyle::begin_scope(&container);
                drop(resolve(&container, arg));
                drop(scope.dispose());
            }
            _ => drop(container.verify()),
        }
    }

    drop(container.dispose());
    assert!(matches!(container.get::<Leaf>(), Err(DiError::ContainerDisposed)));
});
