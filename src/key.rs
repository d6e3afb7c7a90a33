//! Service identity for the dependency injection container.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Bound shared by everything the container can store and hand out.
///
/// Implemented automatically for every `Send + Sync + 'static` type,
/// including trait objects such as `dyn Logger` whose trait has
/// `Send + Sync` supertraits.
pub trait Service: Send + Sync + 'static {}

impl<T: ?Sized + Send + Sync + 'static> Service for T {}

/// Identity of a service or implementation type.
///
/// Pairs the `TypeId` used for lookups with the type name used in
/// diagnostics. Two `ServiceType`s are equal when their `TypeId`s are equal;
/// trait objects get their own identity, so `dyn Logger` and `ConsoleLogger`
/// are distinct services.
///
/// # Examples
///
/// ```rust
/// use wiregraph::ServiceType;
///
/// trait Logger: Send + Sync {}
///
/// let concrete = ServiceType::of::<String>();
/// let abstraction = ServiceType::of::<dyn Logger>();
///
/// assert_eq!(concrete.name(), "alloc::string::String");
/// assert_ne!(concrete, abstraction);
/// assert_eq!(concrete, ServiceType::of::<String>());
/// ```
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    /// Identity of `T`, which may be unsized.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The `TypeId` used for lookups.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full type name, as reported by `std::any::type_name`.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped, for log lines and messages.
    ///
    /// ```rust
    /// use wiregraph::ServiceType;
    ///
    /// assert_eq!(ServiceType::of::<String>().short_name(), "String");
    /// assert_eq!(ServiceType::of::<Vec<String>>().short_name(), "Vec<String>");
    /// ```
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut segment = String::new();
        for c in self.name.chars() {
            match c {
                ':' => segment.clear(),
                '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' => {
                    out.push_str(&segment);
                    segment.clear();
                    out.push(c);
                }
                _ => segment.push(c),
            }
        }
        out.push_str(&segment);
        out
    }

    /// Whether `T` is this type.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ServiceType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased instance as stored in caches and scopes.
///
/// Always holds an `Arc<S>` for the service or implementation type it was
/// created for, so unsized services survive erasure.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

#[inline]
pub(crate) fn erase<T: ?Sized + Service>(value: Arc<T>) -> AnyArc {
    Arc::new(value)
}

#[inline]
pub(crate) fn unerase<T: ?Sized + Service>(value: &AnyArc) -> Option<Arc<T>> {
    value.downcast_ref::<Arc<T>>().cloned()
}

/// Address of the instance behind an erased value, used as identity.
#[inline]
pub(crate) fn instance_address<T: ?Sized + Service>(value: &AnyArc) -> Option<usize> {
    value
        .downcast_ref::<Arc<T>>()
        .map(|arc| Arc::as_ptr(arc) as *const () as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct English;
    impl Greeter for English {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    #[test]
    fn test_identity_is_type_id() {
        let mut set = HashSet::new();
        set.insert(ServiceType::of::<u32>());
        set.insert(ServiceType::of::<u32>());
        set.insert(ServiceType::of::<dyn Greeter>());
        assert_eq!(set.len(), 2);
        assert!(ServiceType::of::<dyn Greeter>().is::<dyn Greeter>());
    }

    #[test]
    fn test_erase_round_trip_for_trait_objects() {
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        let erased = erase(greeter.clone());
        let back = unerase::<dyn Greeter>(&erased).unwrap();
        assert_eq!(back.greet(), "hello");
        assert!(Arc::ptr_eq(&greeter, &back));
        assert!(unerase::<English>(&erased).is_none());
        assert_eq!(
            instance_address::<dyn Greeter>(&erased),
            Some(Arc::as_ptr(&greeter) as *const () as usize)
        );
    }

    #[test]
    fn test_short_name_strips_paths() {
        assert_eq!(
            ServiceType::of::<std::collections::HashMap<String, u8>>().short_name(),
            "HashMap<String, u8>"
        );
        assert_eq!(ServiceType::of::<dyn Greeter>().short_name(), "dyn Greeter");
    }
}
