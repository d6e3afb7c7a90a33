//! Pluggable strategies for constructor selection, property injection and
//! default lifestyles.

use crate::component::Parameter;
use crate::key::ServiceType;
use crate::lifestyle::Lifestyle;

/// One constructor of the implementation being built, as seen by a
/// [`ConstructorResolutionBehavior`].
#[derive(Clone, Copy, Debug)]
pub struct ConstructorCandidate<'a> {
    /// Position of the constructor in [`Component::constructors`](crate::Component::constructors).
    pub index: usize,
    pub parameters: &'a [Parameter],
    pub is_public: bool,
}

/// Picks the constructor the container calls.
///
/// `can_resolve` reports whether the container could supply a parameter.
/// Returning `Err(reason)` fails the registration with
/// [`DiError::NoSuitableConstructor`](crate::DiError::NoSuitableConstructor).
pub trait ConstructorResolutionBehavior: Send + Sync {
    fn select_constructor(
        &self,
        implementation: ServiceType,
        candidates: &[ConstructorCandidate<'_>],
        can_resolve: &dyn Fn(&Parameter) -> bool,
    ) -> Result<usize, String>;
}

/// Default behavior: the implementation must have exactly one public
/// constructor.
#[derive(Clone, Copy, Debug, Default)]
pub struct SinglePublicConstructorBehavior;

impl ConstructorResolutionBehavior for SinglePublicConstructorBehavior {
    fn select_constructor(
        &self,
        _implementation: ServiceType,
        candidates: &[ConstructorCandidate<'_>],
        _can_resolve: &dyn Fn(&Parameter) -> bool,
    ) -> Result<usize, String> {
        let public: Vec<&ConstructorCandidate<'_>> = candidates.iter().filter(|c| c.is_public).collect();
        match public.as_slice() {
            [only] => Ok(only.index),
            [] => Err("it should have exactly one public constructor, but it has none".into()),
            many => Err(format!(
                "it should have exactly one public constructor, but it has {}",
                many.len()
            )),
        }
    }
}

/// Picks the public constructor with the most parameters that can all be
/// resolved. Two such constructors with the same parameter count is an error.
///
/// ```rust
/// use std::sync::Arc;
/// use wiregraph::{
///     Component, Constructor, Container, ContainerOptions, Lifestyle,
///     MostResolvableParametersBehavior, Parameter, Resolver,
/// };
///
/// struct Clock;
/// struct Mailer;
///
/// struct Scheduler {
///     mailer: Option<Arc<Mailer>>,
/// }
///
/// impl Component for Scheduler {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![
///             Constructor::new(vec![Parameter::service::<Clock>("clock")], |args| {
///                 args.next::<Clock>()?;
///                 Ok(Scheduler { mailer: None })
///             }),
///             Constructor::new(
///                 vec![Parameter::service::<Clock>("clock"), Parameter::service::<Mailer>("mailer")],
///                 |args| {
///                     args.next::<Clock>()?;
///                     Ok(Scheduler { mailer: Some(args.next()?) })
///                 },
///             ),
///         ]
///     }
/// }
///
/// let mut options = ContainerOptions::default();
/// options.constructor_resolution = Arc::new(MostResolvableParametersBehavior);
/// let container = Container::with_options(options);
/// container.register_instance(Arc::new(Clock)).unwrap();
/// container.register_concrete::<Scheduler>(Lifestyle::Transient).unwrap();
///
/// // Mailer is not registered, so the one-parameter constructor is used.
/// assert!(container.get::<Scheduler>().unwrap().mailer.is_none());
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct MostResolvableParametersBehavior;

impl ConstructorResolutionBehavior for MostResolvableParametersBehavior {
    fn select_constructor(
        &self,
        _implementation: ServiceType,
        candidates: &[ConstructorCandidate<'_>],
        can_resolve: &dyn Fn(&Parameter) -> bool,
    ) -> Result<usize, String> {
        let mut resolvable: Vec<&ConstructorCandidate<'_>> = candidates
            .iter()
            .filter(|c| c.is_public && c.parameters.iter().all(can_resolve))
            .collect();
        resolvable.sort_by(|a, b| b.parameters.len().cmp(&a.parameters.len()));

        match resolvable.as_slice() {
            [] => Err("none of its public constructors has parameters that can all be resolved".into()),
            [first, second, ..] if first.parameters.len() == second.parameters.len() => Err(format!(
                "it has multiple resolvable public constructors with {} parameters",
                first.parameters.len()
            )),
            [first, ..] => Ok(first.index),
        }
    }
}

/// Decides which properties of a component are injected.
pub trait PropertySelectionBehavior: Send + Sync {
    fn select_property(&self, implementation: ServiceType, property: &Parameter) -> bool;
}

/// Default behavior: no property injection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPropertyInjection;

impl PropertySelectionBehavior for NoPropertyInjection {
    fn select_property(&self, _implementation: ServiceType, _property: &Parameter) -> bool {
        false
    }
}

/// Inject every property a component declares.
#[derive(Clone, Copy, Debug, Default)]
pub struct InjectAllProperties;

impl PropertySelectionBehavior for InjectAllProperties {
    fn select_property(&self, _implementation: ServiceType, _property: &Parameter) -> bool {
        true
    }
}

impl<F> PropertySelectionBehavior for F
where
    F: Fn(ServiceType, &Parameter) -> bool + Send + Sync,
{
    fn select_property(&self, implementation: ServiceType, property: &Parameter) -> bool {
        self(implementation, property)
    }
}

/// Lifestyle used by registrations that do not name one
/// ([`Container::register_default`](crate::Container::register_default)).
pub trait LifestyleSelectionBehavior: Send + Sync {
    fn select_lifestyle(&self, implementation: ServiceType) -> Lifestyle;
}

/// Always select the same lifestyle. The default is `Transient`.
#[derive(Clone, Debug)]
pub struct FixedLifestyle(pub Lifestyle);

impl Default for FixedLifestyle {
    fn default() -> Self {
        FixedLifestyle(Lifestyle::Transient)
    }
}

impl LifestyleSelectionBehavior for FixedLifestyle {
    fn select_lifestyle(&self, _implementation: ServiceType) -> Lifestyle {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;
    struct Mailer;
    struct Subject;

    fn candidates<'a>(signatures: &'a [(Vec<Parameter>, bool)]) -> Vec<ConstructorCandidate<'a>> {
        signatures
            .iter()
            .enumerate()
            .map(|(index, (parameters, is_public))| ConstructorCandidate { index, parameters, is_public: *is_public })
            .collect()
    }

    #[test]
    fn test_single_public_constructor() {
        let signatures = vec![
            (vec![Parameter::service::<Clock>("clock")], false),
            (vec![], true),
        ];
        let behavior = SinglePublicConstructorBehavior;
        let selected = behavior.select_constructor(ServiceType::of::<Subject>(), &candidates(&signatures), &|_| true);
        assert_eq!(selected, Ok(1));

        let signatures = vec![(vec![], true), (vec![Parameter::service::<Clock>("clock")], true)];
        assert!(behavior
            .select_constructor(ServiceType::of::<Subject>(), &candidates(&signatures), &|_| true)
            .is_err());
    }

    #[test]
    fn test_most_resolvable_parameters() {
        let signatures = vec![
            (vec![Parameter::service::<Clock>("clock")], true),
            (vec![Parameter::service::<Clock>("clock"), Parameter::service::<Mailer>("mailer")], true),
        ];
        let behavior = MostResolvableParametersBehavior;
        let only_clock = |p: &Parameter| p.parameter_type() == ServiceType::of::<Clock>();

        assert_eq!(
            behavior.select_constructor(ServiceType::of::<Subject>(), &candidates(&signatures), &only_clock),
            Ok(0)
        );
        assert_eq!(
            behavior.select_constructor(ServiceType::of::<Subject>(), &candidates(&signatures), &|_| true),
            Ok(1)
        );
    }

    #[test]
    fn test_most_resolvable_parameters_rejects_ties() {
        let signatures = vec![
            (vec![Parameter::service::<Clock>("clock")], true),
            (vec![Parameter::service::<Mailer>("mailer")], true),
        ];
        let result = MostResolvableParametersBehavior.select_constructor(
            ServiceType::of::<Subject>(),
            &candidates(&signatures),
            &|_| true,
        );
        assert!(result.unwrap_err().contains("multiple"));
    }

    #[test]
    fn test_property_selection() {
        let property = Parameter::service::<Clock>("clock");
        assert!(!NoPropertyInjection.select_property(ServiceType::of::<Subject>(), &property));
        assert!(InjectAllProperties.select_property(ServiceType::of::<Subject>(), &property));

        let by_name = |_: ServiceType, p: &Parameter| p.name().starts_with("cl");
        assert!(by_name.select_property(ServiceType::of::<Subject>(), &property));
    }
}
