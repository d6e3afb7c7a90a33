//! Container-wide options and, with the `config` feature, settings loaded
//! from JSON.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::behaviors::{
    ConstructorResolutionBehavior, FixedLifestyle, LifestyleSelectionBehavior, NoPropertyInjection,
    PropertySelectionBehavior, SinglePublicConstructorBehavior,
};
use crate::lifestyle::ScopedLifestyle;

/// How much [`Container::verify`](crate::Container::verify) checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum VerificationMode {
    /// Build and construct every registration.
    VerifyOnly,
    /// Also run the lifestyle-mismatch diagnostic.
    #[default]
    VerifyAndDiagnose,
}

/// Options controlling a container.
///
/// Options are fixed once the container is locked; change them before the
/// first resolution with [`Container::configure`](crate::Container::configure).
///
/// # Examples
///
/// ```rust
/// use wiregraph::{Container, ContainerOptions, ScopedLifestyle};
///
/// let options = ContainerOptions {
///     default_scoped_lifestyle: ScopedLifestyle::Flowing,
///     allow_overriding_registrations: true,
///     ..ContainerOptions::default()
/// };
/// let container = Container::with_options(options);
/// assert!(container.options().allow_overriding_registrations);
/// ```
#[derive(Clone)]
pub struct ContainerOptions {
    /// Scoped lifestyle used by `Lifestyle::Scoped` registrations.
    pub default_scoped_lifestyle: ScopedLifestyle,
    /// Let a later registration replace an earlier one for the same service.
    pub allow_overriding_registrations: bool,
    pub verification: VerificationMode,
    pub constructor_resolution: Arc<dyn ConstructorResolutionBehavior>,
    pub property_selection: Arc<dyn PropertySelectionBehavior>,
    pub lifestyle_selection: Arc<dyn LifestyleSelectionBehavior>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            default_scoped_lifestyle: ScopedLifestyle::ThreadScoped,
            allow_overriding_registrations: false,
            verification: VerificationMode::default(),
            constructor_resolution: Arc::new(SinglePublicConstructorBehavior),
            property_selection: Arc::new(NoPropertyInjection),
            lifestyle_selection: Arc::new(FixedLifestyle::default()),
        }
    }
}

impl fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("default_scoped_lifestyle", &self.default_scoped_lifestyle)
            .field("allow_overriding_registrations", &self.allow_overriding_registrations)
            .field("verification", &self.verification)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "config")]
pub use settings::{ContainerSettings, ScopedLifestyleSetting};

#[cfg(feature = "config")]
mod settings {
    use serde::{Deserialize, Serialize};

    use super::{ContainerOptions, VerificationMode};
    use crate::behaviors::{
        ConstructorResolutionBehavior, InjectAllProperties, MostResolvableParametersBehavior, NoPropertyInjection,
        PropertySelectionBehavior, SinglePublicConstructorBehavior,
    };
    use crate::error::{DiError, DiResult};
    use crate::lifestyle::ScopedLifestyle;
    use std::sync::Arc;

    /// Serializable form of [`ScopedLifestyle`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ScopedLifestyleSetting {
        ThreadScoped,
        Flowing,
        AsyncScoped,
    }

    /// Container settings read from configuration.
    ///
    /// Missing fields keep the current option value.
    ///
    /// ```rust
    /// use wiregraph::{ContainerOptions, ContainerSettings, ScopedLifestyle, VerificationMode};
    ///
    /// let settings = ContainerSettings::from_json(r#"{
    ///     "default_scoped_lifestyle": "flowing",
    ///     "verification": "verify_only",
    ///     "most_resolvable_constructor": true
    /// }"#).unwrap();
    ///
    /// let mut options = ContainerOptions::default();
    /// settings.apply(&mut options).unwrap();
    /// assert_eq!(options.default_scoped_lifestyle, ScopedLifestyle::Flowing);
    /// assert_eq!(options.verification, VerificationMode::VerifyOnly);
    /// ```
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct ContainerSettings {
        pub default_scoped_lifestyle: Option<ScopedLifestyleSetting>,
        pub allow_overriding_registrations: Option<bool>,
        pub verification: Option<VerificationMode>,
        /// Select constructors with `MostResolvableParametersBehavior`.
        pub most_resolvable_constructor: Option<bool>,
        /// Inject every declared property.
        pub inject_all_properties: Option<bool>,
    }

    impl ContainerSettings {
        pub fn from_json(json: &str) -> DiResult<Self> {
            serde_json::from_str(json).map_err(|e| DiError::Configuration(e.to_string()))
        }

        pub fn to_json(&self) -> DiResult<String> {
            serde_json::to_string_pretty(self).map_err(|e| DiError::Configuration(e.to_string()))
        }

        /// Apply the settings present onto `options`.
        pub fn apply(&self, options: &mut ContainerOptions) -> DiResult<()> {
            if let Some(scoped) = self.default_scoped_lifestyle {
                options.default_scoped_lifestyle = scoped.resolve()?;
            }
            if let Some(allow) = self.allow_overriding_registrations {
                options.allow_overriding_registrations = allow;
            }
            if let Some(verification) = self.verification {
                options.verification = verification;
            }
            if let Some(most_resolvable) = self.most_resolvable_constructor {
                options.constructor_resolution = if most_resolvable {
                    Arc::new(MostResolvableParametersBehavior) as Arc<dyn ConstructorResolutionBehavior>
                } else {
                    Arc::new(SinglePublicConstructorBehavior)
                };
            }
            if let Some(inject_all) = self.inject_all_properties {
                options.property_selection = if inject_all {
                    Arc::new(InjectAllProperties) as Arc<dyn PropertySelectionBehavior>
                } else {
                    Arc::new(NoPropertyInjection)
                };
            }
            Ok(())
        }
    }

    impl ScopedLifestyleSetting {
        fn resolve(self) -> DiResult<ScopedLifestyle> {
            match self {
                ScopedLifestyleSetting::ThreadScoped => Ok(ScopedLifestyle::ThreadScoped),
                ScopedLifestyleSetting::Flowing => Ok(ScopedLifestyle::Flowing),
                #[cfg(feature = "async")]
                ScopedLifestyleSetting::AsyncScoped => Ok(ScopedLifestyle::AsyncScoped),
                #[cfg(not(feature = "async"))]
                ScopedLifestyleSetting::AsyncScoped => Err(DiError::Configuration(
                    "the async scoped lifestyle requires the 'async' feature".into(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ContainerOptions::default();
        assert_eq!(options.default_scoped_lifestyle, ScopedLifestyle::ThreadScoped);
        assert!(!options.allow_overriding_registrations);
        assert_eq!(options.verification, VerificationMode::VerifyAndDiagnose);
        assert!(format!("{:?}", options).contains("ThreadScoped"));
    }
}
