//! # Database Configuration
//!
//! Loaded once at startup, usually from a TOML table:
//!
//! ```toml
//! policy = "lenient"
//! max_submission_iterations = 5
//! initial_group_capacity = 256
//! reference_preallocation = 4096
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, EcsResult};

/// How a flush reports rejected structural commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuralPolicy {
    /// `submit_entities` fails with [`EcsError::Submission`].
    Strict,
    /// Each rejection is logged with `warn!` and the flush succeeds.
    Lenient,
}

impl Default for StructuralPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

/// Entity database settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Strictness of flush error reporting.
    pub policy: StructuralPolicy,
    /// Flush passes allowed per `submit_entities` call. Observers that queue
    /// more work push the flush into extra passes.
    pub max_submission_iterations: usize,
    /// Slots reserved by every newly created component storage.
    pub initial_group_capacity: usize,
    /// Reference slots reserved at startup.
    pub reference_preallocation: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            policy: StructuralPolicy::default(),
            max_submission_iterations: 5,
            initial_group_capacity: 0,
            reference_preallocation: 0,
        }
    }
}

impl DatabaseConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] on malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> EcsResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| EcsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] if `max_submission_iterations` is 0.
    pub fn validate(&self) -> EcsResult<()> {
        if self.max_submission_iterations == 0 {
            return Err(EcsError::InvalidConfig(
                "max_submission_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Returns the config with `policy` replaced.
    #[must_use]
    pub fn with_policy(mut self, policy: StructuralPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DatabaseConfig::from_toml_str("policy = \"lenient\"\ninitial_group_capacity = 64").unwrap();
        assert_eq!(config.policy, StructuralPolicy::Lenient);
        assert_eq!(config.initial_group_capacity, 64);
        assert_eq!(config.max_submission_iterations, 5);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = DatabaseConfig::from_toml_str("max_submission_iterations = 0").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            DatabaseConfig::from_toml_str("polcy = \"strict\""),
            Err(EcsError::InvalidConfig(_))
        ));
    }
}
