//! Compiler configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```json
//! {
//!     "provenance": { "enabled": true, "internal_units": ["my-helpers/src/"] },
//!     "optimize": { "constant_pooling": true, "scratch_slots": false },
//!     "version": 4
//! }
//! ```

use serde::{Deserialize, Serialize};
use strata_bytecode::Version;
use strata_dsl::{InternalUnits, PROVENANCE_ENV, Tracker};

use crate::optimize::OptimizeOptions;

/// An error loading a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not a valid config.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    /// An environment variable has a value that is not a boolean.
    #[error("`{var}` must be a boolean, got `{value}`")]
    Env {
        /// The variable.
        var: &'static str,
        /// Its value.
        value: String,
    },
}

/// Provenance capture settings.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvenanceConfig {
    /// Record construction sites.
    pub enabled: bool,
    /// Source units to treat as library code in addition to the default
    /// set, typically the host's own DSL helpers.
    pub internal_units: Vec<String>,
}

/// All compiler settings.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Provenance capture.
    pub provenance: ProvenanceConfig,
    /// Optimizations.
    pub optimize: OptimizeOptions,
    /// The target version.
    pub version: Version,
}

impl Config {
    /// Parses a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The default config with overrides from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Applies overrides from the environment. Currently only
    /// [`PROVENANCE_ENV`] is read.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = std::env::var_os(PROVENANCE_ENV) {
            let value = value.to_string_lossy();
            self.provenance.enabled = parse_bool(&value).ok_or_else(|| ConfigError::Env {
                var: PROVENANCE_ENV,
                value: value.to_string(),
            })?;
        }
        Ok(self)
    }

    /// The internal units implied by the config.
    pub fn internal_units(&self) -> InternalUnits {
        self.provenance
            .internal_units
            .iter()
            .fold(InternalUnits::default(), |units, unit| units.with(unit.as_str()))
    }

    /// A tracker to build programs with.
    pub fn tracker(&self) -> Tracker {
        if self.provenance.enabled {
            Tracker::enabled(self.internal_units())
        } else {
            Tracker::disabled()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.provenance.enabled);
        assert!(config.optimize.constant_pooling);
        assert!(config.optimize.scratch_slots);
        assert_eq!(config.version, Version::V4);
        assert!(!config.tracker().is_enabled());
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{
                "provenance": { "enabled": true, "internal_units": ["helpers/"] },
                "optimize": { "scratch_slots": false },
                "version": 2
            }"#,
        )
        .unwrap();
        assert!(config.provenance.enabled);
        assert!(config.optimize.constant_pooling);
        assert!(!config.optimize.scratch_slots);
        assert_eq!(config.version, Version::V2);
        let tracker = config.tracker();
        let units = tracker.units().unwrap();
        assert!(units.units().iter().any(|u| u == "helpers/"));
    }

    #[test]
    fn test_rejects_unknown_fields_and_versions() {
        assert!(matches!(
            Config::from_json(r#"{"provenance": {"enable": true}}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(Config::from_json(r#"{"version": 9}"#).is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
