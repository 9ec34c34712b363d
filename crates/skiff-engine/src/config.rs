//! Controller configuration
//!
//! Loaded from an optional YAML file; the binary then applies CLI flag and
//! environment overrides on top.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Namespace to watch
    pub namespace: String,

    /// Progress polling period in seconds
    pub progress_interval_secs: u64,

    /// Upper bound on re-resolving an ActionSet before its units start
    pub launch_timeout_secs: u64,

    /// Deadline for a whole run; `None` lets runs go on indefinitely
    pub action_set_timeout_secs: Option<u64>,

    /// Progress weight by function name
    pub func_weights: BTreeMap<String, f64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: skiff_crd::DEFAULT_NAMESPACE.to_string(),
            progress_interval_secs: 5,
            launch_timeout_secs: 30,
            action_set_timeout_secs: None,
            func_weights: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML document
    pub fn from_yaml(source: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn with_progress_interval(mut self, secs: u64) -> Self {
        self.progress_interval_secs = secs;
        self
    }

    pub fn with_action_set_timeout(mut self, secs: u64) -> Self {
        self.action_set_timeout_secs = Some(secs);
        self
    }

    pub fn with_func_weight(mut self, func: impl Into<String>, weight: f64) -> Self {
        self.func_weights.insert(func.into(), weight);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.progress_interval_secs == 0 {
            return Err(EngineError::InvalidConfiguration(
                "progressIntervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.launch_timeout_secs == 0 {
            return Err(EngineError::InvalidConfiguration(
                "launchTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        if self.action_set_timeout_secs == Some(0) {
            return Err(EngineError::InvalidConfiguration(
                "actionSetTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        for (func, weight) in &self.func_weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(EngineError::InvalidConfiguration(format!(
                    "weight for '{}' must be finite and positive, got {}",
                    func, weight
                )));
            }
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn action_set_timeout(&self) -> Option<Duration> {
        self.action_set_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.progress_interval(), Duration::from_secs(5));
        assert_eq!(config.launch_timeout(), Duration::from_secs(30));
        assert_eq!(config.action_set_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let config = ControllerConfig::from_yaml(
            r#"
namespace: backups
progressIntervalSecs: 2
actionSetTimeoutSecs: 3600
funcWeights:
  BackupData: 2.0
"#,
        )
        .unwrap();

        assert_eq!(config.namespace, "backups");
        assert_eq!(config.progress_interval_secs, 2);
        assert_eq!(config.launch_timeout_secs, 30);
        assert_eq!(config.action_set_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.func_weights.get("BackupData"), Some(&2.0));
    }

    #[test]
    fn test_from_yaml_rejects_zero_interval() {
        let err = ControllerConfig::from_yaml("progressIntervalSecs: 0").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validate_weights() {
        let config = ControllerConfig::new("apps").with_func_weight("Copy", -1.0);
        assert!(config.validate().is_err());

        let config = ControllerConfig::new("apps").with_func_weight("Copy", 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_yaml() {
        let err = ControllerConfig::from_yaml("namespace: [unclosed").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }
}
