//! Error types for the orchestration engine

use skiff_crd::CrdError;
use skiff_functions::FuncError;
use std::time::Duration;
use thiserror::Error;

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// ActionSet not found
    #[error("actionset not found: {0}")]
    NotFound(String),

    /// Blueprint not found
    #[error("blueprint not found: {0}")]
    BlueprintNotFound(String),

    /// Blueprint has no action with this name
    #[error("action not found: {action} (blueprint {blueprint})")]
    ActionNotFound { blueprint: String, action: String },

    /// Referenced object, ConfigMap or Secret does not exist
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Blueprint action declares an input the ActionSpec does not supply
    #[error("missing input: {kind} {name}")]
    MissingInput { kind: &'static str, name: String },

    /// Write lost a compare-and-swap race
    #[error("conflict writing {0}")]
    Conflict(String),

    /// An object with this name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Structural or state invariant broken
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Template rendering failed
    #[error("render error: {0}")]
    Render(String),

    /// Function lookup, argument check or execution failed
    #[error("phase '{phase}' failed: {source}")]
    Function {
        phase: String,
        #[source]
        source: FuncError,
    },

    /// Resource type error
    #[error(transparent)]
    Crd(#[from] CrdError),

    /// Cluster API error
    #[error("cluster API error: {0}")]
    Kube(String),

    /// Store backend error
    #[error("store error: {0}")]
    Store(String),

    /// Operation timed out
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid controller configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The governing token was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Attach a phase name to a function error
    pub fn function(phase: impl Into<String>, source: FuncError) -> Self {
        EngineError::Function {
            phase: phase.into(),
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<FuncError> for EngineError {
    fn from(err: FuncError) -> Self {
        EngineError::Function {
            phase: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<minijinja::Error> for EngineError {
    fn from(err: minijinja::Error) -> Self {
        EngineError::Render(err.to_string())
    }
}

impl From<kube::Error> for EngineError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => EngineError::Conflict(resp.message.clone()),
            _ => EngineError::Kube(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::BlueprintNotFound("mysql-bp".to_string());
        assert_eq!(err.to_string(), "blueprint not found: mysql-bp");

        let err = EngineError::ActionNotFound {
            blueprint: "mysql-bp".to_string(),
            action: "restore".to_string(),
        };
        assert_eq!(err.to_string(), "action not found: restore (blueprint mysql-bp)");

        let err = EngineError::function("dump", FuncError::ExecutionFailed("exit 1".to_string()));
        assert_eq!(
            err.to_string(),
            "phase 'dump' failed: function execution failed: exit 1"
        );

        let err = EngineError::MissingInput {
            kind: "secret",
            name: "creds".to_string(),
        };
        assert_eq!(err.to_string(), "missing input: secret creds");
    }

    #[test]
    fn test_error_predicates() {
        assert!(EngineError::Conflict("as".to_string()).is_conflict());
        assert!(!EngineError::Cancelled.is_conflict());
        assert!(EngineError::NotFound("as".to_string()).is_not_found());
    }

    #[test]
    fn test_from_func_error() {
        let err: EngineError = FuncError::NotRegistered("Upload".to_string()).into();
        assert!(err.to_string().contains("function not registered: Upload"));
    }
}
