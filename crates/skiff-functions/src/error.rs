//! Error types for functions and the registry

use std::time::Duration;
use thiserror::Error;

/// Error type for function registration and execution
#[derive(Debug, Error)]
pub enum FuncError {
    /// Function not found in registry
    #[error("function not registered: {0}")]
    NotRegistered(String),

    /// A function with the same name is already registered
    #[error("function already registered: {0}")]
    AlreadyRegistered(String),

    /// Registration attempted with an empty name
    #[error("function name must not be empty")]
    EmptyName,

    /// Required argument absent from the rendered argument map
    #[error("required arg missing: {arg} (function {func})")]
    MissingArgument { func: String, arg: String },

    /// Argument not in the function's supported set
    #[error("unsupported arg: {arg} (function {func})")]
    UnsupportedArgument { func: String, arg: String },

    /// Argument present but of the wrong shape
    #[error("invalid arg '{arg}': {message}")]
    InvalidArgument { arg: String, message: String },

    /// Function execution failed
    #[error("function execution failed: {0}")]
    ExecutionFailed(String),

    /// Function timed out
    #[error("function timed out after {0:?}")]
    Timeout(Duration),

    /// Function observed cancellation
    #[error("function cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for function operations
pub type Result<T> = std::result::Result<T, FuncError>;
