//! Error types for resource validation

use thiserror::Error;

/// Errors raised while checking or converting resources
#[derive(Debug, Error)]
pub enum CrdError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("Invalid value for field '{field}': {message}")]
    InvalidFieldValue { field: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, CrdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CrdError::MissingField("metadata.name".to_string());
        assert_eq!(err.to_string(), "Missing required field: metadata.name");

        let err = CrdError::InvalidFieldValue {
            field: "actions.backup.phases[1]".to_string(),
            message: "duplicate phase name 'copy'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for field 'actions.backup.phases[1]': duplicate phase name 'copy'"
        );
    }
}
