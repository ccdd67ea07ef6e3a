//! Error types for the Adaptive Decision Engine

use thiserror::Error;

/// Main error type for engine operations
///
/// Duplicate submissions are not errors; they are reported as a distinct
/// processing outcome by the engine.
#[derive(Error, Debug)]
pub enum AdeError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown student: {0}")]
    UnknownStudent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdeError {
    /// Build a persistence error with the failing operation as context
    pub fn persistence(operation: &str, err: impl std::fmt::Display) -> Self {
        AdeError::Persistence(format!("{operation}: {err}"))
    }

    /// Whether the caller should surface this error as a hard failure.
    ///
    /// Every variant is fatal to the current answer except invalid input,
    /// which the engine sanitizes before it reaches the decision math.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AdeError::InvalidInput(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AdeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_helper_formats_context() {
        let err = AdeError::persistence("save q-value", "connection reset");
        assert_eq!(
            err.to_string(),
            "Persistence error: save q-value: connection reset"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(AdeError::UnknownTopic("t1".into()).is_fatal());
        assert!(AdeError::Persistence("down".into()).is_fatal());
        assert!(!AdeError::InvalidInput("nan".into()).is_fatal());
    }
}
