//! Error types for definition, observation, and commit operations.

use thiserror::Error;

/// Result type for define operations.
pub type DefineResult<T> = Result<T, DefineError>;

/// Errors that can occur in define operations.
#[derive(Debug, Error)]
pub enum DefineError {
    /// A name was registered twice outside hot-reload mode.
    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    /// A schema or class was registered after the load phase outside hot-reload mode.
    #[error("Definition registered after load phase: {0}")]
    RuntimeRedefinition(String),

    /// A schema description has the wrong shape.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A nested field id does not start with its owner's name.
    #[error("Invalid field path {path}: must begin with \"{owner}.\"")]
    InvalidFieldPath {
        /// Name of the owning definition.
        owner: String,
        /// The offending field id.
        path: String,
    },

    /// Mismatches between registrations and the loaded identity table.
    #[error("{}", .0.join("\n"))]
    Consistency(Vec<String>),

    /// A listener was detached more times than it was attached.
    #[error("Listener {listener} is not attached to object {object}")]
    UnknownListener {
        /// Identity of the object, or `unassigned`.
        object: String,
        /// The listener's id.
        listener: u64,
    },

    /// A value without an identity was encoded as a reference.
    #[error("Reference to unobserved value: {0}")]
    UnknownReference(String),

    /// A field name is not declared by the schema.
    #[error("Unknown field {field} on {schema}")]
    UnknownField {
        /// Schema name.
        schema: String,
        /// Requested field.
        field: String,
    },

    /// A value cannot be stored in a field.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name or list index.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// No definition is registered under the name.
    #[error("Unknown definition: {0}")]
    UnknownDefinition(String),

    /// A definition was mutated after the registry froze it.
    #[error("Definition is frozen: {0}")]
    FrozenDefinition(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_message_is_newline_joined() {
        let err = DefineError::Consistency(vec![
            "x: defined but not imported".to_string(),
            "z: imported but not defined".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "x: defined but not imported\nz: imported but not defined"
        );
    }

    #[test]
    fn test_field_path_message() {
        let err = DefineError::InvalidFieldPath {
            owner: "app.Point".to_string(),
            path: "other.x".to_string(),
        };
        assert!(err.to_string().contains("\"app.Point.\""));
    }
}
