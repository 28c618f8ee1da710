use std::fmt;
use thiserror::Error;

/// Constraint violation reported by a backend while writing records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// Another record already holds the same value(s)
    Unique {
        collection: String,
        fields: Vec<String>,
    },
    /// A reference points to a record that does not exist
    ForeignKey { collection: String, field: String },
    /// A required field was left empty
    NotNull { collection: String, field: String },
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintViolation::Unique { collection, fields } => {
                write!(f, "unique({}: {})", collection, fields.join(", "))
            }
            ConstraintViolation::ForeignKey { collection, field } => {
                write!(f, "foreign-key({}.{})", collection, field)
            }
            ConstraintViolation::NotNull { collection, field } => {
                write!(f, "not-null({}.{})", collection, field)
            }
        }
    }
}

impl ConstraintViolation {
    /// Backend-agnostic explanation suitable for end users
    pub fn describe(&self) -> String {
        match self {
            ConstraintViolation::Unique { fields, .. } if fields.len() == 1 => format!(
                "A record with the same value for '{}' already exists",
                fields[0]
            ),
            ConstraintViolation::Unique { fields, .. } => format!(
                "A record with the same values for '{}' already exists",
                fields.join("', '")
            ),
            ConstraintViolation::ForeignKey { field, .. } => {
                format!("The value of '{}' does not reference an existing record", field)
            }
            ConstraintViolation::NotNull { field, .. } => {
                format!("The field '{}' is required", field)
            }
        }
    }
}

/// Unified error type for all collection operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Malformed filter, projection, patch or schema declaration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authorization-level rejection
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Collection, segment, action or relation not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation raised by the backing store
    #[error("Constraint violation: {0}")]
    Constraint(ConstraintViolation),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    /// Generic backend error
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a validation error with custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        DataError::Validation(msg.into())
    }

    /// Create a "not found" error with custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        DataError::NotFound(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        DataError::Forbidden(msg.into())
    }

    /// Create an operation not supported error
    pub fn operation_not_supported(msg: impl Into<String>) -> Self {
        DataError::OperationNotSupported(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        DataError::Internal(msg.into())
    }

    /// Turn backend constraint violations into validation errors.
    /// Every other error is returned unchanged.
    pub fn translate_constraint(self) -> Self {
        match self {
            DataError::Constraint(violation) => DataError::Validation(violation.describe()),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DataError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound(_))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(error: serde_json::Error) -> Self {
        DataError::SerializationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
