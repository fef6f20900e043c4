//! Error types for ormguard

use thiserror::Error;

/// Result type alias for ormguard operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types raised while intercepting data-client calls
#[derive(Debug, Error)]
pub enum OrmError {
    /// Metadata or behavior descriptor is inconsistent (missing relation field,
    /// unresolved foreign-key mapping, missing behavior configuration).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The call itself is invalid for the current context.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A payload references a model or field unknown to the metadata.
    #[error("Schema mismatch on '{model}.{field}': {message}")]
    SchemaMismatch {
        model: String,
        field: String,
        message: String,
    },

    /// Lookup of a required item failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The access policy rejected the operation.
    #[error("Rejected by policy: {operation} on '{model}': {reason}")]
    RejectedByPolicy {
        model: String,
        operation: String,
        reason: String,
    },

    /// Encryption or hashing failure.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Error reported by the wrapped data client
    #[error("Client error: {0}")]
    Client(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a schema mismatch error for a model field
    pub fn schema_mismatch(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a policy rejection
    pub fn rejected(
        model: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::RejectedByPolicy {
            model: model.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// Create an error originating from the wrapped client
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a schema mismatch error
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if the access policy rejected the operation
    pub fn is_rejected_by_policy(&self) -> bool {
        matches!(self, Self::RejectedByPolicy { .. })
    }
}
