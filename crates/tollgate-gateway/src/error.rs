//! Error types for gateway setup and handler execution.
//!
//! Per-request failures are not errors in this sense: they are reported as an
//! [`ExecutionOutcome`](crate::types::ExecutionOutcome) with a non-success
//! status. The types here cover registration, schema parsing and the
//! failures a handler reports back to the executor.

use thiserror::Error;

/// Errors raised while building or configuring a gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A capability with this name is already registered.
    #[error("capability already registered: {name}")]
    DuplicateCapability {
        /// The conflicting name.
        name: String,
    },

    /// A resource with this URI is already registered.
    #[error("resource URI already registered: {uri}")]
    DuplicateResourceUri {
        /// The conflicting URI.
        uri: String,
    },

    /// No capability with this name exists.
    #[error("capability not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// The registry was sealed at startup and no longer accepts entries.
    #[error("registry is sealed; capabilities must be registered before the gateway starts")]
    RegistrySealed,

    /// A descriptor is internally inconsistent.
    #[error("invalid descriptor for {name}: {reason}")]
    InvalidDescriptor {
        /// Capability name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A JSON schema document could not be converted into an input schema.
    #[error("invalid input schema: {0}")]
    InvalidSchema(String),

    /// Configuration could not be applied.
    #[error(transparent)]
    Config(#[from] tollgate_config::ConfigError),
}

/// Result type for gateway setup operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure reported by a capability handler.
///
/// The message is recorded in the logs. Callers only ever see a generic
/// `internal_error`, never this text.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler rejected its arguments after validation passed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran but could not produce a result.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// IO failure inside the handler.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Result could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::ExecutionFailed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = GatewayError::DuplicateCapability {
            name: "add".to_owned(),
        };
        assert_eq!(err.to_string(), "capability already registered: add");

        let err = HandlerError::failed("disk full");
        assert_eq!(err.to_string(), "execution failed: disk full");
    }

    #[test]
    fn test_config_error_is_transparent() {
        let inner = tollgate_config::ConfigError::ValidationError {
            field: "cache.capacity".to_owned(),
            message: "must be at least 1".to_owned(),
        };
        let err = GatewayError::from(inner);
        assert!(err.to_string().starts_with("invalid value for cache.capacity"));
    }
}
