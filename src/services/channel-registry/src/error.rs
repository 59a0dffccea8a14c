//! Error handling for the channel registry
//!
//! Every failure the registry can surface maps onto one variant of
//! [`RegistryError`]. Validation and rate-limit errors are always returned to the
//! caller verbatim; aggregation and dispatch failures are normally logged and
//! swallowed by the component that observed them.

use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Main error type for the channel registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed or oversized input, rejected before any store mutation
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Admission denied for the calling identity
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Backing channel store failure
    #[error("Store error: {message}")]
    Store { message: String },

    /// Cache backend failure (never surfaced from read paths)
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Terminal batch-write failure after retries
    #[error("Ingestion failed after {committed} channels were committed: {message}")]
    Ingestion { committed: usize, message: String },

    /// One or more per-tag fetches failed during aggregation
    #[error("Partial aggregation failure for tags: {}", .tags.join(", "))]
    PartialAggregation { tags: Vec<String> },

    /// Notification delivery failure
    #[error("Dispatch error: {target}: {message}")]
    Dispatch { target: String, message: String },

    /// Upstream provider probe failure
    #[error("Probe error: {message}")]
    Probe { message: String },

    /// Missing resource
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Get the error code for logs and command replies
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::Validation { .. } => "VALIDATION_ERROR",
            RegistryError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            RegistryError::Store { .. } => "STORE_ERROR",
            RegistryError::Cache { .. } => "CACHE_ERROR",
            RegistryError::Ingestion { .. } => "INGESTION_ERROR",
            RegistryError::PartialAggregation { .. } => "PARTIAL_AGGREGATION",
            RegistryError::Dispatch { .. } => "DISPATCH_ERROR",
            RegistryError::Probe { .. } => "PROBE_ERROR",
            RegistryError::NotFound { .. } => "NOT_FOUND",
            RegistryError::Config { .. } => "CONFIG_ERROR",
            RegistryError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Store { .. }
                | RegistryError::Cache { .. }
                | RegistryError::Dispatch { .. }
                | RegistryError::Probe { .. }
        )
    }

    /// Errors caused by the caller rather than by infrastructure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistryError::Validation { .. }
                | RegistryError::RateLimitExceeded { .. }
                | RegistryError::NotFound { .. }
        )
    }
}

// Conversion implementations for external error types

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RegistryError::NotFound {
                resource: "channel".to_string(),
            },
            other => RegistryError::Store {
                message: other.to_string(),
            },
        }
    }
}

impl From<redis::RedisError> for RegistryError {
    fn from(err: redis::RedisError) -> Self {
        RegistryError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<deadpool_redis::PoolError> for RegistryError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        RegistryError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for RegistryError {
    fn from(err: config::ConfigError) -> Self {
        RegistryError::Config {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for RegistryError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = err.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        let field = fields
            .first()
            .map(|(field, _)| field.to_string())
            .unwrap_or_else(|| "multiple".to_string());

        let message = fields
            .iter()
            .map(|(field, errors)| {
                let field_errors: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, field_errors.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        RegistryError::Validation { field, message }
    }
}

// Utility functions for creating specific error types

impl RegistryError {
    /// Create a validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch<S1: Into<String>, S2: Into<String>>(target: S1, message: S2) -> Self {
        Self::Dispatch {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a probe error
    pub fn probe<S: Into<String>>(message: S) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RegistryError::validation("name", "required").error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            RegistryError::rate_limited("slow down").error_code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(RegistryError::store("down").error_code(), "STORE_ERROR");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RegistryError::store("connection reset").is_retryable());
        assert!(RegistryError::dispatch("hook", "502").is_retryable());
        assert!(!RegistryError::validation("key", "too long").is_retryable());
        assert!(!RegistryError::rate_limited("slow down").is_retryable());
    }

    #[test]
    fn test_client_errors() {
        assert!(RegistryError::validation("key", "too long").is_client_error());
        assert!(RegistryError::not_found("channel 7").is_client_error());
        assert!(!RegistryError::store("down").is_client_error());
    }

    #[test]
    fn test_error_display() {
        let error = RegistryError::Ingestion {
            committed: 100,
            message: "failed after 3 attempts".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Ingestion failed after 100 channels were committed: failed after 3 attempts"
        );

        let error = RegistryError::PartialAggregation {
            tags: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(error.to_string(), "Partial aggregation failure for tags: a, b");
    }

    #[test]
    fn test_from_row_not_found() {
        let error: RegistryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_from_validation_errors() {
        #[derive(Validate)]
        struct Form {
            #[validate(length(min = 1, message = "name is required"))]
            name: String,
        }

        let errors = Form {
            name: String::new(),
        }
        .validate()
        .unwrap_err();

        match RegistryError::from(errors) {
            RegistryError::Validation { field, message } => {
                assert_eq!(field, "name");
                assert_eq!(message, "name: name is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
