//! Error types for the insights-core library.
//!
//! Each module boundary has its own error enum so callers can branch on
//! structured fields instead of matching strings. The library uses
//! `thiserror` throughout.

/// Errors related to configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },
}

/// Errors surfaced by the admission controller.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The request body failed structural or semantic validation.
    #[error("validation failed: {message}")]
    Malformed {
        /// Details about what failed validation.
        message: String,
    },

    /// A bulk request had a size outside the accepted range.
    #[error("batch size {size} outside accepted range {min}..={max}")]
    BatchSizeOutOfRange {
        /// The submitted batch size.
        size: usize,
        /// Minimum accepted size.
        min: usize,
        /// Maximum accepted size.
        max: usize,
    },
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database is unreachable. Surfaced to admission clients as 503.
    #[error("store unavailable: {source}")]
    Unavailable {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed for a reason other than unreachability.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

/// Errors from interacting with the LLM provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP transport failure talking to the LLM endpoint.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned a non-success status that is not retriable
    /// (any 4xx other than 408/429).
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// A transient failure: network error, 408, 429, or 5xx. The client
    /// retries these with backoff before giving up.
    #[error("LLM transient error (status {status:?}): {message}")]
    Transient {
        /// The HTTP status code, if one was received.
        status: Option<u16>,
        /// A human-readable description.
        message: String,
        /// Seconds to wait before retrying, from a `Retry-After` header.
        retry_after_secs: Option<u64>,
    },

    /// The response body could not be parsed as the expected JSON shape.
    #[error("failed to parse LLM response: {0}")]
    Protocol(String),
}

impl LlmError {
    /// Non-retriable 4xx (other than 408/429) and protocol errors are not
    /// retried by the analyzer; everything else is.
    pub fn is_non_retriable(&self) -> bool {
        matches!(self, LlmError::Api { .. } | LlmError::Protocol(_))
    }

    /// A short class tag used to build `skipped_reason = "llm_error:<class>"`.
    pub fn class_tag(&self) -> &'static str {
        match self {
            LlmError::Request(_) => "network",
            LlmError::Api { .. } => "api",
            LlmError::Transient { .. } => "transient",
            LlmError::Protocol(_) => "protocol",
        }
    }
}

/// Errors from the in-process work queue.
#[derive(Debug, thiserror::Error, Clone, Copy)]
pub enum QueueError {
    /// The queue has been closed and no longer accepts new items.
    #[error("queue is closed")]
    Closed,

    /// The queue is at `capacity` and `offer` does not block (spec C2/C3
    /// backpressure).
    #[error("queue is full (capacity {capacity})")]
    Full {
        /// The queue's configured maximum depth.
        capacity: usize,
    },
}

/// Errors surfaced by the admission controller (C3), wrapping the
/// underlying failure so `insights-server` can map it to an HTTP status
/// without knowing which module produced it.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The submitted payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store could not commit the batch.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by the circuit breaker.
#[derive(Debug, thiserror::Error, Clone, Copy)]
pub enum CircuitError {
    /// The breaker is open, or half-open with a trial already in flight;
    /// the caller must not invoke the guarded operation.
    #[error("circuit breaker is open")]
    Open,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_field_message() {
        let err = ConfigError::MissingField {
            field: "database_url".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing required config field: database_url"
        );
    }

    #[test]
    fn validation_error_batch_size_message() {
        let err = ValidationError::BatchSizeOutOfRange {
            size: 501,
            min: 1,
            max: 500,
        };
        assert_eq!(
            err.to_string(),
            "batch size 501 outside accepted range 1..=500"
        );
    }

    #[test]
    fn llm_error_non_retriable_classification() {
        let api_err = LlmError::Api {
            status: 400,
            message: "bad request".into(),
        };
        assert!(api_err.is_non_retriable());
        assert_eq!(api_err.class_tag(), "api");

        let transient = LlmError::Transient {
            status: Some(503),
            message: "unavailable".into(),
            retry_after_secs: None,
        };
        assert!(!transient.is_non_retriable());
        assert_eq!(transient.class_tag(), "transient");
    }

    #[test]
    fn queue_error_message() {
        assert_eq!(QueueError::Closed.to_string(), "queue is closed");
        assert_eq!(
            QueueError::Full { capacity: 10 }.to_string(),
            "queue is full (capacity 10)"
        );
    }

    #[test]
    fn circuit_error_message() {
        assert_eq!(CircuitError::Open.to_string(), "circuit breaker is open");
    }
}
