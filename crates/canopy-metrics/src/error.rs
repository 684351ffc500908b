//! Error types for metrics collection

use thiserror::Error;

/// Errors raised while querying the metrics backend
#[derive(Debug, Error)]
pub enum Error {
    /// Every attempt to reach the backend failed with a connection error,
    /// a timeout, a 5xx or a 429. Aborts the measurement.
    #[error("metrics backend unreachable after {attempts} attempts: {message}")]
    Unreachable {
        /// Attempts made
        attempts: u32,
        /// Last failure
        message: String,
    },

    /// The backend answered but did not report success, or rejected the
    /// request with a 4xx
    #[error("query rejected ({status}): {message}")]
    QueryFailed {
        /// `status` field of the response
        status: String,
        /// Error text returned by the backend
        message: String,
    },

    /// The response could not be interpreted
    #[error("malformed metrics response: {message}")]
    Malformed {
        /// What was wrong
        message: String,
    },

    /// A query could not be built from the given parameters
    #[error("invalid query parameter {field}: {message}")]
    InvalidQuery {
        /// Offending parameter
        field: String,
        /// What was wrong with it
        message: String,
    },
}

impl Error {
    /// Create a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Create an invalid-query error
    pub fn invalid_query(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidQuery {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Whether the failure must abort the measurement instead of reading as 0
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unreachable { .. })
    }
}

impl From<Error> for canopy_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Unreachable { .. } => canopy_common::Error::transport(err.to_string()),
            Error::InvalidQuery { field, message } => {
                canopy_common::Error::config_for_field(field, message)
            }
            other => canopy_common::Error::serialization_for_kind("metrics", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_is_fatal() {
        assert!(Error::Unreachable {
            attempts: 6,
            message: "connection refused".into()
        }
        .is_fatal());
        assert!(!Error::malformed("no data").is_fatal());
        assert!(!Error::QueryFailed {
            status: "error".into(),
            message: "parse error".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_conversion_to_common_error() {
        let err: canopy_common::Error = Error::Unreachable {
            attempts: 6,
            message: "EOF".into(),
        }
        .into();
        assert!(matches!(err, canopy_common::Error::Transport { .. }));

        let err: canopy_common::Error = Error::invalid_query("window", "bad").into();
        assert!(matches!(err, canopy_common::Error::Config { .. }));
    }
}
