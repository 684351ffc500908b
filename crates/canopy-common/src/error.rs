//! Error types for canopy
//!
//! Errors are structured with fields to aid debugging of partially failed
//! runs. Control-plane failures keep the HTTP status code and the response
//! body so callers can classify them (conflict, not found, transient).

use std::time::Duration;

use thiserror::Error;

/// Substrings in an error body that mark a transient control-plane failure
/// (admission webhook hiccups and truncated connections).
pub const TRANSIENT_MARKERS: [&str; 3] = ["Internal error occurred", "failed calling webhook", "EOF"];

/// HTTP status codes that are always retried
pub const RETRYABLE_STATUS_CODES: [u16; 2] = [429, 500];

/// Main error type for canopy operations
#[derive(Debug, Error)]
pub enum Error {
    /// The control plane answered with a non-success status
    #[error("api error {code} ({reason}): {body}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Machine-readable reason (e.g. AlreadyExists, NotFound)
        reason: String,
        /// Error body / message returned by the server
        body: String,
    },

    /// The request never produced a status (connection refused, reset, EOF)
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure
        message: String,
    },

    /// A resource did not become ready before its deadline
    #[error("timed out after {timeout:?} waiting for {resource} Ready")]
    Timeout {
        /// Resource being waited on, as `{plural}/{name}`
        resource: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The offending field, if known
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Attempt to move a test run to an earlier phase
    #[error("phase cannot move from {current} back to {requested}")]
    PhaseRegression {
        /// Phase the run is in
        current: String,
        /// Phase that was requested
        requested: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => Error::Api {
                code: ae.code,
                reason: ae.reason.clone(),
                body: ae.message.clone(),
            },
            other => Error::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl Error {
    /// Create an API error with the given status code and body
    pub fn api(code: u16, body: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: String::new(),
            body: body.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Create a readiness timeout error for the given resource
    pub fn timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code, when the control plane answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Raw error body for remote failures
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::Api { body, .. } => Some(body),
            Error::Transport { message } => Some(message),
            _ => None,
        }
    }

    /// 409: the resource already exists (or is being deleted)
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// 404: the resource is gone
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether a control-plane call that failed this way should be retried.
    ///
    /// Retryable iff the status is 429 or 500, or the body carries one of the
    /// [`TRANSIENT_MARKERS`]. Conflicts are never retryable.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.status_code() {
            if RETRYABLE_STATUS_CODES.contains(&code) {
                return true;
            }
        }
        self.body()
            .map(|body| TRANSIENT_MARKERS.iter().any(|m| body.contains(m)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: rate limiting and server overload are retried
    #[test]
    fn story_overloaded_control_plane_is_retryable() {
        assert!(Error::api(429, "Too Many Requests").is_retryable());
        assert!(Error::api(500, "boom").is_retryable());
        assert!(!Error::api(503, "unavailable").is_retryable());
    }

    /// Story: webhook flakiness shows up in the body, not the status code
    #[test]
    fn story_webhook_failures_are_retryable_by_body() {
        let err = Error::api(
            400,
            "Internal error occurred: failed calling webhook \"validate.projects\"",
        );
        assert!(err.is_retryable());

        let err = Error::transport("connection closed before message completed: unexpected EOF");
        assert!(err.is_retryable());
    }

    /// Story: "already exists" is the expected path for idempotent creates
    #[test]
    fn story_conflict_is_never_retryable() {
        let err = Error::api(409, "projects \"org-p-001\" already exists");
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        let err = Error::api(404, "not found");
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), Some(404));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_kube_api_error_keeps_status_and_body() {
        let kube_err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "organizations \"acme\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        let err: Error = kube_err.into();
        match &err {
            Error::Api { code, reason, body } => {
                assert_eq!(*code, 409);
                assert_eq!(reason, "AlreadyExists");
                assert!(body.contains("already exists"));
            }
            other => panic!("expected Api variant, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_names_resource() {
        let err = Error::timeout("projects/acme-p-001", Duration::from_secs(900));
        assert!(err.to_string().contains("projects/acme-p-001"));
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_config_error_with_field() {
        let err = Error::config_for_field("measure_window", "invalid duration");
        match &err {
            Error::Config { field, .. } => assert_eq!(field.as_deref(), Some("measure_window")),
            _ => panic!("Expected Config variant"),
        }
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_internal_error_names_context() {
        let err = Error::internal_with_context("init_logging", "subscriber already set");
        assert_eq!(
            err.to_string(),
            "internal error [init_logging]: subscriber already set"
        );
        assert!(!err.is_retryable());
    }
}
