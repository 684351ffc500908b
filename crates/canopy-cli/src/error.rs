//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("control plane error: {0}")]
    ControlPlane(#[from] canopy_common::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] canopy_metrics::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_errors_convert() {
        let err: Error = canopy_metrics::Error::malformed("no data").into();
        assert!(matches!(err, Error::Metrics(_)));

        let err: Error = canopy_common::Error::api(403, "forbidden").into();
        assert!(err.to_string().starts_with("control plane error:"));

        assert_eq!(
            Error::validation("--test-id is required").to_string(),
            "validation error: --test-id is required"
        );
    }
}
