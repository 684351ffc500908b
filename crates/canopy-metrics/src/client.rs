//! Instant-query client for a Prometheus-compatible backend

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use canopy_common::retry::{retry_with_backoff, RetryConfig};

use crate::error::Error;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Instant-query endpoint, relative to the base URL
pub const QUERY_PATH: &str = "/api/v1/query";

/// Something that evaluates a PromQL instant query to a single number
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `promql`; an empty result is `0.0`
    async fn query(&self, promql: &str) -> Result<f64, Error>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    value: (serde_json::Value, String),
}

/// Interpret an instant-query response body
pub fn parse_response(body: &str) -> Result<f64, Error> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;

    if response.status != "success" {
        return Err(Error::QueryFailed {
            status: response.status,
            message: response.error.unwrap_or_default(),
        });
    }

    let Some(sample) = response.data.and_then(|d| d.result.into_iter().next()) else {
        return Ok(0.0);
    };

    let value: f64 = sample
        .value
        .1
        .parse()
        .map_err(|_| Error::malformed(format!("non-numeric sample '{}'", sample.value.1)))?;
    if !value.is_finite() {
        return Err(Error::malformed(format!("non-finite sample '{}'", sample.value.1)));
    }
    Ok(value)
}

/// HTTP backend speaking the Prometheus query API
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl PrometheusClient {
    /// Client for `base_url` (e.g. `http://vmselect:8481/select/0/prometheus`)
    pub fn new(base_url: &str) -> Result<Self, Error> {
        if base_url.trim().is_empty() {
            return Err(Error::invalid_query("base_url", "metrics base URL is empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::invalid_query("base_url", format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::metrics_http(),
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full query endpoint URL
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, QUERY_PATH)
    }

    async fn fetch(&self, promql: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .get(self.endpoint())
            .query(&[("query", promql)])
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to read body: {}", e)))?;

        if status.is_success() {
            Ok(body)
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(FetchError::Transient(format!("HTTP {}", status)))
        } else {
            Err(FetchError::Rejected { status, body })
        }
    }
}

/// Why a single request produced no usable body
#[derive(Debug)]
enum FetchError {
    /// Connection failure, timeout, 5xx or 429; worth another attempt
    Transient(String),
    /// Any other non-2xx answer
    Rejected { status: StatusCode, body: String },
}

impl FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(message) => f.write_str(message),
            FetchError::Rejected { status, .. } => write!(f, "HTTP {}", status),
        }
    }
}

/// Map a rejected request to `QueryFailed`, keeping the backend's own error
/// text when the body carries one
fn rejected(status: StatusCode, body: &str) -> Error {
    match parse_response(body) {
        Err(err @ Error::QueryFailed { .. }) => err,
        _ => Error::QueryFailed {
            status: format!("HTTP {}", status.as_u16()),
            message: body.chars().take(200).collect(),
        },
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query(&self, promql: &str) -> Result<f64, Error> {
        let body = retry_with_backoff(
            &self.retry,
            "metrics query",
            FetchError::is_transient,
            || self.fetch(promql),
        )
        .await
        .map_err(|e| match e {
            FetchError::Transient(message) => Error::Unreachable {
                attempts: self.retry.max_attempts,
                message,
            },
            FetchError::Rejected { status, body } => rejected(status, &body),
        })?;

        debug!(endpoint = %self.endpoint(), bytes = body.len(), "Metrics query answered");
        parse_response(&body)
    }
}
