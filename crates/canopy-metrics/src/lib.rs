//! Control-plane CPU/memory measurement
//!
//! [`MetricsCollector`] turns a [`MeasureTarget`] into a [`MetricsSnapshot`]
//! by issuing instant queries against any [`MetricsBackend`];
//! [`PrometheusClient`] is the HTTP implementation.

#![deny(missing_docs)]

pub mod client;
pub mod collector;
pub mod error;
pub mod query;
pub mod snapshot;

pub use client::{MetricsBackend, PrometheusClient};
pub use collector::{MeasureTarget, MetricsCollector};
pub use error::Error;
pub use query::{MetricKind, Window};
pub use snapshot::MetricsSnapshot;

/// Result type alias for metrics operations
pub type Result<T> = std::result::Result<T, Error>;
