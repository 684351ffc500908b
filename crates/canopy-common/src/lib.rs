//! Common types for canopy: errors, retry, scoped kubeconfigs and run state

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod kubeconfig;
pub mod resources;
pub mod retry;
pub mod run;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Value of the `app` label carried by every resource a run creates
pub const APP_LABEL_VALUE: &str = "milo-perf";

/// Label key holding the application tag
pub const APP_LABEL_KEY: &str = "app";

/// Label key holding the run's test id
pub const TEST_ID_LABEL_KEY: &str = "test-id";

/// Namespace that Secrets and ConfigMaps are created in inside a project
pub const PROJECT_OBJECT_NAMESPACE: &str = "default";

/// Name of the record holding the checkpoint and final results
pub const RESULTS_RECORD_NAME: &str = "perf-results";
