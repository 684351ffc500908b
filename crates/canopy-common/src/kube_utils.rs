//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction from connection descriptors, the credential-source
//! chain used for the results store, and status-condition helpers.

use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::kubeconfig::ConnectionDescriptor;
use crate::Error;

/// The "Ready" condition type
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// One entry of `status.conditions`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ReadinessCondition {
    /// Condition type (e.g. Ready)
    #[serde(rename = "type", default)]
    pub type_: String,
    /// True, False or Unknown
    #[serde(default)]
    pub status: String,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl ReadinessCondition {
    /// Whether the condition reports status "True"
    pub fn is_true(&self) -> bool {
        self.status == STATUS_TRUE
    }
}

/// Find a condition of the given type in an object's `status.conditions`.
///
/// Malformed condition entries are skipped.
pub fn find_condition(object: &Value, condition_type: &str) -> Option<ReadinessCondition> {
    object
        .pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|c| serde_json::from_value::<ReadinessCondition>(c.clone()).ok())
        .find(|c| c.type_ == condition_type)
}

/// Create a kube client for a connection descriptor
pub async fn client_for_descriptor(descriptor: &ConnectionDescriptor) -> Result<Client, Error> {
    let kubeconfig: Kubeconfig = serde_json::from_value(descriptor.document().clone())
        .map_err(|e| Error::serialization_for_kind("kubeconfig", e.to_string()))?;

    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::config(format!(
                "failed to load kubeconfig for {}: {}",
                descriptor.name(),
                e
            ))
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("client_for_descriptor", format!("failed to create client: {}", e))
    })
}

/// Where credentials for a cluster may come from
#[derive(Clone, Debug, PartialEq)]
pub enum CredentialSource {
    /// The pod's service account (`KUBERNETES_SERVICE_HOST` + mounted token)
    InCluster,
    /// `KUBECONFIG` / `~/.kube/config`
    DefaultKubeconfig,
}

impl CredentialSource {
    /// In-cluster first, then the local kubeconfig
    pub fn default_chain() -> Vec<CredentialSource> {
        vec![CredentialSource::InCluster, CredentialSource::DefaultKubeconfig]
    }

    async fn load(&self) -> Result<Config, Error> {
        match self {
            CredentialSource::InCluster => Config::incluster()
                .map_err(|e| Error::config(format!("in-cluster config unavailable: {}", e))),
            CredentialSource::DefaultKubeconfig => {
                Config::from_kubeconfig(&KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("default kubeconfig unavailable: {}", e)))
            }
        }
    }
}

/// Resolve a client from the first credential source that works.
pub async fn resolve_client(sources: &[CredentialSource]) -> Result<Client, Error> {
    let mut failures = Vec::new();

    for source in sources {
        match source.load().await {
            Ok(mut config) => {
                config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
                config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
                info!(source = ?source, "Resolved cluster credentials");
                return Client::try_from(config).map_err(|e| {
                    Error::internal_with_context(
                        "resolve_client",
                        format!("failed to create client: {}", e),
                    )
                });
            }
            Err(e) => {
                debug!(source = ?source, error = %e, "Credential source unavailable");
                failures.push(e.to_string());
            }
        }
    }

    Err(Error::config(format!(
        "no credential source succeeded: {}",
        failures.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_ready_condition() {
        let obj = json!({
            "status": {
                "conditions": [
                    {"type": "Provisioned", "status": "True"},
                    {"type": "Ready", "status": "False", "reason": "Provisioning", "message": "waiting for control plane"}
                ]
            }
        });

        let cond = find_condition(&obj, CONDITION_READY).unwrap();
        assert_eq!(cond.status, "False");
        assert_eq!(cond.reason, "Provisioning");
        assert!(!cond.is_true());
    }

    #[test]
    fn test_find_condition_absent() {
        assert!(find_condition(&json!({}), CONDITION_READY).is_none());
        assert!(find_condition(&json!({"status": {}}), CONDITION_READY).is_none());
        assert!(find_condition(&json!({"status": {"conditions": []}}), CONDITION_READY).is_none());
    }

    #[test]
    fn test_condition_missing_optional_fields() {
        let obj = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        let cond = find_condition(&obj, CONDITION_READY).unwrap();
        assert!(cond.is_true());
        assert_eq!(cond.reason, "");
        assert_eq!(cond.message, "");
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            CredentialSource::default_chain(),
            vec![CredentialSource::InCluster, CredentialSource::DefaultKubeconfig]
        );
    }

    #[tokio::test]
    async fn test_resolve_client_without_sources_fails() {
        let err = resolve_client(&[]).await.err().expect("expected resolve_client to fail");
        match err {
            Error::Config { message, .. } => {
                assert_eq!(message, "no credential source succeeded: ")
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }
}
