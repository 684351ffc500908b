//! CLI commands
//!
//! Each mode validates its configuration, wires the real kube-rs and HTTP
//! collaborators together and hands off to the library crates.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use canopy_common::kube_utils::{resolve_client, CredentialSource};
use canopy_common::kubeconfig::ConnectionDescriptor;
use canopy_provision::{Checkpointer, ConfigMapStore};

use crate::Result;

pub mod cleanup;
pub mod run;

/// Load the control-plane kubeconfig, applying the token override if set
pub fn load_base_descriptor(path: &Path, bearer_token: Option<&str>) -> Result<ConnectionDescriptor> {
    let base = ConnectionDescriptor::load(path)?;
    debug!(
        path = %path.display(),
        context = base.name(),
        server = base.server().unwrap_or_default(),
        "Loaded control-plane kubeconfig"
    );
    match bearer_token {
        Some(token) => {
            warn!(
                user = base.user().unwrap_or_default(),
                "Overriding kubeconfig user token from AUTH_BEARER_TOKEN"
            );
            Ok(base.with_bearer_token(token)?)
        }
        None => Ok(base),
    }
}

/// Checkpointer writing into `namespace` of the cluster this process runs
/// against (in-cluster service account, else the local kubeconfig)
pub async fn results_checkpointer(namespace: &str) -> Result<Checkpointer> {
    let client = resolve_client(&CredentialSource::default_chain()).await?;
    info!(namespace, "Results record store ready");
    Ok(Checkpointer::new(Arc::new(ConfigMapStore::new(client, namespace))))
}
