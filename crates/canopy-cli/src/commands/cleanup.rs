//! `--mode cleanup`: tear down a run from its test id

use std::sync::Arc;

use canopy_provision::{CleanupEngine, KubeClientFactory};

use super::{load_base_descriptor, results_checkpointer};
use crate::config::CleanupConfig;
use crate::Result;

pub async fn run(config: CleanupConfig) -> Result<()> {
    let base = load_base_descriptor(&config.milo_kubeconfig, config.auth_bearer_token.as_deref())?;
    let checkpointer = results_checkpointer(&config.target_namespace).await?;

    let engine = CleanupEngine::new(Arc::new(KubeClientFactory), base, checkpointer);
    let summary = engine.cleanup(&config.test_id, &config.org_name).await?;

    println!(
        "Cleanup complete: {} projects, {} secrets, {} configmaps removed",
        summary.projects, summary.secrets, summary.configmaps
    );
    Ok(())
}
