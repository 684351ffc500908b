//! `--mode run`: one full load run

use std::sync::Arc;

use tracing::info;

use canopy_metrics::{MetricsCollector, PrometheusClient};
use canopy_provision::{KubeClientFactory, TreeProvisioner};

use super::{load_base_descriptor, results_checkpointer};
use crate::config::RunConfig;
use crate::orchestrator::Orchestrator;
use crate::Result;

pub async fn run(config: RunConfig) -> Result<()> {
    let base = load_base_descriptor(&config.milo_kubeconfig, config.auth_bearer_token.as_deref())?;
    let checkpointer = results_checkpointer(&config.target_namespace).await?;

    let backend = PrometheusClient::new(&config.metrics_url)?;
    info!(endpoint = %backend.endpoint(), "Using metrics backend");
    let collector = MetricsCollector::new(Arc::new(backend), config.measure.clone());

    let provisioner = TreeProvisioner::new(
        Arc::new(KubeClientFactory),
        base,
        config.provision_settings(),
    );

    let orchestrator = Orchestrator::new(provisioner, collector, checkpointer, config.run_settings());
    let results = orchestrator.run(config.test_run()).await?;

    println!("test_id={}", results.test_id);
    println!("org_name={}", results.org_name);
    Ok(())
}
