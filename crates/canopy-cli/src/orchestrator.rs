//! The load run: provision in phases, measure between them, checkpoint
//! every boundary
//!
//! Ordering is fixed: baseline, organization and projects, stabilize,
//! measure, objects, stabilize, measure. The checkpoint is written before
//! any resource exists so a crashed run can always be cleaned up; checkpoint
//! and report failures only warn.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use canopy_common::run::{Phase, TestRun};
use canopy_metrics::{MetricsCollector, MetricsSnapshot};
use canopy_provision::{Checkpointer, TreeProvisioner};

use crate::report::{self, ObjectTotals, PhaseMetrics, RunResults};
use crate::Result;

/// Run-level knobs outside provisioning and measurement
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Wait before measuring after each phase; zero skips the wait
    pub stabilize: Duration,
    /// Whether Secrets and ConfigMaps are created
    pub run_objects_phase: bool,
    /// Directory receiving results.json, report.html and meta.txt
    pub out_dir: PathBuf,
}

/// Drives one load run end to end
pub struct Orchestrator {
    provisioner: TreeProvisioner,
    collector: MetricsCollector,
    checkpointer: Checkpointer,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        provisioner: TreeProvisioner,
        collector: MetricsCollector,
        checkpointer: Checkpointer,
        settings: RunSettings,
    ) -> Self {
        Self {
            provisioner,
            collector,
            checkpointer,
            settings,
        }
    }

    /// Execute every phase, then publish the results.
    ///
    /// Provisioning errors, readiness timeouts and an unreachable metrics
    /// backend abort the run with the checkpoint left in place.
    pub async fn run(&self, mut run: TestRun) -> Result<RunResults> {
        info!(
            test_id = %run.test_id(),
            org = %run.org_name(),
            projects = run.num_projects,
            secrets_per_project = run.num_secrets_per_project,
            configmaps_per_project = run.num_configmaps_per_project,
            "Starting load run"
        );
        let sizing = BTreeMap::from([("num_projects".to_string(), json!(run.num_projects))]);
        self.checkpoint(&run, &sizing).await;

        info!("Measuring baseline metrics");
        let baseline = self.collector.measure().await?;

        self.provisioner.create_organization(&run).await?;
        let projects = self.provisioner.create_projects(&run).await?;
        run.advance(Phase::OrgCreated)?;
        self.checkpoint(&run, &BTreeMap::new()).await;

        let after_projects = self.measure_after("projects are Ready").await?;
        run.advance(Phase::ProjectsReady)?;
        self.checkpoint(&run, &sizing).await;

        let mut objects: Option<ObjectTotals> = None;
        let mut after_objects = None;
        if self.settings.run_objects_phase {
            let counts = self.provisioner.create_objects(&run, &projects.names).await?;
            objects = Some(counts.into());
            after_objects = Some(self.measure_after("Secrets and ConfigMaps").await?);
            run.advance(Phase::ObjectsCreated)?;
            self.checkpoint(&run, &BTreeMap::new()).await;
        } else {
            info!("Object phase disabled; skipping Secrets and ConfigMaps");
        }

        let results = RunResults {
            test_id: run.test_id().to_string(),
            timestamp: Utc::now(),
            org_name: run.org_name().to_string(),
            phase: run.phase().to_string(),
            num_projects: run.num_projects,
            num_secrets_per_project: run.num_secrets_per_project,
            num_configmaps_per_project: run.num_configmaps_per_project,
            projects_ready_seconds: projects.ready_elapsed.as_secs_f64(),
            projects_total_seconds: projects.total_elapsed.as_secs_f64(),
            objects,
            metrics: PhaseMetrics {
                baseline,
                after_projects,
                after_objects,
            },
        };
        self.publish(&run, &results).await;

        info!(test_id = %run.test_id(), org = %run.org_name(), "Load run complete");
        Ok(results)
    }

    async fn measure_after(&self, what: &str) -> Result<MetricsSnapshot> {
        let stabilize = self.settings.stabilize;
        if !stabilize.is_zero() {
            info!(seconds = stabilize.as_secs(), "Stabilizing after {}", what);
            tokio::time::sleep(stabilize).await;
        }
        info!("Measuring metrics after {}", what);
        Ok(self.collector.measure().await?)
    }

    async fn checkpoint(&self, run: &TestRun, extra: &BTreeMap<String, Value>) {
        if let Err(e) = self.checkpointer.save_checkpoint(run, extra).await {
            warn!(phase = %run.phase(), error = %e, "Failed to save checkpoint; continuing");
        }
    }

    /// Files first, then the record. Both are best effort.
    async fn publish(&self, run: &TestRun, results: &RunResults) {
        let html = report::render_html(results);
        let out_dir = &self.settings.out_dir;

        match report::write_outputs(out_dir, results, &html).await {
            Ok(()) => info!(dir = %out_dir.display(), "Results written"),
            Err(e) => warn!(dir = %out_dir.display(), error = %e, "Failed to write results"),
        }

        let json = match results.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode results; skipping record");
                return;
            }
        };
        match self.checkpointer.save_results(run, &json, &html).await {
            Ok(()) => info!(record = %self.checkpointer.record(), "Results saved to record"),
            Err(e) => warn!(error = %e, "Skipping results record (insufficient RBAC?)"),
        }
    }
}
