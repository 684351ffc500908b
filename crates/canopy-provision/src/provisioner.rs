//! Concurrent creation of the Organization → Project → object tree
//!
//! Organization and project creates go through the control-plane retry
//! policy and treat 409 as "already exists". Project readiness is awaited
//! one project at a time. Secrets and ConfigMaps are created without retry,
//! fanned out per project and across projects under separate caps.

use std::ops::Add;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use canopy_common::kubeconfig::ConnectionDescriptor;
use canopy_common::resources::{ResourceKind, ResourceRef};
use canopy_common::retry::retry_api_call;
use canopy_common::run::TestRun;
use canopy_common::Result;

use crate::client::{ClientFactory, ControlPlane};
use crate::manifests;
use crate::readiness::{wait_ready_with, ReadinessPolicy, PROJECT_READY_TIMEOUT};

/// Log project progress every this many projects
const PROGRESS_EVERY: usize = 10;

/// Fan-out and deadline settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProvisionSettings {
    /// Projects populated at once; `<= 1` means strictly sequential
    pub project_concurrency: usize,
    /// Creates in flight within one project
    pub object_concurrency: usize,
    /// Deadline for each project to become Ready
    pub project_ready_timeout: Duration,
    /// Poll cadence while waiting
    pub readiness: ReadinessPolicy,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            project_concurrency: 4,
            object_concurrency: 8,
            project_ready_timeout: PROJECT_READY_TIMEOUT,
            readiness: ReadinessPolicy::default(),
        }
    }
}

/// Outcome of the project phase
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectsReady {
    /// Every project name, in creation order
    pub names: Vec<String>,
    /// Time spent waiting for readiness after the last create
    pub ready_elapsed: Duration,
    /// Time from the first create to the last Ready
    pub total_elapsed: Duration,
}

/// Objects ensured by the object phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    /// Projects populated
    pub projects: usize,
    /// Secrets created or already present
    pub secrets: usize,
    /// ConfigMaps created or already present
    pub configmaps: usize,
    /// Creates answered with 409
    pub already_existed: usize,
}

impl Add for ObjectCounts {
    type Output = ObjectCounts;

    fn add(self, other: ObjectCounts) -> ObjectCounts {
        ObjectCounts {
            projects: self.projects + other.projects,
            secrets: self.secrets + other.secrets,
            configmaps: self.configmaps + other.configmaps,
            already_existed: self.already_existed + other.already_existed,
        }
    }
}

/// Whether a create made something new or found it in place
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created
    Created,
    /// The control plane answered 409
    AlreadyExists,
}

/// Create through the retry policy, treating 409 as success
pub async fn create_with_retry(
    client: &dyn ControlPlane,
    kind: ResourceKind,
    body: &Value,
    action: &str,
) -> Result<CreateOutcome> {
    match retry_api_call(action, || client.create(kind, body)).await {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(e) if e.is_conflict() => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// Create once, treating 409 as success
pub async fn create_once(
    client: &dyn ControlPlane,
    kind: ResourceKind,
    body: &Value,
) -> Result<CreateOutcome> {
    match client.create(kind, body).await {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(e) if e.is_conflict() => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// Builds a run's resource tree
pub struct TreeProvisioner {
    factory: Arc<dyn ClientFactory>,
    base: ConnectionDescriptor,
    settings: ProvisionSettings,
}

impl TreeProvisioner {
    /// Provisioner rooted at `base`
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        base: ConnectionDescriptor,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            factory,
            base,
            settings,
        }
    }

    /// Create the run's Organization through the base scope.
    ///
    /// No readiness wait: projects are created right after.
    pub async fn create_organization(&self, run: &TestRun) -> Result<CreateOutcome> {
        info!(
            org = %run.org_name(),
            server = self.base.server().unwrap_or_default(),
            user = self.base.user().unwrap_or_default(),
            "Creating Organization"
        );
        let client = self.factory.connect(&self.base).await?;
        let outcome = create_with_retry(
            client.as_ref(),
            ResourceKind::Organization,
            &manifests::organization(run),
            "create Organization",
        )
        .await?;
        if outcome == CreateOutcome::AlreadyExists {
            info!(org = %run.org_name(), "Organization already exists");
        }
        Ok(outcome)
    }

    /// Create every project through the organization scope, then wait for
    /// each to become Ready.
    pub async fn create_projects(&self, run: &TestRun) -> Result<ProjectsReady> {
        let names = run.project_names();
        let org_scope = self.base.for_organization(run.org_name())?;
        let client = self.factory.connect(&org_scope).await?;
        let total = names.len();

        info!(count = total, org = %run.org_name(), "Creating Projects");
        let start = Instant::now();
        for (i, name) in names.iter().enumerate() {
            let outcome = create_with_retry(
                client.as_ref(),
                ResourceKind::Project,
                &manifests::project(run, name),
                &format!("create Project {}", name),
            )
            .await?;
            if outcome == CreateOutcome::AlreadyExists {
                debug!(project = %name, "Project already exists");
            }
            let done = i + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                info!(created = done, total, "Project creation progress");
            }
        }

        let ready_start = Instant::now();
        for (i, name) in names.iter().enumerate() {
            wait_ready_with(
                &self.settings.readiness,
                client.as_ref(),
                &ResourceRef::project(name.as_str()),
                self.settings.project_ready_timeout,
                "Project",
            )
            .await?;
            let done = i + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                info!(ready = done, total, "Project readiness progress");
            }
        }

        let ready_elapsed = ready_start.elapsed();
        let total_elapsed = start.elapsed();
        info!(
            count = total,
            ready_s = ready_elapsed.as_secs_f64(),
            total_s = total_elapsed.as_secs_f64(),
            "All Projects Ready"
        );

        Ok(ProjectsReady {
            names,
            ready_elapsed,
            total_elapsed,
        })
    }

    /// Create Secrets then ConfigMaps in every project.
    pub async fn create_objects(&self, run: &TestRun, projects: &[String]) -> Result<ObjectCounts> {
        info!(
            projects = projects.len(),
            secrets_per_project = run.num_secrets_per_project,
            configmaps_per_project = run.num_configmaps_per_project,
            project_concurrency = self.settings.project_concurrency,
            object_concurrency = self.settings.object_concurrency,
            "Creating objects"
        );

        let counts = if self.settings.project_concurrency <= 1 {
            let mut counts = ObjectCounts::default();
            for project in projects {
                counts = counts + self.populate_project(run, project).await?;
            }
            counts
        } else {
            stream::iter(projects)
                .map(|project| self.populate_project(run, project))
                .buffer_unordered(self.settings.project_concurrency)
                .try_fold(ObjectCounts::default(), |acc, c| async move { Ok(acc + c) })
                .await?
        };

        info!(
            projects = counts.projects,
            secrets = counts.secrets,
            configmaps = counts.configmaps,
            already_existed = counts.already_existed,
            "Objects created"
        );
        Ok(counts)
    }

    async fn populate_project(&self, run: &TestRun, project: &str) -> Result<ObjectCounts> {
        let scope = self.base.for_project(project)?;
        let client = self.factory.connect(&scope).await?;
        let width = self.settings.object_concurrency.max(1);

        let secrets = (1..=run.num_secrets_per_project).map(|i| manifests::secret(run, project, i));
        let secrets = self
            .create_many(client.as_ref(), ResourceKind::Secret, width, secrets)
            .await?;

        let configmaps =
            (1..=run.num_configmaps_per_project).map(|i| manifests::configmap(run, project, i));
        let configmaps = self
            .create_many(client.as_ref(), ResourceKind::ConfigMap, width, configmaps)
            .await?;

        let already_existed = secrets
            .iter()
            .chain(configmaps.iter())
            .filter(|o| **o == CreateOutcome::AlreadyExists)
            .count();
        debug!(
            project = %project,
            secrets = secrets.len(),
            configmaps = configmaps.len(),
            "Project populated"
        );

        Ok(ObjectCounts {
            projects: 1,
            secrets: secrets.len(),
            configmaps: configmaps.len(),
            already_existed,
        })
    }

    async fn create_many(
        &self,
        client: &dyn ControlPlane,
        kind: ResourceKind,
        width: usize,
        bodies: impl Iterator<Item = Value>,
    ) -> Result<Vec<CreateOutcome>> {
        stream::iter(bodies)
            .map(|body| async move { create_once(client, kind, &body).await })
            .buffer_unordered(width)
            .try_collect()
            .await
    }
}
