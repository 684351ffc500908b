//! Teardown of everything a run created
//!
//! Works from the test id alone: projects are found by label, their objects
//! are removed through each project's scope, then the project through the
//! organization scope, then the organization and the checkpoint record.
//! Anything already gone is skipped, so cleanup can be rerun safely.

use std::sync::Arc;

use tracing::{debug, info, warn};

use canopy_common::kubeconfig::ConnectionDescriptor;
use canopy_common::resources::{ResourceKind, ResourceRef};
use canopy_common::run::label_selector;
use canopy_common::{Error, Result};

use crate::checkpoint::Checkpointer;
use crate::client::{ClientFactory, ControlPlane};

/// What a cleanup pass removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Projects deleted
    pub projects: usize,
    /// Secrets deleted
    pub secrets: usize,
    /// ConfigMaps deleted
    pub configmaps: usize,
    /// Whether the organization delete was accepted
    pub organization_deleted: bool,
    /// Whether the checkpoint record was deleted
    pub record_deleted: bool,
    /// Object-level failures that were logged and skipped
    pub skipped_failures: usize,
}

/// 404 means gone; 409 means deletion already in progress
fn is_gone(e: &Error) -> bool {
    e.is_not_found() || e.is_conflict()
}

/// Deletes a run's resource tree
pub struct CleanupEngine {
    factory: Arc<dyn ClientFactory>,
    base: ConnectionDescriptor,
    checkpointer: Checkpointer,
}

impl CleanupEngine {
    /// Engine rooted at `base` that also removes `checkpointer`'s record
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        base: ConnectionDescriptor,
        checkpointer: Checkpointer,
    ) -> Self {
        Self {
            factory,
            base,
            checkpointer,
        }
    }

    /// Delete every resource labelled with `test_id`, the organization and
    /// the checkpoint record.
    pub async fn cleanup(&self, test_id: &str, org_name: &str) -> Result<CleanupSummary> {
        let selector = label_selector(test_id);
        let mut summary = CleanupSummary::default();

        let base_client = self.factory.connect(&self.base).await?;
        let org_client = self
            .factory
            .connect(&self.base.for_organization(org_name)?)
            .await?;

        let projects = base_client.list(ResourceKind::Project, &selector).await?;
        info!(test_id, org = org_name, projects = projects.len(), "Cleaning up test run");

        for project in &projects {
            info!(project = %project, "Deleting Secrets, ConfigMaps and Project");
            self.clear_project(project, &selector, &mut summary).await;

            match org_client.delete(&ResourceRef::project(project.as_str())).await {
                Ok(()) => summary.projects += 1,
                Err(e) if is_gone(&e) => {
                    debug!(project = %project, status = ?e.status_code(), "Project already gone")
                }
                Err(e) => return Err(e),
            }
        }

        match base_client.delete(&ResourceRef::organization(org_name)).await {
            Ok(()) => summary.organization_deleted = true,
            Err(e) if is_gone(&e) => {
                debug!(org = org_name, status = ?e.status_code(), "Organization already gone")
            }
            Err(e) => return Err(e),
        }

        summary.record_deleted = self.checkpointer.remove().await?;

        info!(
            projects = summary.projects,
            secrets = summary.secrets,
            configmaps = summary.configmaps,
            organization_deleted = summary.organization_deleted,
            record_deleted = summary.record_deleted,
            skipped_failures = summary.skipped_failures,
            "Cleanup complete"
        );
        Ok(summary)
    }

    /// Remove a project's Secrets and ConfigMaps. Never fails: every error
    /// is logged and counted.
    async fn clear_project(&self, project: &str, selector: &str, summary: &mut CleanupSummary) {
        let client = match self.connect_project(project).await {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    project = %project,
                    error = %e,
                    "Cannot reach project scope; skipping its objects"
                );
                summary.skipped_failures += 1;
                return;
            }
        };

        for kind in [ResourceKind::Secret, ResourceKind::ConfigMap] {
            let (deleted, failures) = delete_labelled(client.as_ref(), kind, selector).await;
            summary.skipped_failures += failures;
            match kind {
                ResourceKind::Secret => summary.secrets += deleted,
                _ => summary.configmaps += deleted,
            }
        }
    }

    async fn connect_project(&self, project: &str) -> Result<Arc<dyn ControlPlane>> {
        let scope = self.base.for_project(project)?;
        self.factory.connect(&scope).await
    }
}

/// Delete every object of `kind` matching `selector`; returns
/// (deleted, failures)
async fn delete_labelled(
    client: &dyn ControlPlane,
    kind: ResourceKind,
    selector: &str,
) -> (usize, usize) {
    let names = match client.list(kind, selector).await {
        Ok(names) => names,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Failed to list objects for cleanup");
            return (0, 1);
        }
    };

    let mut deleted = 0;
    let mut failures = 0;
    for name in names {
        match client.delete(&ResourceRef::new(kind, name.as_str())).await {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Failed to delete object");
                failures += 1;
            }
        }
    }
    (deleted, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MockRecordStore;
    use crate::client::{MockClientFactory, MockControlPlane};
    use std::sync::Mutex;

    const BASE: &str = r#"
clusters:
- cluster:
    server: https://milo.example.com
  name: milo
current-context: milo
"#;

    fn base() -> ConnectionDescriptor {
        ConnectionDescriptor::from_yaml(BASE).unwrap()
    }

    fn record_store(delete_status: Option<u16>) -> Checkpointer {
        let mut store = MockRecordStore::new();
        store.expect_delete().returning(move |_| match delete_status {
            None => Ok(()),
            Some(code) => Err(Error::api(code, "record")),
        });
        Checkpointer::new(Arc::new(store))
    }

    /// Scope-aware factory: hands out the client registered for a
    /// descriptor name
    fn factory(clients: Vec<(&'static str, Arc<dyn ControlPlane>)>) -> MockClientFactory {
        let mut factory = MockClientFactory::new();
        factory.expect_connect().returning(move |d| {
            clients
                .iter()
                .find(|(name, _)| *name == d.name())
                .map(|(_, c)| c.clone())
                .ok_or_else(|| Error::transport(format!("no client for {}", d.name())))
        });
        factory
    }

    /// Story: a crashed run left two projects with objects; cleanup removes
    /// objects, projects, the org and the checkpoint in that order
    #[tokio::test]
    async fn story_full_teardown_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut base_client = MockControlPlane::new();
        base_client
            .expect_list()
            .withf(|kind, sel| *kind == ResourceKind::Project && sel == "app=milo-perf,test-id=abcd1234")
            .returning(|_, _| Ok(vec!["acme-p-001".into(), "acme-p-002".into()]));
        let l = log.clone();
        base_client.expect_delete().returning(move |r| {
            l.lock().unwrap().push(format!("base:{}", r));
            Ok(())
        });

        let mut org_client = MockControlPlane::new();
        let l = log.clone();
        org_client.expect_delete().returning(move |r| {
            l.lock().unwrap().push(format!("org:{}", r));
            if r.name == "acme-p-002" {
                Err(Error::api(409, "deletion in progress"))
            } else {
                Ok(())
            }
        });

        let project_client = |project: &'static str| {
            let mut c = MockControlPlane::new();
            c.expect_list().returning(|kind, _| {
                Ok(match kind {
                    ResourceKind::Secret => vec!["perf-secret-001".into(), "perf-secret-002".into()],
                    _ => vec!["perf-configmap-001".into()],
                })
            });
            let l = log.clone();
            c.expect_delete().returning(move |r| {
                l.lock().unwrap().push(format!("{}:{}", project, r));
                Ok(())
            });
            Arc::new(c) as Arc<dyn ControlPlane>
        };

        let factory = factory(vec![
            ("milo", Arc::new(base_client) as Arc<dyn ControlPlane>),
            ("organization-acme", Arc::new(org_client)),
            ("project-acme-p-001", project_client("p1")),
            ("project-acme-p-002", project_client("p2")),
        ]);

        let engine = CleanupEngine::new(Arc::new(factory), base(), record_store(None));
        let summary = engine.cleanup("abcd1234", "acme").await.unwrap();

        assert_eq!(
            summary,
            CleanupSummary {
                projects: 1,
                secrets: 4,
                configmaps: 2,
                organization_deleted: true,
                record_deleted: true,
                skipped_failures: 0,
            }
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "p1:secrets/perf-secret-001",
                "p1:secrets/perf-secret-002",
                "p1:configmaps/perf-configmap-001",
                "org:projects/acme-p-001",
                "p2:secrets/perf-secret-001",
                "p2:secrets/perf-secret-002",
                "p2:configmaps/perf-configmap-001",
                "org:projects/acme-p-002",
                "base:organizations/acme",
            ]
        );
    }

    /// Story: running cleanup a second time finds nothing and succeeds
    #[tokio::test]
    async fn story_second_cleanup_is_a_no_op() {
        let mut base_client = MockControlPlane::new();
        base_client.expect_list().returning(|_, _| Ok(vec![]));
        base_client
            .expect_delete()
            .returning(|_| Err(Error::api(404, "organizations \"acme\" not found")));

        let factory = factory(vec![
            ("milo", Arc::new(base_client) as Arc<dyn ControlPlane>),
            ("organization-acme", Arc::new(MockControlPlane::new())),
        ]);

        let engine = CleanupEngine::new(Arc::new(factory), base(), record_store(Some(404)));
        let summary = engine.cleanup("abcd1234", "acme").await.unwrap();
        assert_eq!(summary, CleanupSummary::default());
    }

    #[tokio::test]
    async fn test_object_failures_are_tolerated() {
        let mut base_client = MockControlPlane::new();
        base_client
            .expect_list()
            .returning(|_, _| Ok(vec!["acme-p-001".into()]));
        base_client.expect_delete().returning(|_| Ok(()));

        let mut org_client = MockControlPlane::new();
        org_client.expect_delete().returning(|_| Ok(()));

        let mut project = MockControlPlane::new();
        project.expect_list().returning(|kind, _| match kind {
            ResourceKind::Secret => Err(Error::api(403, "forbidden")),
            _ => Ok(vec!["perf-configmap-001".into()]),
        });
        project
            .expect_delete()
            .returning(|_| Err(Error::api(500, "boom")));

        let factory = factory(vec![
            ("milo", Arc::new(base_client) as Arc<dyn ControlPlane>),
            ("organization-acme", Arc::new(org_client)),
            ("project-acme-p-001", Arc::new(project)),
        ]);

        let engine = CleanupEngine::new(Arc::new(factory), base(), record_store(None));
        let summary = engine.cleanup("abcd1234", "acme").await.unwrap();
        assert_eq!(summary.projects, 1);
        assert_eq!(summary.skipped_failures, 2);
        assert_eq!(summary.configmaps, 0);
    }

    #[tokio::test]
    async fn test_project_delete_error_is_fatal() {
        let mut base_client = MockControlPlane::new();
        base_client
            .expect_list()
            .returning(|_, _| Ok(vec!["acme-p-001".into()]));
        base_client.expect_delete().never();

        let mut org_client = MockControlPlane::new();
        org_client
            .expect_delete()
            .returning(|_| Err(Error::api(403, "forbidden")));

        // No project client registered: object cleanup is skipped
        let factory = factory(vec![
            ("milo", Arc::new(base_client) as Arc<dyn ControlPlane>),
            ("organization-acme", Arc::new(org_client)),
        ]);

        let engine = CleanupEngine::new(Arc::new(factory), base(), record_store(None));
        let err = engine.cleanup("abcd1234", "acme").await.unwrap_err();
        assert_eq!(err.status_code(), Some(403));
    }
}
