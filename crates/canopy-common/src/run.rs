//! Test-run identity and phase tracking
//!
//! A [`TestRun`] is created once per invocation and threaded through every
//! component. It owns the run's naming scheme, so a rerun with the same
//! identity produces the same object names and creates stay idempotent.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result, APP_LABEL_KEY, APP_LABEL_VALUE, TEST_ID_LABEL_KEY};

/// Lifecycle phase of a run, in the order they are reached
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Nothing created yet
    #[default]
    Init,
    /// Organization and projects were created
    OrgCreated,
    /// Every project reported Ready
    ProjectsReady,
    /// Secrets and ConfigMaps were created
    ObjectsCreated,
}

impl Phase {
    /// Name persisted in checkpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::OrgCreated => "org-created",
            Phase::ProjectsReady => "projects-ready",
            Phase::ObjectsCreated => "objects-created",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "init" => Ok(Phase::Init),
            "org-created" => Ok(Phase::OrgCreated),
            "projects-ready" => Ok(Phase::ProjectsReady),
            "objects-created" => Ok(Phase::ObjectsCreated),
            other => Err(Error::serialization_for_kind(
                "Phase",
                format!("unknown phase '{}'", other),
            )),
        }
    }
}

/// Generate a fresh 8-hex-character test id
pub fn generate_test_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Default organization name for a test id
pub fn default_org_name(test_id: &str) -> String {
    format!("perf-{}", test_id)
}

/// Name of the `index`-th project (1-based) of an organization
pub fn project_name(org_name: &str, index: usize) -> String {
    format!("{}-p-{:03}", org_name, index)
}

/// Name of the `index`-th secret (1-based) in a project
pub fn secret_name(index: usize) -> String {
    format!("perf-secret-{:03}", index)
}

/// Name of the `index`-th configmap (1-based) in a project
pub fn configmap_name(index: usize) -> String {
    format!("perf-configmap-{:03}", index)
}

/// Label selector matching everything a run with `test_id` created
pub fn label_selector(test_id: &str) -> String {
    format!(
        "{}={},{}={}",
        APP_LABEL_KEY, APP_LABEL_VALUE, TEST_ID_LABEL_KEY, test_id
    )
}

/// Identity, sizing and progress of one load run
#[derive(Clone, Debug, PartialEq)]
pub struct TestRun {
    test_id: String,
    org_name: String,
    phase: Phase,
    /// Projects to create under the organization
    pub num_projects: usize,
    /// Secrets to create in each project
    pub num_secrets_per_project: usize,
    /// ConfigMaps to create in each project
    pub num_configmaps_per_project: usize,
}

impl TestRun {
    /// Start a run. A missing test id is generated; a missing organization
    /// name defaults to `perf-{test_id}`.
    pub fn new(test_id: Option<String>, org_name: Option<String>) -> Self {
        let test_id = test_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_test_id);
        let org_name = org_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_org_name(&test_id));
        Self {
            test_id,
            org_name,
            phase: Phase::Init,
            num_projects: 0,
            num_secrets_per_project: 0,
            num_configmaps_per_project: 0,
        }
    }

    /// Set the tree dimensions
    pub fn with_sizes(mut self, projects: usize, secrets: usize, configmaps: usize) -> Self {
        self.num_projects = projects;
        self.num_secrets_per_project = secrets;
        self.num_configmaps_per_project = configmaps;
        self
    }

    /// The run's test id
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// The organization all projects belong to
    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Staying in the same phase is allowed; going back is not.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if next < self.phase {
            return Err(Error::PhaseRegression {
                current: self.phase.to_string(),
                requested: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Labels stamped on every created resource
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string()),
            (TEST_ID_LABEL_KEY.to_string(), self.test_id.clone()),
        ])
    }

    /// Selector matching [`TestRun::labels`]
    pub fn label_selector(&self) -> String {
        label_selector(&self.test_id)
    }

    /// Name of the `index`-th project (1-based)
    pub fn project_name(&self, index: usize) -> String {
        project_name(&self.org_name, index)
    }

    /// All project names in creation order
    pub fn project_names(&self) -> Vec<String> {
        (1..=self.num_projects).map(|i| self.project_name(i)).collect()
    }

    /// Total Secrets the run creates
    pub fn total_secrets(&self) -> usize {
        self.num_projects * self.num_secrets_per_project
    }

    /// Total ConfigMaps the run creates
    pub fn total_configmaps(&self) -> usize {
        self.num_projects * self.num_configmaps_per_project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity() {
        let run = TestRun::new(None, None);
        assert_eq!(run.test_id().len(), 8);
        assert!(run.test_id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(run.org_name(), format!("perf-{}", run.test_id()));
        assert_eq!(run.phase(), Phase::Init);
    }

    #[test]
    fn test_explicit_identity_is_kept() {
        let run = TestRun::new(Some("abcd1234".into()), Some("acme".into()));
        assert_eq!(run.test_id(), "abcd1234");
        assert_eq!(run.org_name(), "acme");

        let run = TestRun::new(Some("abcd1234".into()), Some(String::new()));
        assert_eq!(run.org_name(), "perf-abcd1234");
    }

    #[test]
    fn test_names_are_one_based_and_padded() {
        let run = TestRun::new(Some("abcd1234".into()), Some("acme".into())).with_sizes(3, 2, 0);
        assert_eq!(
            run.project_names(),
            vec!["acme-p-001", "acme-p-002", "acme-p-003"]
        );
        assert_eq!(secret_name(1), "perf-secret-001");
        assert_eq!(configmap_name(42), "perf-configmap-042");
        assert_eq!(project_name("acme", 1000), "acme-p-1000");
        assert_eq!(run.total_secrets(), 6);
        assert_eq!(run.total_configmaps(), 0);
    }

    #[test]
    fn test_labels_and_selector() {
        let run = TestRun::new(Some("abcd1234".into()), None);
        let labels = run.labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("milo-perf"));
        assert_eq!(labels.get("test-id").map(String::as_str), Some("abcd1234"));
        assert_eq!(run.label_selector(), "app=milo-perf,test-id=abcd1234");
    }

    /// Story: a run walks its phases forward and can never step back
    #[test]
    fn story_phase_is_monotonic() {
        let mut run = TestRun::new(None, None);
        run.advance(Phase::OrgCreated).unwrap();
        run.advance(Phase::ProjectsReady).unwrap();
        run.advance(Phase::ProjectsReady).unwrap();

        let err = run.advance(Phase::OrgCreated).unwrap_err();
        match err {
            Error::PhaseRegression { current, requested } => {
                assert_eq!(current, "projects-ready");
                assert_eq!(requested, "org-created");
            }
            other => panic!("expected PhaseRegression, got {other:?}"),
        }
        assert_eq!(run.phase(), Phase::ProjectsReady);

        run.advance(Phase::ObjectsCreated).unwrap();
        assert_eq!(run.phase(), Phase::ObjectsCreated);
    }

    #[test]
    fn test_phase_names_parse_back() {
        for phase in [
            Phase::Init,
            Phase::OrgCreated,
            Phase::ProjectsReady,
            Phase::ObjectsCreated,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("done".parse::<Phase>().is_err());
    }
}
