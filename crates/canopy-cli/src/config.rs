//! Run and cleanup configuration
//!
//! Every flag falls back to the environment variable the load job sets, so
//! the binary runs unchanged as a Kubernetes Job or from a shell. Raw
//! arguments are validated into [`RunConfig`] or [`CleanupConfig`] before
//! anything touches the network.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use canopy_common::run::TestRun;
use canopy_metrics::{MeasureTarget, Window};
use canopy_provision::ProvisionSettings;

use crate::orchestrator::RunSettings;
use crate::{Error, Result};

/// Interpret a boolean environment value.
///
/// `1`, `true`, `t`, `yes`, `y` and `on` (any case) are true; anything else
/// is false.
pub fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "y" | "on"
    ))
}

/// Raw flags shared by both modes
#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Namespace holding the checkpoint/results ConfigMap
    #[arg(long, env = "TARGET_NAMESPACE", default_value = "milo-system")]
    pub target_namespace: String,

    /// Kubeconfig for the control plane under test
    #[arg(long, env = "MILO_KUBECONFIG_PATH", default_value = "/work/milo-kubeconfig")]
    pub milo_kubeconfig: PathBuf,

    /// Namespace the control-plane pods run in
    #[arg(long, env = "MILO_NAMESPACE", default_value = "milo-system")]
    pub metrics_namespace: String,

    /// Base URL of the Prometheus-compatible metrics backend
    #[arg(long, env = "VM_BASE_URL")]
    pub metrics_url: Option<String>,

    /// Regex matching API server pod names
    #[arg(long, env = "APISERVER_POD_REGEX", default_value = "milo-apiserver.*")]
    pub apiserver_pod_regex: String,

    /// Regex matching etcd pod names
    #[arg(long, env = "ETCD_POD_REGEX", default_value = "etcd.*")]
    pub etcd_pod_regex: String,

    /// Range window for rate and avg_over_time
    #[arg(long, env = "MEASURE_WINDOW", default_value = "2m")]
    pub measure_window: String,

    /// Settle time before measuring after each phase
    #[arg(long, env = "STABILIZE_SECONDS", default_value_t = 90)]
    pub stabilize_seconds: u64,

    /// Projects created under the organization
    #[arg(long, env = "NUM_PROJECTS", default_value_t = 100)]
    pub num_projects: usize,

    /// Secrets created in each project
    #[arg(long, env = "NUM_SECRETS_PER_PROJECT", default_value_t = 100)]
    pub num_secrets_per_project: usize,

    /// ConfigMaps created in each project
    #[arg(long, env = "NUM_CONFIGMAPS_PER_PROJECT", default_value_t = 100)]
    pub num_configmaps_per_project: usize,

    /// Projects populated with objects at once; 1 or less is sequential
    #[arg(long, env = "PROJECT_CONCURRENCY", default_value_t = 4)]
    pub project_concurrency: usize,

    /// Object creates in flight within one project
    #[arg(long, env = "OBJECT_CONCURRENCY", default_value_t = 8)]
    pub object_concurrency: usize,

    /// Whether to create Secrets and ConfigMaps after the projects
    #[arg(
        long,
        env = "RUN_OBJECTS_PHASE",
        default_value = "true",
        value_parser = parse_bool,
        action = clap::ArgAction::Set
    )]
    pub run_objects_phase: bool,

    /// Where results.json, report.html and meta.txt are written
    #[arg(long, env = "OUT_DIR", default_value = "/work/out")]
    pub out_dir: PathBuf,

    /// Test id to clean up (cleanup mode)
    #[arg(long, env = "TEST_ID")]
    pub test_id: Option<String>,

    /// Organization name; generated from the test id when absent in run mode
    #[arg(long, env = "ORG_NAME")]
    pub org_name: Option<String>,

    /// Replace the kubeconfig user's token
    #[arg(long, env = "AUTH_BEARER_TOKEN", hide_env_values = true)]
    pub auth_bearer_token: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validated configuration for a load run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_namespace: String,
    pub milo_kubeconfig: PathBuf,
    pub metrics_url: String,
    pub measure: MeasureTarget,
    pub stabilize: Duration,
    pub num_projects: usize,
    pub num_secrets_per_project: usize,
    pub num_configmaps_per_project: usize,
    pub project_concurrency: usize,
    pub object_concurrency: usize,
    pub run_objects_phase: bool,
    pub out_dir: PathBuf,
    pub test_id: Option<String>,
    pub org_name: Option<String>,
    pub auth_bearer_token: Option<String>,
}

impl RunConfig {
    /// Validate raw flags for run mode
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let metrics_url = non_empty(args.metrics_url.as_ref())
            .ok_or_else(|| Error::validation("--metrics-url (VM_BASE_URL) is required in run mode"))?;
        let window: Window = args
            .measure_window
            .parse()
            .map_err(|e: canopy_metrics::Error| Error::validation(e.to_string()))?;

        Ok(Self {
            target_namespace: args.target_namespace.clone(),
            milo_kubeconfig: args.milo_kubeconfig.clone(),
            metrics_url,
            measure: MeasureTarget {
                namespace: args.metrics_namespace.clone(),
                apiserver_pod_regex: args.apiserver_pod_regex.clone(),
                etcd_pod_regex: args.etcd_pod_regex.clone(),
                window,
            },
            stabilize: Duration::from_secs(args.stabilize_seconds),
            num_projects: args.num_projects,
            num_secrets_per_project: args.num_secrets_per_project,
            num_configmaps_per_project: args.num_configmaps_per_project,
            project_concurrency: args.project_concurrency,
            object_concurrency: args.object_concurrency.max(1),
            run_objects_phase: args.run_objects_phase,
            out_dir: args.out_dir.clone(),
            test_id: non_empty(args.test_id.as_ref()),
            org_name: non_empty(args.org_name.as_ref()),
            auth_bearer_token: non_empty(args.auth_bearer_token.as_ref()),
        })
    }

    /// Fresh run state sized by this configuration
    pub fn test_run(&self) -> TestRun {
        TestRun::new(self.test_id.clone(), self.org_name.clone()).with_sizes(
            self.num_projects,
            self.num_secrets_per_project,
            self.num_configmaps_per_project,
        )
    }

    pub fn provision_settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            project_concurrency: self.project_concurrency,
            object_concurrency: self.object_concurrency,
            ..ProvisionSettings::default()
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            stabilize: self.stabilize,
            run_objects_phase: self.run_objects_phase,
            out_dir: self.out_dir.clone(),
        }
    }
}

/// Validated configuration for cleanup
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub target_namespace: String,
    pub milo_kubeconfig: PathBuf,
    pub test_id: String,
    pub org_name: String,
    pub auth_bearer_token: Option<String>,
}

impl CleanupConfig {
    /// Validate raw flags for cleanup mode
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let test_id = non_empty(args.test_id.as_ref())
            .ok_or_else(|| Error::validation("--test-id (TEST_ID) is required in cleanup mode"))?;
        let org_name = non_empty(args.org_name.as_ref())
            .ok_or_else(|| Error::validation("--org-name (ORG_NAME) is required in cleanup mode"))?;

        Ok(Self {
            target_namespace: args.target_namespace.clone(),
            milo_kubeconfig: args.milo_kubeconfig.clone(),
            test_id,
            org_name,
            auth_bearer_token: non_empty(args.auth_bearer_token.as_ref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: CliArgs,
    }

    fn parse(extra: &[&str]) -> CliArgs {
        let argv = ["canopy"].iter().chain(extra.iter()).copied();
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_parse_bool() {
        for v in ["1", "true", "TRUE", "t", "yes", "Y", "on", " On "] {
            assert_eq!(parse_bool(v), Ok(true), "{v}");
        }
        for v in ["0", "false", "no", "off", "", "maybe"] {
            assert_eq!(parse_bool(v), Ok(false), "{v}");
        }
    }

    #[test]
    fn test_run_config_from_flags() {
        let args = parse(&[
            "--metrics-url",
            "http://vm:8428/",
            "--num-projects",
            "3",
            "--num-secrets-per-project",
            "2",
            "--num-configmaps-per-project",
            "0",
            "--object-concurrency",
            "0",
            "--run-objects-phase",
            "no",
            "--measure-window",
            "5m",
            "--stabilize-seconds",
            "0",
            "--org-name",
            "  ",
        ]);
        let config = RunConfig::from_args(&args).unwrap();

        assert_eq!(config.metrics_url, "http://vm:8428/");
        assert_eq!(config.object_concurrency, 1);
        assert!(!config.run_objects_phase);
        assert_eq!(config.measure.window.as_str(), "5m");
        assert_eq!(config.stabilize, Duration::ZERO);
        assert_eq!(config.org_name, None);

        let run = config.test_run();
        assert_eq!(run.num_projects, 3);
        assert_eq!(run.num_secrets_per_project, 2);
        assert_eq!(run.org_name(), format!("perf-{}", run.test_id()));
        assert_eq!(config.provision_settings().object_concurrency, 1);
    }

    #[test]
    fn test_every_flag_is_documented() {
        use clap::CommandFactory;

        let cmd = TestCli::command();
        for arg in cmd.get_arguments().filter(|a| a.get_long().is_some()) {
            assert!(arg.get_help().is_some(), "--{} has no help", arg.get_id());
        }
        let help = TestCli::command().render_help().to_string();
        assert!(help.contains("Secrets created in each project"));
    }

    #[test]
    fn test_run_requires_metrics_url() {
        let mut args = parse(&[]);
        args.metrics_url = None;
        let err = RunConfig::from_args(&args).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        args.metrics_url = Some("   ".into());
        assert!(RunConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_run_rejects_bad_window() {
        let mut args = parse(&["--measure-window", "2 minutes"]);
        args.metrics_url = Some("http://vm".into());
        let err = RunConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("2 minutes"));
    }

    #[test]
    fn test_cleanup_requires_identity() {
        let mut args = parse(&[]);
        args.test_id = Some("abcd1234".into());
        args.org_name = None;
        assert!(CleanupConfig::from_args(&args).is_err());

        args.org_name = Some("acme".into());
        let config = CleanupConfig::from_args(&args).unwrap();
        assert_eq!(config.test_id, "abcd1234");
        assert_eq!(config.org_name, "acme");

        args.test_id = Some(String::new());
        assert!(CleanupConfig::from_args(&args).is_err());
    }
}
