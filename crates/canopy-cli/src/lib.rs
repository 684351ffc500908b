//! canopy: control-plane load orchestrator
//!
//! Provisions an Organization → Project → object tree against a multi-tenant
//! control plane, measures API server and etcd usage between phases and
//! tears everything down again from a test id.

pub mod commands;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use error::{Error, Result};

use clap::{Parser, ValueEnum};

use canopy_common::telemetry::LogFormat;

use crate::config::{CleanupConfig, CliArgs, RunConfig};

/// What the invocation does
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Provision, measure and report
    #[default]
    Run,
    /// Delete everything a run created
    Cleanup,
}

/// canopy - control-plane load orchestrator
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// run: provision and measure; cleanup: delete a previous run
    #[arg(long, env = "RUN_MODE", value_enum, ignore_case = true, default_value_t = Mode::Run)]
    pub mode: Mode,

    /// Log output format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub args: CliArgs,
}

impl Cli {
    /// Validate the configuration for the selected mode and run it
    pub async fn run(self) -> Result<()> {
        match self.mode {
            Mode::Run => commands::run::run(RunConfig::from_args(&self.args)?).await,
            Mode::Cleanup => commands::cleanup::run(CleanupConfig::from_args(&self.args)?).await,
        }
    }
}
