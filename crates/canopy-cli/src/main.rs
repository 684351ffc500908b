//! canopy CLI
//!
//! Runs a control-plane load test (`--mode run`) or tears one down
//! (`--mode cleanup`).

use clap::Parser;

use canopy_cli::{Cli, Result};
use canopy_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    cli.run().await
}
