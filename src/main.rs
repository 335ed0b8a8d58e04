//! car-svc entry point
//!
//! Parses the command line and hands off to the CLI module. Errors surface
//! here once, with their CLI code, and exit non-zero.

use anyhow::{Context, Result};
use car_svc::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let command = cli::Cli::parse_args().command;
    cli::run_command(command)
        .await
        .map_err(|e| {
            let code = e.code();
            anyhow::Error::new(e).context(code)
        })
        .context("car-svc failed")
}
