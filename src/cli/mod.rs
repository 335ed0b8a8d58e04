//! CLI module for car-svc
//!
//! Provides command-line interface for:
//! - serve: Load schemas, open the store and serve HTTP
//! - migrate: Create the car table and exit

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{migrate, open_store, run_command, serve};
pub use errors::{CliError, CliResult};

