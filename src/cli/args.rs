//! CLI argument definitions using clap
//!
//! Commands:
//! - car-svc serve
//! - car-svc migrate
//!
//! Every flag falls back to an environment variable, see [`ServiceConfig`].

use clap::{Parser, Subcommand};

use crate::config::ServiceConfig;

/// car-svc - CRUD and search over cars
#[derive(Parser, Debug)]
#[command(name = "car-svc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServiceConfig),

    /// Create the car table and its indexes, then exit
    Migrate(ServiceConfig),
}

impl Command {
    pub fn config(&self) -> &ServiceConfig {
        match self {
            Command::Serve(config) | Command::Migrate(config) => config,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["car-svc", "serve", "--env", "dev", "--store", "memory", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Command::Serve(_)));
        assert_eq!(cli.command.config().port, 9000);
        assert_eq!(cli.command.config().store, StoreKind::Memory);
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from([
            "car-svc",
            "migrate",
            "--env",
            "uat",
            "--database-url",
            "postgres://localhost/cars",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Migrate(_)));
    }

    #[test]
    fn test_rejects_unknown_environment() {
        assert!(Cli::try_parse_from(["car-svc", "serve", "--env", "qa"]).is_err());
    }
}
