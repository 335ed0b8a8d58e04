//! CLI command implementations
//!
//! Startup order: logging, configuration checks, schemas, store, server.
//! A failure at any step stops the process before it accepts traffic.

use std::sync::Arc;

use tracing::info;

use crate::config::{RuntimeKind, ServiceConfig, StoreKind};
use crate::http_server::{AppState, HttpServer, HttpServerConfig};
use crate::observability::{init_tracing, LogFormat};
use crate::schema::{SchemaLoader, SchemaValidator};
use crate::store::{CarStore, MemoryCarStore, PostgresCarStore};

use super::args::Command;
use super::errors::CliResult;

/// Runs one command to completion
pub async fn run_command(command: Command) -> CliResult<()> {
    let runtime = RuntimeKind::detect();
    let format = if runtime.is_cloud() {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, command.config().debug)?;

    match command {
        Command::Serve(config) => serve(config, runtime).await,
        Command::Migrate(config) => migrate(config).await,
    }
}

pub async fn serve(config: ServiceConfig, runtime: RuntimeKind) -> CliResult<()> {
    config.validate()?;
    info!(
        env = config.environment.as_str(),
        runtime = runtime.as_str(),
        project_id = %config.project_id().unwrap_or_default(),
        location = %config.location,
        "starting car-svc"
    );

    let loader = SchemaLoader::load(config.schema_dir.as_deref())?;
    info!(schemas = loader.len(), "schemas loaded");
    let validator = Arc::new(SchemaValidator::new(loader));

    let store = open_store(&config).await?;
    let state = AppState::new(
        store,
        validator,
        HttpServerConfig::from_service(&config, runtime),
    );
    HttpServer::new(state).start().await?;
    Ok(())
}

pub async fn migrate(config: ServiceConfig) -> CliResult<()> {
    config.validate()?;
    if config.store == StoreKind::Memory {
        info!("memory store has no schema to migrate");
        return Ok(());
    }
    let store = PostgresCarStore::from_config(&config.postgres_config()?).await?;
    let migrated = store.migrate().await;
    store.close().await;
    migrated?;
    info!("car table migrated");
    Ok(())
}

/// Opens the configured store
pub async fn open_store(config: &ServiceConfig) -> CliResult<Arc<dyn CarStore>> {
    let store: Arc<dyn CarStore> = match config.store {
        StoreKind::Memory => MemoryCarStore::new_shared(),
        StoreKind::Postgres => {
            Arc::new(PostgresCarStore::from_config(&config.postgres_config()?).await?)
        }
    };
    info!(backend = store.backend(), "store ready");
    Ok(store)
}
