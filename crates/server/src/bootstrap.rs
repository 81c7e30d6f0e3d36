use std::sync::Arc;

use ladder_core::config::{AppConfig, ConfigError, LoadOptions};
use ladder_core::errors::ValidationError;
use ladder_core::hierarchy::HierarchyManager;
use ladder_db::{
    connect_with_settings, migrations, DbPool, SqlHierarchyRepository, SqlRequestRepository,
};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::service::ApprovalService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ApprovalService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("hierarchy defaults are invalid: {0}")]
    Hierarchy(#[source] ValidationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let manager =
        HierarchyManager::new(config.workflow.skeleton_levels).map_err(BootstrapError::Hierarchy)?;
    let service = Arc::new(ApprovalService::new(
        Arc::new(SqlHierarchyRepository::new(db_pool.clone())),
        Arc::new(SqlRequestRepository::new(db_pool.clone())),
        manager,
        Arc::new(TracingAuditSink),
    ));

    Ok(Application { config, db_pool, service })
}
