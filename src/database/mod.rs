/// Database connection management
///
/// Opens the SQLite pool backing the structure store and makes sure the
/// schema exists before the pool is handed out.

use crate::config::DatabaseConfig;
use crate::structure::StructureService;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Connect to the configured database, creating the file and its directory if missing
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| anyhow::anyhow!("Invalid database URL '{}': {}", config.url, e))?
        .create_if_missing(true)
        .foreign_keys(true);

    if let Some(dir) = options.get_filename().parent() {
        if !dir.as_os_str().is_empty() {
            tracing::info!("📁 Ensuring database directory exists: {}", dir.display());
            std::fs::create_dir_all(dir).map_err(|e| {
                anyhow::anyhow!("Failed to create database directory '{}': {}", dir.display(), e)
            })?;
        }
    }

    tracing::info!("🗄️ Opening structure database: {}", config.url);
    let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
    if config.url.contains(":memory:") {
        // An in-memory database lives only as long as its connection
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;

    Ok(pool)
}

/// Connect and initialize the structure schema
///
/// This is what the server uses at startup; the returned service is ready
/// for reads and writes.
pub async fn open_structure_service(config: &DatabaseConfig) -> Result<StructureService> {
    let pool = connect(config).await?;
    let service = StructureService::new(pool);
    service
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize structure schema: {}", e))?;

    tracing::info!("✅ Structure database ready");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_gets_schema() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let service = open_structure_service(&config).await.unwrap();
        assert!(service.is_empty().await.unwrap());
    }
}
