/// Server setup and initialization
///
/// Wires together all components: database, structure service, adapter
/// registry, workflow IO and HTTP routes. Provides the application factory
/// used by `main` and by the HTTP tests.

use crate::{
    adapters::{AdapterDispatcher, AdapterRegistry},
    api::{create_api_routes, AppState},
    config::{Config, PrepopulationConfig},
    database,
    runtime::WorkflowIo,
    structure::{CompleteStructure, StructureService},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with no adapters registered
///
/// Browse, structure and resolve endpoints work without adapters; loading
/// inputs needs `create_app_with_adapters`.
pub async fn create_app(config: Config) -> Result<Router> {
    create_app_with_adapters(config, Arc::new(AdapterRegistry::new())).await
}

/// Create the main Axum application around an adapter registry
///
/// Opens the database, applies the startup structure if one is configured
/// and builds the HTTP router.
pub async fn create_app_with_adapters(
    config: Config,
    adapters: Arc<AdapterRegistry>,
) -> Result<Router> {
    tracing::info!("🏗️ Initializing structure service");
    let structure = database::open_structure_service(&config.database).await?;

    prepopulate(&structure, &config.prepopulation).await?;

    tracing::info!("🔌 Adapters available: {:?}", adapters.adapter_keys());
    let io = WorkflowIo::new(structure.clone(), AdapterDispatcher::new(adapters));
    let app_state = AppState { structure, io };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Apply the configured startup structure, if any
async fn prepopulate(service: &StructureService, config: &PrepopulationConfig) -> Result<()> {
    let Some(path) = config.structure_file.as_deref() else {
        return Ok(());
    };

    tracing::info!("📥 Prepopulating structure from {} (overwrite: {})", path, config.overwrite);
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read structure file '{}': {}", path, e))?;
    let structure: CompleteStructure = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid structure file '{}': {}", path, e))?;

    service
        .update_structure(&structure, config.overwrite)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepopulate structure: {}", e))?;

    Ok(())
}

/// Start the HTTP server with the given configuration
///
/// Installs the global tracing subscriber, so call it once per process.
/// Runs until the listener fails.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting virtual structure server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn prepopulates_from_file() {
        let path = std::env::temp_dir().join(format!("vst-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, include_str!("../tests/data/waterworks_structure.json"))
            .await
            .unwrap();

        let mut config = Config::in_memory();
        let service = database::open_structure_service(&config.database).await.unwrap();
        config.prepopulation = PrepopulationConfig {
            structure_file: Some(path.to_string_lossy().into_owned()),
            overwrite: true,
        };

        prepopulate(&service, &config.prepopulation).await.unwrap();
        let stored = service.load_structure().await.unwrap();
        assert_eq!(stored.thing_nodes().len(), 7);

        // Upserting the same document again keeps the store as it was
        config.prepopulation.overwrite = false;
        prepopulate(&service, &config.prepopulation).await.unwrap();
        assert_eq!(service.load_structure().await.unwrap().thing_nodes().len(), 7);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_structure_file_fails_startup() {
        let service = database::open_structure_service(&Config::in_memory().database)
            .await
            .unwrap();
        let config = PrepopulationConfig {
            structure_file: Some("/nonexistent/structure.json".to_string()),
            overwrite: false,
        };
        assert!(prepopulate(&service, &config).await.is_err());
    }
}
