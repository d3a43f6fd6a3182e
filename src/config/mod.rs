/// Configuration management for the structure service
///
/// Handles server binding, the structure database and startup prepopulation.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Structure loaded at startup
    pub prepopulation: PrepopulationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite database holding the structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (default: "sqlite://data/structure.db")
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

/// Optional structure document applied when the server starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepopulationConfig {
    /// Path to a JSON structure document; nothing is loaded when unset
    pub structure_file: Option<String>,
    /// Replace the stored structure instead of upserting into it
    pub overwrite: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("VST_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("VST_PORT")
                    .unwrap_or_else(|_| "8090".to_string())
                    .parse()
                    .unwrap_or(8090),
            },
            database: DatabaseConfig {
                url: std::env::var("VST_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/structure.db".to_string()),
                max_connections: std::env::var("VST_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            },
            prepopulation: PrepopulationConfig {
                structure_file: std::env::var("VST_PREPOPULATE_FILE")
                    .ok()
                    .filter(|path| !path.trim().is_empty()),
                overwrite: std::env::var("VST_OVERWRITE_ON_PREPOPULATE")
                    .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
            },
        }
    }
}

impl Config {
    /// In-memory configuration for tests and embedding
    pub fn in_memory() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            prepopulation: PrepopulationConfig::default(),
        }
    }
}
