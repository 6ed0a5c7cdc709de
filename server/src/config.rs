//! Configuration management for the server.

use std::env;
use tillsync_engine::{default_catalog, schema_from_json, Schema};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Upper bound of the connection pool
    pub max_connections: u32,
    /// Shared secret devices present as their bearer token
    pub auth_secret: Option<String>,
    /// Tables accepted by push and pull
    pub schema: Schema,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidMaxConnections)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let schema = match env::var("SCHEMA_PATH") {
            Ok(path) => load_schema(&path)?,
            Err(_) => default_catalog(),
        };

        Ok(Self {
            host,
            port,
            database_url,
            max_connections,
            auth_secret,
            schema,
        })
    }
}

fn load_schema(path: &str) -> Result<Schema, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidSchema {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    schema_from_json(&json).map_err(|e| ConfigError::InvalidSchema {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid DATABASE_MAX_CONNECTIONS value")]
    InvalidMaxConnections,

    #[error("Invalid schema file {path}: {reason}")]
    InvalidSchema { path: String, reason: String },
}
