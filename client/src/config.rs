//! Configuration management for the device agent.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tillsync_engine::{default_catalog, schema_from_json, BackoffPolicy, Schema};

/// Largest push batch the server accepts.
pub const MAX_PUSH_BATCH: usize = 500;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the sync server
    pub server_url: String,
    /// Tenants signed in on this device
    pub tenant_ids: Vec<String>,
    /// Directory holding the replica snapshot
    pub data_dir: PathBuf,
    /// Address of the local status surface
    pub status_addr: String,
    /// Bearer token presented to the server
    pub auth_token: Option<String>,
    pub sync: SyncSettings,
    pub schema: Schema,
}

/// Knobs of the sync cycle.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Time between scheduled cycles
    pub interval: Duration,
    /// Changes sent per push request
    pub batch_size: usize,
    /// Changes requested per pull page
    pub pull_limit: usize,
    /// Delay schedule after failed cycles, and the attempt budget per change
    pub backoff: BackoffPolicy,
    /// Synced tombstones older than this are purged after a cycle
    pub tombstone_retention: Duration,
    /// Upper bound for one request to the server
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 50,
            pull_limit: 200,
            backoff: BackoffPolicy::default(),
            tombstone_retention: Duration::from_secs(7 * 24 * 3600),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = env::var("SYNC_SERVER_URL")
            .map_err(|_| ConfigError::MissingServerUrl)?
            .trim_end_matches('/')
            .to_string();

        let tenant_ids: Vec<String> = env::var("TENANT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let status_addr = env::var("STATUS_ADDR").unwrap_or_else(|_| "127.0.0.1:4600".to_string());

        let auth_token = env::var("SYNC_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let defaults = SyncSettings::default();
        let default_policy = defaults.backoff;
        let backoff = BackoffPolicy::new(
            Duration::from_millis(parse_var(
                "SYNC_BACKOFF_INITIAL_MS",
                default_policy.initial.as_millis() as u64,
            )?),
            Duration::from_millis(parse_var(
                "SYNC_BACKOFF_MAX_MS",
                default_policy.max.as_millis() as u64,
            )?),
        )
        .with_max_attempts(parse_var("SYNC_MAX_ATTEMPTS", default_policy.max_attempts)?);

        let sync = SyncSettings {
            interval: Duration::from_secs(parse_var(
                "SYNC_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            batch_size: push_batch_size(parse_var("SYNC_BATCH_SIZE", defaults.batch_size)?),
            pull_limit: parse_var("SYNC_PULL_LIMIT", defaults.pull_limit)?,
            backoff,
            tombstone_retention: Duration::from_secs(
                parse_var::<u64>("SYNC_TOMBSTONE_RETENTION_HOURS", 7 * 24)? * 3600,
            ),
            request_timeout: Duration::from_secs(parse_var(
                "SYNC_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        };

        if sync.batch_size == 0 || sync.pull_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "SYNC_BATCH_SIZE/SYNC_PULL_LIMIT",
                value: "0".to_string(),
            });
        }

        let schema = match env::var("SYNC_SCHEMA_PATH") {
            Ok(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| ConfigError::InvalidSchema {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                schema_from_json(&json).map_err(|e| ConfigError::InvalidSchema {
                    path,
                    reason: e.to_string(),
                })?
            }
            Err(_) => default_catalog(),
        };

        Ok(Self {
            server_url,
            tenant_ids,
            data_dir,
            status_addr,
            auth_token,
            sync,
            schema,
        })
    }

    /// Path of the replica snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("replica.json")
    }
}

fn push_batch_size(requested: usize) -> usize {
    if requested > MAX_PUSH_BATCH {
        tracing::warn!(
            requested,
            max = MAX_PUSH_BATCH,
            "SYNC_BATCH_SIZE above the server limit, clamping"
        );
    }
    requested.min(MAX_PUSH_BATCH)
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SYNC_SERVER_URL environment variable is required")]
    MissingServerUrl,

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid schema file {path}: {reason}")]
    InvalidSchema { path: String, reason: String },
}
