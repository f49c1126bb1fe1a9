//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default per-step execution timeout when neither the Task nor the Job
/// overrides it: 15 seconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 15_000;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity stamped into the `pid` field of claimed steps. Must be
    /// unique per worker process across the pool.
    pub worker_id: String,
    /// Path of the local document database.
    pub db_path: String,
    /// Port for the job submission HTTP server.
    pub http_port: u16,
    /// Interval between job poll sweeps.
    pub poll_interval: Duration,
    /// Fallback step timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Optional directory of runner definition files loaded at startup.
    pub runner_dir: Option<PathBuf>,
    /// Cap on back-to-back dispatch passes per job per observation.
    pub max_passes_per_observation: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            db_path: "./data/conveyor.db".to_string(),
            http_port: 8080,
            poll_interval: Duration::from_secs(5),
            default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            runner_dir: None,
            max_passes_per_observation: 16,
        }
    }
}

impl EngineConfig {
    /// Build configuration from `CONVEYOR_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("CONVEYOR_WORKER_ID") {
            config.worker_id = id;
        }
        if let Ok(path) = std::env::var("CONVEYOR_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(port) = std::env::var("CONVEYOR_HTTP_PORT") {
            config.http_port = port.parse().map_err(|e| ConfigError::InvalidValue {
                key: "CONVEYOR_HTTP_PORT".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Ok(secs) = std::env::var("CONVEYOR_POLL_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                key: "CONVEYOR_POLL_INTERVAL_SECS".to_string(),
                message: format!("{e}"),
            })?;
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Ok(ms) = std::env::var("CONVEYOR_DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = ms.parse().map_err(|e| ConfigError::InvalidValue {
                key: "CONVEYOR_DEFAULT_TIMEOUT_MS".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Ok(dir) = std::env::var("CONVEYOR_RUNNER_DIR") {
            config.runner_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

/// Derive a worker identity from hostname + OS pid + a random suffix.
///
/// The random suffix keeps identities distinct when two workers on the
/// same host recycle a pid between poll cycles.
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!(
        "{host}-{}-{:04x}",
        std::process::id(),
        rand::random::<u16>()
    )
}
