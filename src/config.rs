//! Application configuration loaded from environment variables.
//!
//! Everything has a sensible local-development default; only the Firestore
//! backend requires an explicit project id.

use std::env;

/// Which storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store backed by dashmap. Local development and tests.
    Memory,
    /// Google Cloud Firestore (or its emulator).
    Firestore,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// GCP project ID (Firestore backend)
    pub gcp_project_id: String,
    /// Storage backend selector
    pub store_backend: StoreBackend,
    /// Bounded capacity of the in-process event queue
    pub queue_capacity: usize,
    /// Number of detection workers draining the queue
    pub worker_count: usize,
    /// Upper bound on any single storage call, in seconds
    pub store_timeout_secs: u64,
    /// Radius used when a geofence area cannot be parsed, in meters
    pub default_geofence_radius_m: f64,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            port: 8080,
            gcp_project_id: "test-project".to_string(),
            store_backend: StoreBackend::Memory,
            queue_capacity: 16,
            worker_count: 1,
            store_timeout_secs: 10,
            default_geofence_radius_m: 150.0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = match env::var("STORE").as_deref() {
            Ok("firestore") => StoreBackend::Firestore,
            Ok("memory") | Err(_) => StoreBackend::Memory,
            Ok(other) => return Err(ConfigError::Invalid("STORE", other.to_string())),
        };

        let gcp_project_id = match store_backend {
            // The Firestore client refuses to guess a project.
            StoreBackend::Firestore => {
                env::var("GCP_PROJECT_ID").map_err(|_| ConfigError::Missing("GCP_PROJECT_ID"))?
            }
            StoreBackend::Memory => {
                env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string())
            }
        };

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            gcp_project_id,
            store_backend,
            queue_capacity: parse_or("QUEUE_CAPACITY", 1024),
            worker_count: parse_or("WORKER_COUNT", 4),
            store_timeout_secs: parse_or("STORE_TIMEOUT_SECS", 10),
            default_geofence_radius_m: parse_or("DEFAULT_GEOFENCE_RADIUS_M", 150.0),
        })
    }
}

/// Read an env var and parse it, falling back to `default` when unset or
/// unparseable.
fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the STORE variable is not mutated from two threads.
    #[test]
    fn test_config_from_env() {
        env::set_var("STORE", "cockroach");
        let err = Config::from_env().expect_err("unknown backend must fail");
        assert!(matches!(err, ConfigError::Invalid("STORE", _)));

        env::remove_var("STORE");
        env::remove_var("PORT");
        env::remove_var("QUEUE_CAPACITY");

        let config = Config::from_env().expect("Config should load");
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.worker_count, 4);
    }
}
