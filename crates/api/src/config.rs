use std::time::Duration;

use fleet_core::worker_pool::{
    LivenessPolicy, DEFAULT_EVICTION_THRESHOLD_SECS, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_STALE_THRESHOLD_SECS,
};

/// Default interval between assignment passes when nothing wakes the
/// coordinator earlier.
pub const DEFAULT_ASSIGN_INTERVAL_SECS: u64 = 5;

/// Default timeout for a single controller → worker command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background tasks to stop after the server drains
    /// (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Heartbeat interval, stale and eviction thresholds, sweep interval.
    pub liveness: LivenessPolicy,
    /// Assignment poll interval in seconds (default: `5`).
    pub assign_interval_secs: u64,
    /// Per-command timeout for calls to worker agents (default: `10`).
    pub command_timeout_secs: u64,
    /// JSON file of named profiles. No profiles are available when unset.
    pub profiles_path: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                    |
    /// |----------------------------|----------------------------|
    /// | `HOST`                     | `0.0.0.0`                  |
    /// | `PORT`                     | `3000`                     |
    /// | `CORS_ORIGINS`             | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                       |
    /// | `HEARTBEAT_INTERVAL_SECS`  | `15`                       |
    /// | `STALE_THRESHOLD_SECS`     | `90`                       |
    /// | `EVICTION_THRESHOLD_SECS`  | `86400`                    |
    /// | `SWEEP_INTERVAL_SECS`      | stale threshold / 3        |
    /// | `ASSIGN_INTERVAL_SECS`     | `5`                        |
    /// | `COMMAND_TIMEOUT_SECS`     | `10`                       |
    /// | `PROFILES_PATH`            | unset                      |
    ///
    /// Panics on unparsable values or inconsistent liveness thresholds;
    /// misconfiguration should fail at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = env_u64("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs = env_u64("SHUTDOWN_TIMEOUT_SECS", 30);

        let sweep_interval = std::env::var("SWEEP_INTERVAL_SECS").ok().map(|v| {
            Duration::from_secs(
                v.parse()
                    .expect("SWEEP_INTERVAL_SECS must be a valid u64"),
            )
        });
        let liveness = LivenessPolicy::new(
            Duration::from_secs(env_u64(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            Duration::from_secs(env_u64("STALE_THRESHOLD_SECS", DEFAULT_STALE_THRESHOLD_SECS)),
            Duration::from_secs(env_u64(
                "EVICTION_THRESHOLD_SECS",
                DEFAULT_EVICTION_THRESHOLD_SECS,
            )),
            sweep_interval,
        )
        .unwrap_or_else(|e| panic!("Invalid liveness configuration: {e}"));

        let assign_interval_secs = env_u64("ASSIGN_INTERVAL_SECS", DEFAULT_ASSIGN_INTERVAL_SECS);
        let command_timeout_secs = env_u64("COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS);

        let profiles_path = std::env::var("PROFILES_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            liveness,
            assign_interval_secs,
            command_timeout_secs,
            profiles_path,
        }
    }

    pub fn assign_interval(&self) -> Duration {
        Duration::from_secs(self.assign_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        Err(_) => default,
    }
}
