use std::path::Path;
use std::time::Duration;

use fleet_core::config_merge::{validate_override, MergeOptions};
use serde_json::Value;

/// Default delay between registration attempts and completion retries.
pub const DEFAULT_REGISTER_RETRY_SECS: u64 = 5;

/// Default number of steps the simulated executor runs per job.
pub const DEFAULT_SIM_STEPS: u32 = 10;

/// Default duration of one simulated step.
pub const DEFAULT_SIM_STEP_MILLIS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Failed to load base config from {path}: {reason}")]
    BaseConfig { path: String, reason: String },
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Controller root URL, e.g. `http://controller:3000`.
    pub controller_url: String,
    /// Address the command server binds to.
    pub listen_host: String,
    pub listen_port: u16,
    /// Hostname the controller uses to reach this agent.
    pub advertise_host: String,
    /// Local base configuration every job's override is merged onto.
    pub base_config: Value,
    /// Array paths concatenated rather than replaced during the merge.
    pub merge_options: MergeOptions,
    pub register_retry: Duration,
    pub sim_steps: u32,
    pub sim_step: Duration,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var               | Default                          |
    /// |-----------------------|----------------------------------|
    /// | `CONTROLLER_URL`      | required                         |
    /// | `AGENT_HOST`          | `0.0.0.0`                        |
    /// | `AGENT_PORT`          | `8081`                           |
    /// | `ADVERTISE_HOST`      | `HOSTNAME`, else `localhost`     |
    /// | `BASE_CONFIG_PATH`    | unset (base config is `{}`)      |
    /// | `APPEND_PATHS`        | unset (arrays are replaced)      |
    /// | `REGISTER_RETRY_SECS` | `5`                              |
    /// | `SIM_STEPS`           | `10`                             |
    /// | `SIM_STEP_MILLIS`     | `1000`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        let controller_url = std::env::var("CONTROLLER_URL")
            .map_err(|_| ConfigError::Missing("CONTROLLER_URL"))?
            .trim_end_matches('/')
            .to_string();

        let listen_host = std::env::var("AGENT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let listen_port = parse_env("AGENT_PORT", 8081u16)?;

        let advertise_host = std::env::var("ADVERTISE_HOST")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".into());

        let base_config = match std::env::var("BASE_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => load_base_config(Path::new(&path))?,
            _ => Value::Object(Default::default()),
        };

        let merge_options = std::env::var("APPEND_PATHS")
            .map(|raw| parse_append_paths(&raw))
            .unwrap_or_default();

        let register_retry =
            Duration::from_secs(parse_env("REGISTER_RETRY_SECS", DEFAULT_REGISTER_RETRY_SECS)?);
        let sim_steps = parse_env("SIM_STEPS", DEFAULT_SIM_STEPS)?;
        let sim_step = Duration::from_millis(parse_env("SIM_STEP_MILLIS", DEFAULT_SIM_STEP_MILLIS)?);

        Ok(Self {
            controller_url,
            listen_host,
            listen_port,
            advertise_host,
            base_config,
            merge_options,
            register_retry,
            sim_steps,
            sim_step,
        })
    }
}

/// Read the local base configuration. It must be a JSON object.
pub fn load_base_config(path: &Path) -> Result<Value, ConfigError> {
    let error = |reason: String| ConfigError::BaseConfig {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
    let doc: Value = serde_json::from_str(&raw).map_err(|e| error(e.to_string()))?;
    validate_override(&doc).map_err(|e| error(e.to_string()))?;
    Ok(doc)
}

/// Parse a comma-separated list of dotted key paths, e.g.
/// `llm.stop_sequences,tools`. Blank entries are ignored.
pub fn parse_append_paths(raw: &str) -> MergeOptions {
    MergeOptions::appending(
        raw.split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty()),
    )
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
