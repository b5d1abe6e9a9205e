//! Node configuration loading
//!
//! Priority: environment variables > config file > defaults. The file is
//! TOML with the same layout as [`NodeConfig`]; every key is optional.

use glome_core::NodeConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Config file path, when `--config` is not given
pub const CONFIG_ENV: &str = "GLOME_CONFIG";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`NodeConfig`]
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An override variable holds an unparsable value
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    /// The merged configuration failed validation
    #[error(transparent)]
    Invalid(#[from] glome_core::Error),
}

/// Load configuration from the process environment and an optional file
pub fn load(path: Option<&Path>) -> Result<NodeConfig, ConfigError> {
    load_with(path, |var| std::env::var(var).ok())
}

/// Load configuration, reading variables through `env`
pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<NodeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

    let mut config = match &path {
        Some(path) => from_file(path)?,
        None => NodeConfig::default(),
    };
    apply_env(&mut config, &env)?;
    config.validate()?;
    Ok(config)
}

/// Parse a config file
pub fn from_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Loaded configuration from {:?}", path);
    Ok(config)
}

fn apply_env<F>(config: &mut NodeConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(enabled) = env_bool(env, "GLOME_BATCHING")? {
        config.batch.enabled = enabled;
    }
    if let Some(tick) = env_parse(env, "GLOME_BATCH_TICK_MS")? {
        config.batch.tick_ms = tick;
    }
    if let Some(min_batch) = env_parse(env, "GLOME_BATCH_MIN")? {
        config.batch.min_batch = min_batch;
    }
    if let Some(debounce) = env_parse(env, "GLOME_BATCH_DEBOUNCE_MS")? {
        config.batch.debounce_ms = debounce;
    }
    if let Some(timeout) = env_parse(env, "GLOME_GOSSIP_TIMEOUT_MS")? {
        config.gossip.rpc_timeout_ms = timeout;
    }
    if let Some(store) = env("GLOME_COUNTER_STORE") {
        config.counter.store = store;
    }
    if let Some(heartbeat) = env_parse(env, "GLOME_COUNTER_HEARTBEAT_MS")? {
        config.counter.heartbeat_ms = heartbeat;
    }
    Ok(())
}

fn env_parse<F, T>(env: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match env(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}

fn env_bool<F>(env: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(var) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { var, value }),
        },
        None => Ok(None),
    }
}
