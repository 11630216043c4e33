//! Server configuration: environment-driven defaults, plus an optional
//! JSON file override for local development.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level server configuration. Networking/cluster/log knobs live here;
/// storage-layer tuning is carried in the nested [`hetu_store::StoreConfig`]
/// and executor tuning in the nested [`hetu_runtime::ExecConfig`] so each
/// crate still owns its own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HetuConfig {
    pub listen: SocketAddr,
    /// Reserved for a future clustered backend; unused today.
    pub backend_url: Option<String>,
    pub cluster: String,
    pub log_level: String,
    pub max_retries: u32,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub initial_table_capacity: usize,
    pub call_deadline_ms: u64,
    pub worker_pool_size: usize,
    pub persistence_interval_ticks: u32,
    pub persistence_retry_delay_ms: u64,
}

impl Default for HetuConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2466".parse().expect("valid default listen address"),
            backend_url: None,
            cluster: "default".to_string(),
            log_level: "info".to_string(),
            max_retries: 3,
            data_dir: PathBuf::from("./data"),
            max_connections: 10_000,
            initial_table_capacity: 1024,
            call_deadline_ms: 5_000,
            worker_pool_size: 0,
            persistence_interval_ticks: 10,
            persistence_retry_delay_ms: 100,
        }
    }
}

impl HetuConfig {
    /// Loads config from environment variables, then overlays a JSON file
    /// at `path` if one is given. Env vars set the baseline so a bare
    /// `hetu-server start` in a container still picks up `HETU_*` without
    /// a config file on disk.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env()?;
        if let Some(path) = path {
            config.merge_file(path)?;
        }
        Ok(config)
    }

    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = env::var("HETU_LISTEN") {
            config.listen = v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: "HETU_LISTEN",
                value: v,
            })?;
        }
        if let Ok(v) = env::var("HETU_BACKEND_URL") {
            config.backend_url = Some(v);
        }
        if let Ok(v) = env::var("HETU_CLUSTER") {
            config.cluster = v;
        }
        if let Ok(v) = env::var("HETU_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = env::var("HETU_MAX_RETRIES") {
            config.max_retries = v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: "HETU_MAX_RETRIES",
                value: v,
            })?;
        }

        Ok(config)
    }

    /// Overlays fields present in the JSON file at `path`, leaving
    /// unspecified fields at their env/default value. Missing keys are not
    /// an error; an unparseable file is.
    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let overrides: PartialConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseFile {
                path: path.to_path_buf(),
                source,
            })?;
        overrides.apply_to(self);
        Ok(())
    }

    /// Derives the level `tracing-subscriber` should filter at, falling
    /// back to `INFO` for a value it doesn't recognize rather than failing
    /// startup over a typo'd log level.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}

/// Every field optional, for overlaying a partial JSON config file onto the
/// env-derived baseline without requiring the file to restate everything.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    listen: Option<SocketAddr>,
    backend_url: Option<String>,
    cluster: Option<String>,
    log_level: Option<String>,
    max_retries: Option<u32>,
    data_dir: Option<PathBuf>,
    max_connections: Option<usize>,
    initial_table_capacity: Option<usize>,
    call_deadline_ms: Option<u64>,
    worker_pool_size: Option<usize>,
    persistence_interval_ticks: Option<u32>,
    persistence_retry_delay_ms: Option<u64>,
}

impl PartialConfig {
    fn apply_to(self, config: &mut HetuConfig) {
        if let Some(v) = self.listen {
            config.listen = v;
        }
        if self.backend_url.is_some() {
            config.backend_url = self.backend_url;
        }
        if let Some(v) = self.cluster {
            config.cluster = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.max_connections {
            config.max_connections = v;
        }
        if let Some(v) = self.initial_table_capacity {
            config.initial_table_capacity = v;
        }
        if let Some(v) = self.call_deadline_ms {
            config.call_deadline_ms = v;
        }
        if let Some(v) = self.worker_pool_size {
            config.worker_pool_size = v;
        }
        if let Some(v) = self.persistence_interval_ticks {
            config.persistence_interval_ticks = v;
        }
        if let Some(v) = self.persistence_retry_delay_ms {
            config.persistence_retry_delay_ms = v;
        }
    }
}

/// Errors while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidEnvVar { var: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_env_or_file() {
        let config = HetuConfig::default();
        assert_eq!(config.cluster, "default");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn merge_file_overlays_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cluster": "staging", "max_retries": 7}"#).unwrap();

        let mut config = HetuConfig::default();
        config.merge_file(&path).unwrap();
        assert_eq!(config.cluster, "staging");
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.listen, HetuConfig::default().listen);
    }
}
