use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KMeansError, Result};
use crate::source::{AccessPolicy, ConnectionParams};

/// Configuration for a single clustering run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KMeansConfig {
    /// Number of clusters
    pub k: usize,

    /// Maximum number of assignment passes before giving up on convergence
    pub max_iters: usize,

    /// Random seed for centroid initialization.
    /// `None` draws a fresh seed from the operating system for every run.
    pub seed: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iters: 100,
            seed: None,
        }
    }
}

impl KMeansConfig {
    /// Create a new configuration with the specified number of clusters
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    /// Set the maximum number of iterations
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set or clear the random seed
    pub fn with_optional_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// Listening socket of the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Where tables are read from and models are written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the CSV source: one directory per database
    pub data_dir: PathBuf,

    /// Directory holding the `.dat` model files (created on demand)
    pub models_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub max_iters: usize,
    pub seed: Option<u64>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let defaults = KMeansConfig::default();
        Self {
            max_iters: defaults.max_iters,
            seed: defaults.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Full configuration of the clustering server.
///
/// Every section and key is optional; omitted values fall back to their
/// defaults.
///
/// ```toml
/// [server]
/// bind_address = "0.0.0.0"
/// port = 8080
///
/// [storage]
/// data_dir = "data"
/// models_dir = "models"
///
/// [database]
/// database = "MapDB"
/// user = "MapUser"
/// password = "map"
///
/// [clustering]
/// max_iters = 100
///
/// [users]
/// MapUser = "map"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: NetworkConfig,
    pub storage: StorageConfig,

    /// Connection parameters every new session starts with
    pub database: ConnectionParams,

    pub clustering: ClusteringConfig,
    pub logging: LoggingConfig,

    /// Accepted user/password pairs (user names match case-insensitively);
    /// empty disables access checks
    pub users: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: NetworkConfig::default(),
            storage: StorageConfig::default(),
            database: ConnectionParams::new("MapDB", "MapUser", "map"),
            clustering: ClusteringConfig::default(),
            logging: LoggingConfig::default(),
            users: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// Sources are layered in order:
    /// 1. `path` if given, otherwise `kmeans-server.toml` in the working
    ///    directory when it exists
    /// 2. Environment variables with the `KMEANS_` prefix, nested keys
    ///    separated by `__` (e.g. `KMEANS_SERVER__PORT=9000`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("kmeans-server").required(false),
        };

        let builder = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("KMEANS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)
            .map_err(|e| KMeansError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clustering.max_iters == 0 {
            return Err(KMeansError::InvalidConfig(
                "clustering.max_iters must be greater than 0".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(KMeansError::InvalidConfig(
                "server.port must be greater than 0".into(),
            ));
        }
        if self.server.bind_address.is_empty() {
            return Err(KMeansError::InvalidConfig(
                "server.bind_address must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// `address:port` to listen on.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Clustering configuration for a run with `k` clusters.
    pub fn kmeans_config(&self, k: usize) -> KMeansConfig {
        KMeansConfig::new(k)
            .with_max_iters(self.clustering.max_iters)
            .with_optional_seed(self.clustering.seed)
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmeans_config_builders() {
        let config = KMeansConfig::new(3).with_max_iters(10).with_seed(42);
        assert_eq!(config.k, 3);
        assert_eq!(config.max_iters, 10);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.with_optional_seed(None).seed, None);
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address(), "127.0.0.1:8080");
        assert_eq!(config.storage.models_dir, PathBuf::from("models"));
        assert_eq!(config.clustering.max_iters, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.users.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.server, NetworkConfig::default());
        assert_eq!(config.database, ConnectionParams::new("MapDB", "MapUser", "map"));
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [database]
            user = "analyst"

            [clustering]
            seed = 7

            [users]
            analyst = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.database.user, "analyst");
        assert_eq!(config.clustering.seed, Some(7));
        assert_eq!(config.clustering.max_iters, 100);
        assert_eq!(config.users.get("analyst").map(String::as_str), Some("secret"));

        let run = config.kmeans_config(4);
        assert_eq!(run.k, 4);
        assert_eq!(run.seed, Some(7));
    }

    #[test]
    fn test_validation_rejects_zero_iterations() {
        let result = ServerConfig::from_toml_str("[clustering]\nmax_iters = 0\n");
        assert!(matches!(result, Err(KMeansError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let result = ServerConfig::from_toml_str("[server]\nport = 0\n");
        assert!(matches!(result, Err(KMeansError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = ServerConfig::from_toml_str("[server\nport = ");
        assert!(matches!(result, Err(KMeansError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[storage]\nmodels_dir = \"/tmp/kmeans-models\"\n").unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.storage.models_dir, PathBuf::from("/tmp/kmeans-models"));
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_load_mixed_case_user_accepts_default_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[users]\nMapUser = \"map\"\n").unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.users.len(), 1);
        assert!(config.access_policy().check(&config.database).is_ok());

        let wrong = ConnectionParams::new("MapDB", "MapUser", "nope");
        assert!(config.access_policy().check(&wrong).is_err());
    }
}
