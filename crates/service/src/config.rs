//! Server configuration and profile catalog.
//!
//! Configuration loads from a YAML file when one exists, otherwise from
//! defaults, with `CAUSEWAY_SECTION__FIELD` environment variables applied
//! on top in both cases.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use validator::Validate;

// Default constants
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5888";
pub const DEFAULT_SERVER_NAME: &str = "Causeway Server";
pub const DEFAULT_GATE_ENABLED: bool = true;

pub const DEFAULT_CACHE_ENABLED: bool = true;
pub const DEFAULT_CACHE_EXPIRY_SECS: u64 = 10;

pub const DEFAULT_POOL_MAX_SIZE: usize = 200;
pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_POOL_QUEUE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_PROFILE: &str = "demo";

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    #[validate(nested)]
    pub worker_pool: WorkerPoolSettings,
    /// Profiles declared in the config file, merged over the built-ins.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileSettings>,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    #[validate(custom(function = "validate_listen_addr"))]
    pub listen_addr: String,
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Serialize data streaming for bridges that report not thread safe.
    #[serde(default = "default_gate_enabled")]
    pub gate_enabled: bool,
}

fn validate_listen_addr(addr: &str) -> std::result::Result<(), validator::ValidationError> {
    match addr.parse::<std::net::SocketAddr>() {
        Ok(_) => Ok(()),
        Err(_) => Err(validator::ValidationError::new("invalid_listen_addr")),
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            name: default_server_name(),
            gate_enabled: default_gate_enabled(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_gate_enabled() -> bool {
    DEFAULT_GATE_ENABLED
}

// Fragment cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Idle seconds after which a cached fragment list expires.
    #[serde(default = "default_cache_expiry_secs")]
    pub expiry_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            expiry_secs: default_cache_expiry_secs(),
        }
    }
}

fn default_cache_enabled() -> bool {
    DEFAULT_CACHE_ENABLED
}

fn default_cache_expiry_secs() -> u64 {
    DEFAULT_CACHE_EXPIRY_SECS
}

// Admission control for request handling
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct WorkerPoolSettings {
    /// A pool of zero slots would turn every request away.
    #[validate(range(min = 1))]
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    #[serde(default = "default_pool_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_pool_queue_timeout_secs")]
    pub queue_timeout_secs: u64,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            queue_capacity: default_pool_queue_capacity(),
            queue_timeout_secs: default_pool_queue_timeout_secs(),
        }
    }
}

fn default_pool_max_size() -> usize {
    DEFAULT_POOL_MAX_SIZE
}

fn default_pool_queue_capacity() -> usize {
    DEFAULT_POOL_QUEUE_CAPACITY
}

fn default_pool_queue_timeout_secs() -> u64 {
    DEFAULT_POOL_QUEUE_TIMEOUT_SECS
}

/// One named profile: the plugin set a request gets when it sends
/// `X-CW-OPTIONS-PROFILE` instead of naming plugins explicitly.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ProfileSettings {
    /// Protocol scheme, e.g. the `demo` in a `demo:text` profile.
    #[serde(default)]
    pub protocol: Option<String>,
    /// Optional protocol handler id consulted after parsing.
    #[serde(default)]
    pub handler: Option<String>,
    /// Plugin options injected into the request (`fragmenter`, `accessor`,
    /// `resolver`, or any other option key).
    #[serde(default)]
    pub plugins: HashMap<String, String>,
    /// Request option key -> configuration property key.
    #[serde(default)]
    pub option_mappings: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        // Allow starting without a config file if defaults/env vars are enough
        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // Map CAUSEWAY_SERVER__LISTEN_ADDR to server.listen_addr, etc.
        let builder = builder.add_source(
            config::Environment::with_prefix("CAUSEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}

/// Read access to profile definitions, as the request parser needs them.
pub trait PluginConf: Send + Sync {
    /// Plugin option keys and values the profile injects into the request.
    fn plugins(&self, profile: &str) -> Option<&HashMap<String, String>>;

    /// Request-option to configuration-property mappings for the profile.
    fn option_mappings(&self, profile: &str) -> Option<&HashMap<String, String>>;

    /// Protocol scheme of the profile, if it declares one.
    fn protocol(&self, profile: &str) -> Option<&str>;

    /// Protocol handler id of the profile, if it declares one.
    fn handler(&self, profile: &str) -> Option<&str>;
}

/// Profile definitions keyed by lowercased profile name.
///
/// The built-in `demo` profile is always present; file-declared profiles
/// are merged over it and may replace it wholesale.
#[derive(Debug, Default)]
pub struct ProfileCatalog {
    profiles: HashMap<String, ProfileSettings>,
}

impl ProfileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding only the built-in demo profile.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        let mut plugins = HashMap::new();
        plugins.insert("fragmenter".to_string(), "DemoFragmenter".to_string());
        plugins.insert("accessor".to_string(), "DemoAccessor".to_string());
        plugins.insert("resolver".to_string(), "DemoTextResolver".to_string());
        catalog.profiles.insert(
            DEFAULT_PROFILE.to_string(),
            ProfileSettings {
                protocol: Some("demo".to_string()),
                handler: None,
                plugins,
                option_mappings: HashMap::new(),
            },
        );
        catalog
    }

    /// Merge `profiles` into the catalog, replacing same-named entries.
    pub fn extend(&mut self, profiles: &HashMap<String, ProfileSettings>) {
        for (name, settings) in profiles {
            self.profiles
                .insert(name.to_lowercase(), settings.clone());
        }
    }

    /// Built-ins plus everything the config file declares.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut catalog = Self::with_defaults();
        catalog.extend(&config.profiles);
        catalog
    }

    fn get(&self, profile: &str) -> Option<&ProfileSettings> {
        self.profiles.get(&profile.to_lowercase())
    }
}

impl PluginConf for ProfileCatalog {
    fn plugins(&self, profile: &str) -> Option<&HashMap<String, String>> {
        self.get(profile).map(|p| &p.plugins)
    }

    fn option_mappings(&self, profile: &str) -> Option<&HashMap<String, String>> {
        self.get(profile).map(|p| &p.option_mappings)
    }

    fn protocol(&self, profile: &str) -> Option<&str> {
        self.get(profile).and_then(|p| p.protocol.as_deref())
    }

    fn handler(&self, profile: &str) -> Option<&str> {
        self.get(profile).and_then(|p| p.handler.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_app_config_parsing() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:5899"
  name: "Causeway Test"
cache:
  enabled: false
worker_pool:
  max_size: 16
  queue_capacity: 4
profiles:
  files:
    protocol: file
    plugins:
      fragmenter: FileFragmenter
      accessor: FileAccessor
      resolver: FileResolver
    option_mappings:
      compression: causeway.file.compression
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:5899");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.expiry_secs, DEFAULT_CACHE_EXPIRY_SECS);
        assert_eq!(config.worker_pool.max_size, 16);
        assert_eq!(config.worker_pool.queue_capacity, 4);
        assert_eq!(
            config.worker_pool.queue_timeout_secs,
            DEFAULT_POOL_QUEUE_TIMEOUT_SECS
        );

        let files = &config.profiles["files"];
        assert_eq!(files.protocol.as_deref(), Some("file"));
        assert_eq!(files.plugins["accessor"], "FileAccessor");
        assert_eq!(
            files.option_mappings["compression"],
            "causeway.file.compression"
        );
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::from_file("definitely_not_here.yaml").unwrap();
        assert_eq!(config.server.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.server.name, DEFAULT_SERVER_NAME);
        assert!(config.server.gate_enabled);
        assert!(config.cache.enabled);
        assert_eq!(config.worker_pool.max_size, DEFAULT_POOL_MAX_SIZE);
        assert!(config.profiles.is_empty());
    }

    #[test]
    #[serial]
    fn test_env_var_overrides() {
        std::env::set_var("CAUSEWAY_SERVER__LISTEN_ADDR", "1.2.3.4:9999");
        std::env::set_var("CAUSEWAY_CACHE__ENABLED", "false");
        std::env::set_var("CAUSEWAY_WORKER_POOL__MAX_SIZE", "7");
        std::env::set_var("CAUSEWAY_WORKER_POOL__QUEUE_TIMEOUT_SECS", "2");

        let config = AppConfig::from_file("definitely_not_here.yaml").unwrap();

        assert_eq!(config.server.listen_addr, "1.2.3.4:9999");
        assert!(!config.cache.enabled);
        assert_eq!(config.worker_pool.max_size, 7);
        assert_eq!(config.worker_pool.queue_timeout_secs, 2);

        std::env::remove_var("CAUSEWAY_SERVER__LISTEN_ADDR");
        std::env::remove_var("CAUSEWAY_CACHE__ENABLED");
        std::env::remove_var("CAUSEWAY_WORKER_POOL__MAX_SIZE");
        std::env::remove_var("CAUSEWAY_WORKER_POOL__QUEUE_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_config_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causeway.yaml");
        std::fs::write(
            &path,
            "server:\n  listen_addr: \"127.0.0.1:6001\"\nworker_pool:\n  max_size: 3\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:6001");
        assert_eq!(config.worker_pool.max_size, 3);
        // untouched sections keep their defaults
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_worker_pool_fails_validation() {
        let mut config = AppConfig::default();
        config.worker_pool.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_listen_addr_fails_validation() {
        let mut config = AppConfig::default();
        config.server.listen_addr = "not a socket".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_invalid_file_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causeway.yaml");
        std::fs::write(&path, "worker_pool:\n  max_size: 0\n").unwrap();

        let err = AppConfig::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn test_profile_catalog_lookup() {
        let catalog = ProfileCatalog::with_defaults();

        let plugins = catalog.plugins("demo").unwrap();
        assert_eq!(plugins["fragmenter"], "DemoFragmenter");
        assert_eq!(plugins["accessor"], "DemoAccessor");
        assert_eq!(plugins["resolver"], "DemoTextResolver");
        assert_eq!(catalog.protocol("demo"), Some("demo"));
        assert_eq!(catalog.handler("demo"), None);

        // profile names are case-insensitive
        assert!(catalog.plugins("DeMo").is_some());
        assert!(catalog.plugins("missing").is_none());
    }

    #[test]
    fn test_config_profiles_replace_builtins() {
        let yaml = r#"
profiles:
  Demo:
    plugins:
      accessor: OtherAccessor
      resolver: OtherResolver
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let catalog = ProfileCatalog::from_config(&config);

        let plugins = catalog.plugins("demo").unwrap();
        assert_eq!(plugins["accessor"], "OtherAccessor");
        // replacement is wholesale: the built-in fragmenter entry is gone
        assert!(!plugins.contains_key("fragmenter"));
        assert_eq!(catalog.protocol("demo"), None);
    }
}
