use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "DRIVER_ENGINE_";
const DEFAULT_APP_HOME: &str = "./drivers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyDriverConfig {
    pub implementation_id: String,
    pub coordinate: String,
}

impl FamilyDriverConfig {
    fn new(implementation_id: &str, coordinate: &str) -> Self {
        Self {
            implementation_id: implementation_id.to_string(),
            coordinate: coordinate.to_string(),
        }
    }
}

/// Driver used for automatic recovery of each well-known database family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub oracle: FamilyDriverConfig,
    pub mysql: FamilyDriverConfig,
    pub postgresql: FamilyDriverConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            oracle: FamilyDriverConfig::new(
                "oracle.jdbc.OracleDriver",
                "com.oracle.database.jdbc:ojdbc11:23.3.0.23.09",
            ),
            mysql: FamilyDriverConfig::new("com.mysql.cj.jdbc.Driver", "com.mysql:mysql-connector-j:8.3.0"),
            postgresql: FamilyDriverConfig::new("org.postgresql.Driver", "org.postgresql:postgresql:42.7.2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_home: PathBuf,
    pub database_path: PathBuf,
    pub drop_dir: PathBuf,
    /// Without leading dot; defaults to the platform's shared-library
    /// extension.
    pub module_extension: String,
    pub watcher_enabled: bool,
    pub scan_interval_ms: u64,
    pub settling_window_ms: u64,
    pub repository_url: Option<String>,
    pub resolver_cache_dir: PathBuf,
    pub http_timeout_ms: u64,
    pub connection_test_timeout_ms: u64,
    pub max_blocking_threads: usize,
    pub default_pool_size: u32,
    pub structured_logging: bool,
    pub recovery: RecoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_home(DEFAULT_APP_HOME)
    }
}

impl EngineConfig {
    /// Defaults with every path placed under `app_home`.
    pub fn with_home(app_home: impl Into<PathBuf>) -> Self {
        let app_home = app_home.into();
        Self {
            database_path: app_home.join("driver_engine.db"),
            drop_dir: app_home.join("lib"),
            resolver_cache_dir: app_home.join("artifact-cache"),
            app_home,
            module_extension: std::env::consts::DLL_EXTENSION.to_string(),
            watcher_enabled: true,
            scan_interval_ms: 1000,
            settling_window_ms: 2000,
            repository_url: None,
            http_timeout_ms: 30_000,
            connection_test_timeout_ms: 5000,
            max_blocking_threads: 16,
            default_pool_size: 10,
            structured_logging: true,
            recovery: RecoveryConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DriverError::ConfigError(e.to_string()))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Reads `DRIVER_ENGINE_*` variables on top of the defaults. Paths not
    /// set explicitly follow `DRIVER_ENGINE_HOME`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = match var("HOME") {
            Some(home) => Self::with_home(home),
            None => Self::default(),
        };

        if let Some(v) = var("DB_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = var("DROP_DIR") {
            config.drop_dir = PathBuf::from(v);
        }
        if let Some(v) = var("MODULE_EXTENSION") {
            config.module_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = var("WATCHER_ENABLED") {
            config.watcher_enabled = parse_flag("WATCHER_ENABLED", &v)?;
        }
        if let Some(v) = var("SCAN_INTERVAL_MS") {
            config.scan_interval_ms = parse_number("SCAN_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("SETTLING_WINDOW_MS") {
            config.settling_window_ms = parse_number("SETTLING_WINDOW_MS", &v)?;
        }
        if let Some(v) = var("REPOSITORY_URL") {
            config.repository_url = Some(v);
        }
        if let Some(v) = var("CACHE_DIR") {
            config.resolver_cache_dir = PathBuf::from(v);
        }
        if let Some(v) = var("HTTP_TIMEOUT_MS") {
            config.http_timeout_ms = parse_number("HTTP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("CONNECTION_TEST_TIMEOUT_MS") {
            config.connection_test_timeout_ms = parse_number("CONNECTION_TEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("MAX_BLOCKING_THREADS") {
            config.max_blocking_threads = parse_number("MAX_BLOCKING_THREADS", &v)?;
        }
        if let Some(v) = var("DEFAULT_POOL_SIZE") {
            config.default_pool_size = parse_number("DEFAULT_POOL_SIZE", &v)?;
        }
        if let Some(v) = var("STRUCTURED_LOGGING") {
            config.structured_logging = parse_flag("STRUCTURED_LOGGING", &v)?;
        }
        if let Some(v) = var("ORACLE_COORDINATE") {
            config.recovery.oracle.coordinate = v;
        }
        if let Some(v) = var("MYSQL_COORDINATE") {
            config.recovery.mysql.coordinate = v;
        }
        if let Some(v) = var("POSTGRESQL_COORDINATE") {
            config.recovery.postgresql.coordinate = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_ms == 0 {
            return Err(DriverError::ConfigError("scan interval must be positive".to_string()));
        }
        if self.connection_test_timeout_ms == 0 {
            return Err(DriverError::ConfigError(
                "connection test timeout must be positive".to_string(),
            ));
        }
        if self.max_blocking_threads == 0 {
            return Err(DriverError::ConfigError(
                "max blocking threads must be positive".to_string(),
            ));
        }
        if self.module_extension.is_empty() {
            return Err(DriverError::ConfigError("module extension is empty".to_string()));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn settling_window(&self) -> Duration {
        Duration::from_millis(self.settling_window_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn connection_test_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_test_timeout_ms)
    }
}

pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    parse_bool_flag(value).ok_or_else(|| {
        DriverError::ConfigError(format!("{}{}: invalid flag '{}'", ENV_PREFIX, name, value))
    })
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        DriverError::ConfigError(format!("{}{}: invalid number '{}'", ENV_PREFIX, name, value))
    })
}
