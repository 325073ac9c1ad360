use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
pub const DEFAULT_MIN_IDLE: u32 = 0;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Persisted record of a registered driver module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Surrogate key; 0 until the descriptor has been persisted.
    pub id: i64,
    pub name: String,
    pub module_path: PathBuf,
    pub implementation_id: String,
    /// Lower-case hex SHA-256 of the module file.
    pub content_hash: String,
    pub dependency_paths: Vec<PathBuf>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl DriverDescriptor {
    pub fn new(
        name: impl Into<String>,
        module_path: impl Into<PathBuf>,
        implementation_id: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            module_path: module_path.into(),
            implementation_id: implementation_id.into(),
            content_hash: content_hash.into(),
            dependency_paths: Vec::new(),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

/// Persisted connection settings of a data source, bound to one driver.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub id: i64,
    pub name: String,
    pub target: String,
    /// Encrypted by the credential collaborator; opaque here.
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver_id: i64,
    pub max_pool_size: u32,
    pub min_idle: u32,
    pub connection_timeout_ms: u64,
}

impl DataSourceDescriptor {
    pub fn new(name: impl Into<String>, target: impl Into<String>, driver_id: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            target: target.into(),
            username: None,
            password: None,
            driver_id,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_idle: DEFAULT_MIN_IDLE,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for DataSourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("target", &self.target)
            .field("driver_id", &self.driver_id)
            .field("max_pool_size", &self.max_pool_size)
            .field("min_idle", &self.min_idle)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .finish_non_exhaustive()
    }
}
