mod async_bridge;
pub mod config;
pub mod connectivity;
mod error;
pub mod module;
pub mod observability;
pub mod pool;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod service;
pub mod store;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;
pub mod watcher;

pub use async_bridge::{init_runtime, DEFAULT_MAX_BLOCKING_THREADS};
pub use config::EngineConfig;
pub use connectivity::{
    CancelToken, ConnectProperties, ConnectRequest, Connection, Driver, DriverManager,
    DriverVersion,
};
pub use error::{DriverError, ErrorCategory, Result};
pub use module::{DriverShim, LoadedModule, LoadingContext, ModuleLoader, NativeModuleLoader};
pub use pool::{DataSourcePool, DynamicPoolManager};
pub use probe::{ConnectionProbe, ConnectionTestResult, DatabaseFamily, DriverRecovery};
pub use registry::{BootstrapReport, DriverRegistry};
pub use resolver::{ArtifactResolver, Coordinate};
pub use security::{CredentialDecryptor, Credentials, PassthroughDecryptor, Secret};
pub use service::DriverService;
pub use store::{DataSourceDescriptor, DescriptorStore, DriverDescriptor, SqliteDescriptorStore};
pub use watcher::{DirectoryWatcher, WatcherConfig, WatcherHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_service_with_defaults_in_temp_home() {
        let home = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::with_home(home.path());
        config.watcher_enabled = false;
        let service = DriverService::open(config, Arc::new(PassthroughDecryptor)).unwrap();
        assert!(home.path().join("driver_engine.db").is_file());
        assert!(service.list_active().unwrap().is_empty());
        assert_eq!(service.bootstrap().unwrap(), BootstrapReport::default());
    }

    #[test]
    fn test_error_reexport() {
        assert_eq!(
            DriverError::DriverNotFound(4).error_category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            DriverError::NoAcceptingDriver("x:".to_string()).error_category(),
            ErrorCategory::ConnectionLost
        );
    }
}
