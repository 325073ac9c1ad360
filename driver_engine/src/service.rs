use crate::async_bridge;
use crate::config::EngineConfig;
use crate::connectivity::{Connection, DriverManager};
use crate::error::{DriverError, Result};
use crate::module::{ModuleLoader, NativeModuleLoader};
use crate::observability::{Metrics, StructuredLogger};
use crate::pool::{DataSourcePool, DynamicPoolManager};
use crate::probe::{ConnectionProbe, ConnectionTestResult, DatabaseFamily, DriverRecovery};
use crate::registry::{BootstrapReport, DriverRegistry};
use crate::resolver::ArtifactResolver;
use crate::security::{CredentialDecryptor, Credentials};
use crate::store::{DataSourceDescriptor, DescriptorStore, DriverDescriptor, SqliteDescriptorStore};
use crate::watcher::{DirectoryWatcher, WatcherConfig, WatcherHandle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Entry point for hosts: wires the store, loader, registry, pools,
/// resolver, probe and watcher together.
pub struct DriverService {
    config: EngineConfig,
    registry: Arc<DriverRegistry>,
    pools: Arc<DynamicPoolManager>,
    resolver: Option<Arc<ArtifactResolver>>,
    probe: ConnectionProbe,
    recovery: DriverRecovery,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl DriverService {
    /// Opens the SQLite store at `config.database_path` and loads native
    /// modules.
    pub fn open(config: EngineConfig, decryptor: Arc<dyn CredentialDecryptor>) -> Result<Self> {
        let store = SqliteDescriptorStore::open(&config.database_path)?;
        Self::with_components(config, Arc::new(store), Arc::new(NativeModuleLoader::new()), decryptor)
    }

    pub fn with_components(
        config: EngineConfig,
        store: Arc<dyn DescriptorStore>,
        loader: Arc<dyn ModuleLoader>,
        decryptor: Arc<dyn CredentialDecryptor>,
    ) -> Result<Self> {
        config.validate()?;
        async_bridge::init_runtime(config.max_blocking_threads);

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(
            DriverRegistry::new(store, loader, Arc::new(DriverManager::new()))
                .with_metrics(Arc::clone(&metrics))
                .with_logger(StructuredLogger::new(config.structured_logging)),
        );
        let pools = DynamicPoolManager::new(Arc::clone(&registry), decryptor);

        let resolver = match &config.repository_url {
            Some(url) => Some(Arc::new(ArtifactResolver::for_repository(
                url,
                config.resolver_cache_dir.clone(),
                config.http_timeout(),
            )?)),
            None => None,
        };

        let probe = ConnectionProbe::new(Arc::clone(&registry)).with_timeout(config.connection_test_timeout());
        let recovery = DriverRecovery::new(
            Arc::clone(&registry),
            resolver.clone(),
            config.recovery.clone(),
        );

        log::info!(
            "Driver service ready (home {}, repository {})",
            config.app_home.display(),
            config.repository_url.as_deref().unwrap_or("none")
        );
        Ok(Self {
            config,
            registry,
            pools,
            resolver,
            probe,
            recovery,
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn pools(&self) -> &Arc<DynamicPoolManager> {
        &self.pools
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.registry.metrics()
    }

    pub fn register_from_file(
        &self,
        module_path: &Path,
        dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<DriverDescriptor> {
        self.registry.register(module_path, dependency_paths, implementation_id)
    }

    /// Resolves `coordinate` with its dependencies and registers the
    /// primary module.
    pub fn register_from_coordinate(&self, coordinate: &str) -> Result<DriverDescriptor> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            DriverError::ConfigError("no artifact repository configured".to_string())
        })?;
        let files = resolver.resolve(coordinate)?;
        let (module, dependencies) =
            files
                .split_first()
                .ok_or_else(|| DriverError::ArtifactResolutionFailure {
                    coordinate: coordinate.to_string(),
                    reason: "no files resolved".to_string(),
                })?;
        self.registry.register(module, dependencies, None)
    }

    pub fn unload(&self, driver_id: i64) -> Result<()> {
        self.registry.unload(driver_id)
    }

    pub fn list_active(&self) -> Result<Vec<DriverDescriptor>> {
        self.registry.list_active()
    }

    pub fn bootstrap(&self) -> Result<BootstrapReport> {
        self.registry.bootstrap()
    }

    pub fn test_connection(
        &self,
        driver_id: i64,
        target: &str,
        credentials: &Credentials,
    ) -> ConnectionTestResult {
        self.probe.test_connection(driver_id, target, credentials)
    }

    pub fn connect_with_recovery(
        &self,
        family: DatabaseFamily,
        target: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>> {
        self.recovery.connect_with_recovery(family, target, credentials)
    }

    /// Starts polling the configured drop directory. A running watcher is
    /// left as is.
    pub fn start_watcher(&self) -> Result<()> {
        let mut slot = self
            .watcher
            .lock()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?;
        if slot.as_ref().map(|h| h.is_running()).unwrap_or(false) {
            return Ok(());
        }

        let mut config = WatcherConfig::new(&self.config.drop_dir);
        config.extension = self.config.module_extension.clone();
        config.scan_interval = self.config.scan_interval();
        config.settling_window = self.config.settling_window();

        let watcher = Arc::new(DirectoryWatcher::new(config, self.registry.clone()));
        *slot = Some(watcher.start()?);
        Ok(())
    }

    pub fn stop_watcher(&self) {
        let handle = match self.watcher.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.stop();
            log::info!("Directory watcher stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .map(|slot| slot.as_ref().map(|h| h.is_running()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn get_pool(&self, data_source_id: i64) -> Result<Arc<DataSourcePool>> {
        self.pools.get_pool(data_source_id)
    }

    /// A new data source sized with the configured default pool size.
    pub fn new_data_source(
        &self,
        name: impl Into<String>,
        target: impl Into<String>,
        driver_id: i64,
    ) -> DataSourceDescriptor {
        let mut descriptor = DataSourceDescriptor::new(name, target, driver_id);
        descriptor.max_pool_size = self.config.default_pool_size;
        descriptor
    }

    /// Persists the data source. A cached pool of an updated data source is
    /// closed so the next `get_pool` picks up the new settings.
    pub fn save_data_source(&self, descriptor: &DataSourceDescriptor) -> Result<DataSourceDescriptor> {
        let saved = self.registry.store().save_data_source(descriptor)?;
        if descriptor.id != 0 {
            self.pools.close_pool(saved.id)?;
        }
        Ok(saved)
    }

    pub fn delete_data_source(&self, data_source_id: i64) -> Result<bool> {
        self.pools.close_pool(data_source_id)?;
        self.registry.store().delete_data_source(data_source_id)
    }

    /// Stops the watcher, closes every pool and releases every loaded
    /// module. Persisted state is untouched, so `bootstrap` restores it.
    pub fn shutdown(&self) {
        self.stop_watcher();
        self.pools.close_all();
        if let Err(e) = self.registry.release_all() {
            log::error!("Failed to release loaded drivers: {}", e);
        }
    }
}

impl Drop for DriverService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
