//! Registry fixtures backed by a temporary SQLite store and in-process
//! driver modules.

use driver_engine::connectivity::DriverManager;
use driver_engine::module::ModuleLoader;
use driver_engine::security::PassthroughDecryptor;
use driver_engine::store::{DataSourceDescriptor, DescriptorStore, DriverDescriptor};
use driver_engine::test_helpers::{write_module_file, StaticModuleLoader};
use driver_engine::{DriverError, DriverRegistry, DynamicPoolManager, Result, SqliteDescriptorStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<dyn DescriptorStore>,
    pub loader: Arc<StaticModuleLoader>,
    pub registry: Arc<DriverRegistry>,
    pub pools: Arc<DynamicPoolManager>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_store(|store| store)
    }

    /// Lets the caller wrap the SQLite store, e.g. to inject failures.
    pub fn with_store(
        wrap: impl FnOnce(Arc<dyn DescriptorStore>) -> Arc<dyn DescriptorStore>,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let sqlite: Arc<dyn DescriptorStore> = Arc::new(
            SqliteDescriptorStore::open(&dir.path().join("driver_engine.db")).expect("open store"),
        );
        let store = wrap(sqlite);
        let loader = Arc::new(StaticModuleLoader::new());
        let registry = Arc::new(DriverRegistry::new(
            Arc::clone(&store),
            Arc::clone(&loader) as Arc<dyn ModuleLoader>,
            Arc::new(DriverManager::new()),
        ));
        let pools = DynamicPoolManager::new(Arc::clone(&registry), Arc::new(PassthroughDecryptor));
        Self {
            dir,
            store,
            loader,
            registry,
            pools,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("driver_engine.db")
    }

    /// Writes a module stand-in under `modules/`; equal `content` means
    /// equal content hash.
    pub fn module(&self, file_name: &str, content: &str) -> PathBuf {
        let modules = self.dir.path().join("modules");
        std::fs::create_dir_all(&modules).expect("modules dir");
        write_module_file(&modules, file_name, content).expect("write module")
    }

    /// A fresh registry over the same database, as after a process restart.
    pub fn restart(&self, configure: impl FnOnce(&StaticModuleLoader)) -> (Arc<DriverRegistry>, Arc<StaticModuleLoader>) {
        let store = Arc::new(SqliteDescriptorStore::open(&self.db_path()).expect("reopen store"));
        let loader = Arc::new(StaticModuleLoader::new());
        configure(&loader);
        let registry = Arc::new(DriverRegistry::new(
            store,
            Arc::clone(&loader) as Arc<dyn ModuleLoader>,
            Arc::new(DriverManager::new()),
        ));
        (registry, loader)
    }

    pub fn data_source(&self, name: &str, target: &str, driver_id: i64) -> DataSourceDescriptor {
        self.store
            .save_data_source(&DataSourceDescriptor::new(name, target, driver_id))
            .expect("save data source")
    }
}

/// Delegates to another store but can be told to fail driver saves.
pub struct FailingSaveStore {
    inner: Arc<dyn DescriptorStore>,
    fail_saves: AtomicBool,
}

#[allow(dead_code)]
impl FailingSaveStore {
    pub fn new(inner: Arc<dyn DescriptorStore>) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl DescriptorStore for FailingSaveStore {
    fn find_driver_by_hash(&self, content_hash: &str) -> Result<Option<DriverDescriptor>> {
        self.inner.find_driver_by_hash(content_hash)
    }

    fn find_driver(&self, id: i64) -> Result<Option<DriverDescriptor>> {
        self.inner.find_driver(id)
    }

    fn save_driver(&self, descriptor: &DriverDescriptor) -> Result<DriverDescriptor> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(DriverError::StoreError("disk full".to_string()));
        }
        self.inner.save_driver(descriptor)
    }

    fn list_active_drivers(&self) -> Result<Vec<DriverDescriptor>> {
        self.inner.list_active_drivers()
    }

    fn list_drivers(&self) -> Result<Vec<DriverDescriptor>> {
        self.inner.list_drivers()
    }

    fn save_data_source(&self, descriptor: &DataSourceDescriptor) -> Result<DataSourceDescriptor> {
        self.inner.save_data_source(descriptor)
    }

    fn find_data_source(&self, id: i64) -> Result<Option<DataSourceDescriptor>> {
        self.inner.find_data_source(id)
    }

    fn list_data_sources_by_driver(&self, driver_id: i64) -> Result<Vec<DataSourceDescriptor>> {
        self.inner.list_data_sources_by_driver(driver_id)
    }

    fn delete_data_source(&self, id: i64) -> Result<bool> {
        self.inner.delete_data_source(id)
    }
}
