//! Driver registry: owns every live loading context, keyed by descriptor id.

pub mod events;

pub use events::{DriverPreUnloadEvent, EventBus, LifecycleEvent, LifecycleListener, UnloadListener};

use crate::connectivity::{Driver, DriverManager};
use crate::error::{DriverError, Result};
use crate::module::{LoadedModule, LoadingContext, ModuleLoader};
use crate::observability::{Metrics, StructuredLogger};
use crate::store::{content_hash, DescriptorStore, DriverDescriptor};
use log::Level;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// A live loading context paired with the adapter it produced.
#[derive(Clone)]
pub struct DriverContext {
    pub driver_id: i64,
    pub context: Arc<dyn LoadingContext>,
    pub shim: Arc<dyn Driver>,
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("driver_id", &self.driver_id)
            .field("implementation_id", &self.shim.implementation_id())
            .field("module", &self.context.module_path())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub loaded: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

pub struct DriverRegistry {
    store: Arc<dyn DescriptorStore>,
    loader: Arc<dyn ModuleLoader>,
    manager: Arc<DriverManager>,
    events: EventBus,
    contexts: RwLock<HashMap<i64, DriverContext>>,
    // Drivers between pre-unload and context removal. Only written while
    // holding the contexts write lock.
    unloading: Mutex<HashSet<i64>>,
    // Serializes descriptor state transitions (register, reactivate, unload).
    registration: Mutex<()>,
    metrics: Arc<Metrics>,
    logger: StructuredLogger,
}

fn poisoned<T>(_: T) -> DriverError {
    DriverError::InternalError("Lock poisoned".to_string())
}

impl DriverRegistry {
    pub fn new(
        store: Arc<dyn DescriptorStore>,
        loader: Arc<dyn ModuleLoader>,
        manager: Arc<DriverManager>,
    ) -> Self {
        Self {
            store,
            loader,
            manager,
            events: EventBus::new(),
            contexts: RwLock::new(HashMap::new()),
            unloading: Mutex::new(HashSet::new()),
            registration: Mutex::new(()),
            metrics: Arc::new(Metrics::new()),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn manager(&self) -> &Arc<DriverManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn DescriptorStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Registers the module at `module_path`, or reactivates its inactive
    /// descriptor when the same content was registered before.
    pub fn register(
        &self,
        module_path: &Path,
        dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<DriverDescriptor> {
        let result = self.register_inner(module_path, dependency_paths, implementation_id);
        self.metrics.record_registration(result.is_ok());
        let descriptor = result?;

        self.logger.log_driver(
            Level::Info,
            "registered",
            descriptor.id,
            &descriptor.implementation_id,
        );
        self.events.publish(&LifecycleEvent::DriverRegistered {
            driver_id: descriptor.id,
            implementation_id: descriptor.implementation_id.clone(),
        });
        Ok(descriptor)
    }

    fn register_inner(
        &self,
        module_path: &Path,
        dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<DriverDescriptor> {
        if !module_path.is_file() {
            return Err(DriverError::ModuleNotFound(module_path.display().to_string()));
        }
        let hash = content_hash(module_path)?;

        let _guard = self.registration.lock().map_err(poisoned)?;

        let existing = self.store.find_driver_by_hash(&hash)?;
        if let Some(d) = existing.as_ref().filter(|d| d.active) {
            return Err(DriverError::DuplicateActiveDriver(format!(
                "{} (driver {})",
                hash, d.id
            )));
        }

        let loaded = self.loader.load(module_path, dependency_paths, implementation_id)?;
        let resolved_id = loaded.implementation_id().to_string();

        let descriptor = match existing {
            Some(mut d) => {
                log::info!("Reactivating driver {} ({})", d.id, resolved_id);
                d.module_path = module_path.to_path_buf();
                d.dependency_paths = dependency_paths.to_vec();
                d.implementation_id = resolved_id;
                d.active = true;
                d
            }
            None => {
                let mut d = DriverDescriptor::new(
                    resolved_id.clone(),
                    module_path,
                    resolved_id,
                    hash,
                );
                d.dependency_paths = dependency_paths.to_vec();
                d
            }
        };

        self.activate(descriptor, loaded).map_err(|e| {
            DriverError::RegistrationFailed(format!("{}: {}", module_path.display(), e))
        })
    }

    /// Registers the shim, persists the descriptor as active and caches the
    /// context. Undoes the in-process steps on failure.
    fn activate(&self, descriptor: DriverDescriptor, loaded: LoadedModule) -> Result<DriverDescriptor> {
        let shim: Arc<dyn Driver> = loaded.shim;
        let context = loaded.context;

        let result = self.try_activate(&descriptor, &shim, &context);
        if result.is_err() {
            if let Err(e) = self.manager.deregister(&shim) {
                log::error!("Rollback: failed to deregister {}: {}", shim.implementation_id(), e);
            }
            if let Err(e) = context.release() {
                log::error!(
                    "Rollback: failed to release context of {}: {}",
                    context.module_path().display(),
                    e
                );
            }
        }
        result
    }

    fn try_activate(
        &self,
        descriptor: &DriverDescriptor,
        shim: &Arc<dyn Driver>,
        context: &Arc<dyn LoadingContext>,
    ) -> Result<DriverDescriptor> {
        self.manager.register(Arc::clone(shim))?;
        let mut contexts = self.contexts.write().map_err(poisoned)?;
        let saved = self.store.save_driver(descriptor)?;
        contexts.insert(
            saved.id,
            DriverContext {
                driver_id: saved.id,
                context: Arc::clone(context),
                shim: Arc::clone(shim),
            },
        );
        Ok(saved)
    }

    /// The live adapter of `driver_id`. Never falls back to generic
    /// resolution, and refuses a driver whose unload has started.
    pub fn get_driver_instance(&self, driver_id: i64) -> Result<Arc<dyn Driver>> {
        let contexts = self.contexts.read().map_err(poisoned)?;
        if self.unloading.lock().map_err(poisoned)?.contains(&driver_id) {
            return Err(DriverError::DriverNotLoaded(driver_id));
        }
        contexts
            .get(&driver_id)
            .map(|c| Arc::clone(&c.shim))
            .ok_or(DriverError::DriverNotLoaded(driver_id))
    }

    pub fn is_loaded(&self, driver_id: i64) -> bool {
        self.contexts
            .read()
            .map(|c| c.contains_key(&driver_id))
            .unwrap_or(false)
    }

    pub fn loaded_driver_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .contexts
            .read()
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Lowest live driver id whose implementation id matches.
    pub fn find_active_driver_id_by_implementation(&self, implementation_id: &str) -> Option<i64> {
        let contexts = self.contexts.read().ok()?;
        let unloading = self.unloading.lock().ok()?;
        contexts
            .values()
            .filter(|c| !unloading.contains(&c.driver_id))
            .filter(|c| c.shim.implementation_id() == implementation_id)
            .map(|c| c.driver_id)
            .min()
    }

    pub fn unload(&self, driver_id: i64) -> Result<()> {
        let _guard = self.registration.lock().map_err(poisoned)?;

        let mut descriptor = self
            .store
            .find_driver(driver_id)?
            .ok_or(DriverError::DriverNotFound(driver_id))?;

        {
            let contexts = self.contexts.write().map_err(poisoned)?;
            if contexts.contains_key(&driver_id) {
                self.unloading.lock().map_err(poisoned)?.insert(driver_id);
            }
        }

        self.events
            .publish_pre_unload(&DriverPreUnloadEvent { driver_id });

        let removed = {
            let mut contexts = self.contexts.write().map_err(poisoned)?;
            self.unloading.lock().map_err(poisoned)?.remove(&driver_id);
            contexts.remove(&driver_id)
        };
        match removed {
            Some(ctx) => self.teardown(&ctx),
            None => log::warn!("Driver {} has no live context to release", driver_id),
        }

        descriptor.active = false;
        self.store.save_driver(&descriptor)?;

        self.metrics.record_unload();
        self.logger.log_driver(
            Level::Info,
            "unloaded",
            driver_id,
            &descriptor.implementation_id,
        );
        self.events
            .publish(&LifecycleEvent::DriverUnloaded { driver_id });
        Ok(())
    }

    fn teardown(&self, ctx: &DriverContext) {
        if let Err(e) = self.manager.deregister(&ctx.shim) {
            log::error!("Failed to deregister driver {}: {}", ctx.driver_id, e);
        }
        if let Err(e) = ctx.context.release() {
            log::error!("Failed to release context of driver {}: {}", ctx.driver_id, e);
        }
    }

    /// Recreates contexts for every active descriptor not yet loaded.
    pub fn bootstrap(&self) -> Result<BootstrapReport> {
        let active = self.store.list_active_drivers()?;
        let mut report = BootstrapReport::default();

        for descriptor in active {
            if self.is_loaded(descriptor.id) {
                continue;
            }
            match self.load_descriptor(&descriptor) {
                Ok(()) => {
                    self.logger.log_driver(
                        Level::Info,
                        "restored",
                        descriptor.id,
                        &descriptor.implementation_id,
                    );
                    report.loaded.push(descriptor.id);
                }
                Err(e) => {
                    self.logger.log_error(
                        &e.to_string(),
                        &[
                            ("driver_id", descriptor.id.to_string()),
                            ("module", descriptor.module_path.display().to_string()),
                        ],
                    );
                    report.failed.push((descriptor.id, e.to_string()));
                }
            }
        }

        self.metrics
            .record_bootstrap(report.loaded.len(), report.failed.len());
        Ok(report)
    }

    fn load_descriptor(&self, descriptor: &DriverDescriptor) -> Result<()> {
        let _guard = self.registration.lock().map_err(poisoned)?;
        if self.is_loaded(descriptor.id) {
            return Ok(());
        }
        let loaded = self.loader.load(
            &descriptor.module_path,
            &descriptor.dependency_paths,
            Some(&descriptor.implementation_id),
        )?;
        self.activate(descriptor.clone(), loaded)?;
        Ok(())
    }

    pub fn list_active(&self) -> Result<Vec<DriverDescriptor>> {
        self.store.list_active_drivers()
    }

    /// Releases every live context without touching persisted state; used
    /// on shutdown so the next `bootstrap` restores the same set.
    pub fn release_all(&self) -> Result<()> {
        let drained: Vec<DriverContext> = {
            let mut contexts = self.contexts.write().map_err(poisoned)?;
            contexts.drain().map(|(_, c)| c).collect()
        };
        for ctx in &drained {
            self.teardown(ctx);
        }
        Ok(())
    }
}
