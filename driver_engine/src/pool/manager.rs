use super::DataSourcePool;
use crate::error::{DriverError, Result};
use crate::observability::{Metrics, StructuredLogger};
use crate::registry::{DriverPreUnloadEvent, DriverRegistry, UnloadListener};
use crate::security::{CredentialDecryptor, Credentials};
use log::Level;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

type PoolCell = Arc<Mutex<Option<Arc<DataSourcePool>>>>;

/// One pool per data source, created on first use and bound to the driver
/// the data source names at that time.
pub struct DynamicPoolManager {
    registry: Arc<DriverRegistry>,
    decryptor: Arc<dyn CredentialDecryptor>,
    pools: Mutex<HashMap<i64, PoolCell>>,
    metrics: Arc<Metrics>,
    logger: StructuredLogger,
}

fn poisoned<T>(_: T) -> DriverError {
    DriverError::InternalError("Lock poisoned".to_string())
}

struct PoolUnloadListener {
    manager: Weak<DynamicPoolManager>,
}

impl UnloadListener for PoolUnloadListener {
    fn on_pre_unload(&self, event: &DriverPreUnloadEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.close_pools_for_driver(event.driver_id);
        }
    }
}

impl DynamicPoolManager {
    /// Creates the manager and subscribes it to the registry's pre-unload
    /// events.
    pub fn new(registry: Arc<DriverRegistry>, decryptor: Arc<dyn CredentialDecryptor>) -> Arc<Self> {
        let metrics = Arc::clone(registry.metrics());
        let manager = Arc::new(Self {
            registry,
            decryptor,
            pools: Mutex::new(HashMap::new()),
            metrics,
            logger: StructuredLogger::default(),
        });
        manager
            .registry
            .events()
            .subscribe_pre_unload(Arc::new(PoolUnloadListener {
                manager: Arc::downgrade(&manager),
            }));
        manager
    }

    /// The pool of `data_source_id`, built on first request. Concurrent first
    /// requests build it once.
    pub fn get_pool(&self, data_source_id: i64) -> Result<Arc<DataSourcePool>> {
        let cell = {
            let mut pools = self.pools.lock().map_err(poisoned)?;
            Arc::clone(
                pools
                    .entry(data_source_id)
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        let mut slot = cell.lock().map_err(poisoned)?;
        if let Some(pool) = slot.as_ref().filter(|p| !p.is_closed()) {
            if self.registry.get_driver_instance(pool.driver_id()).is_ok() {
                return Ok(Arc::clone(pool));
            }
        }
        // Closed, or its driver is no longer served.
        if let Some(stale) = slot.take().filter(|p| !p.is_closed()) {
            log::warn!(
                "Discarding pool of data source {}: driver {} is not loaded",
                data_source_id,
                stale.driver_id()
            );
            self.close(&stale);
        }
        let pool = Arc::new(self.build_pool(data_source_id)?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn build_pool(&self, data_source_id: i64) -> Result<DataSourcePool> {
        let descriptor = self
            .registry
            .store()
            .find_data_source(data_source_id)?
            .ok_or(DriverError::DataSourceNotFound(data_source_id))?;
        let driver = self.registry.get_driver_instance(descriptor.driver_id)?;
        let credentials = Credentials::decrypt(
            self.decryptor.as_ref(),
            descriptor.username.as_deref(),
            descriptor.password.as_deref(),
        );

        let pool = DataSourcePool::new(&descriptor, driver, credentials.to_properties())?;
        self.metrics.record_pool_created();
        self.logger
            .log_pool(Level::Info, "created", data_source_id, descriptor.driver_id);
        Ok(pool)
    }

    pub fn is_cached(&self, data_source_id: i64) -> bool {
        self.cached_pool(data_source_id).is_some()
    }

    fn cached_pool(&self, data_source_id: i64) -> Option<Arc<DataSourcePool>> {
        let cell = self.pools.lock().ok()?.get(&data_source_id).cloned()?;
        let slot = cell.lock().ok()?;
        slot.clone()
    }

    /// Removes and closes the cached pool of one data source, if any.
    pub fn close_pool(&self, data_source_id: i64) -> Result<bool> {
        let cell = self.pools.lock().map_err(poisoned)?.remove(&data_source_id);
        let pool = match cell {
            Some(cell) => {
                let mut slot = cell.lock().map_err(poisoned)?;
                slot.take()
            }
            None => None,
        };
        match pool {
            Some(pool) => {
                self.close(&pool);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every cached pool bound to `driver_id`. Close failures are
    /// logged only.
    pub fn close_pools_for_driver(&self, driver_id: i64) -> usize {
        let affected: Vec<Arc<DataSourcePool>> = {
            let mut pools = match self.pools.lock() {
                Ok(p) => p,
                Err(_) => {
                    log::error!("Pool cache lock poisoned; pools of driver {} left open", driver_id);
                    return 0;
                }
            };
            let mut affected = Vec::new();
            pools.retain(|_, cell| {
                let Ok(mut slot) = cell.lock() else {
                    return true;
                };
                let bound = slot
                    .as_ref()
                    .map(|pool| pool.driver_id() == driver_id)
                    .unwrap_or(false);
                if !bound {
                    return true;
                }
                if let Some(pool) = slot.take() {
                    affected.push(pool);
                }
                false
            });
            affected
        };

        for pool in &affected {
            self.close(pool);
        }
        if !affected.is_empty() {
            log::info!("Closed {} pool(s) of driver {}", affected.len(), driver_id);
        }
        affected.len()
    }

    /// Closes every cached pool (shutdown path).
    pub fn close_all(&self) {
        let drained: Vec<PoolCell> = match self.pools.lock() {
            Ok(mut pools) => pools.drain().map(|(_, cell)| cell).collect(),
            Err(_) => return,
        };
        for cell in drained {
            let pool = cell.lock().ok().and_then(|mut slot| slot.take());
            if let Some(pool) = pool {
                self.close(&pool);
            }
        }
    }

    fn close(&self, pool: &DataSourcePool) {
        match pool.close() {
            Ok(()) => {
                self.metrics.record_pool_closed();
                self.logger
                    .log_pool(Level::Info, "closed", pool.data_source_id(), pool.driver_id());
            }
            Err(e) => self.logger.log_error(
                &format!("Failed to close pool: {}", e),
                &[("data_source_id", pool.data_source_id().to_string())],
            ),
        }
    }
}
