//! Connection pools bound to one specific driver adapter.

pub mod manager;

pub use manager::DynamicPoolManager;

use crate::connectivity::{ConnectProperties, ConnectRequest, Connection, Driver};
use crate::error::{DriverError, Result};
use crate::store::DataSourceDescriptor;
use r2d2::{Pool, PooledConnection};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// r2d2 connection manager that always connects through the same adapter,
/// never through generic resolution.
pub struct DriverConnectionManager {
    driver: Arc<dyn Driver>,
    target: String,
    properties: ConnectProperties,
}

impl DriverConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, target: impl Into<String>, properties: ConnectProperties) -> Self {
        Self {
            driver,
            target: target.into(),
            properties,
        }
    }
}

impl r2d2::ManageConnection for DriverConnectionManager {
    type Connection = Box<dyn Connection>;
    type Error = DriverError;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let request = ConnectRequest::new(self.target.clone(), self.properties.clone());
        self.driver
            .connect(&request)?
            .ok_or_else(|| DriverError::NoAcceptingDriver(self.target.clone()))
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        if conn.is_valid(VALIDATION_TIMEOUT) {
            Ok(())
        } else {
            Err(DriverError::ConnectionFailed(
                "Connection failed validation".to_string(),
            ))
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}

/// Pool of one data source. `close()` drops the underlying r2d2 pool;
/// idle connections are closed right away, checked-out ones when returned.
pub struct DataSourcePool {
    data_source_id: i64,
    driver_id: i64,
    max_size: u32,
    pool: RwLock<Option<Pool<DriverConnectionManager>>>,
}

impl DataSourcePool {
    pub fn new(
        descriptor: &DataSourceDescriptor,
        driver: Arc<dyn Driver>,
        properties: ConnectProperties,
    ) -> Result<Self> {
        let max_size = descriptor.max_pool_size.max(1);
        let manager = DriverConnectionManager::new(driver, descriptor.target.clone(), properties);
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(descriptor.min_idle.min(max_size)))
            .connection_timeout(Duration::from_millis(descriptor.connection_timeout_ms.max(1)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| DriverError::PoolError(format!("Pool creation failed: {}", e)))?;

        Ok(Self {
            data_source_id: descriptor.id,
            driver_id: descriptor.driver_id,
            max_size,
            pool: RwLock::new(Some(pool)),
        })
    }

    pub fn get(&self) -> Result<PooledConnectionWrapper> {
        // Clone the handle so a slow checkout never blocks close().
        let pool = self
            .pool
            .read()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| DriverError::PoolClosed(format!("data source {}", self.data_source_id)))?;
        let pooled = pool.get().map_err(|e| {
            DriverError::PoolError(format!("Failed to get connection from pool: {}", e))
        })?;
        Ok(PooledConnectionWrapper { pooled })
    }

    pub fn close(&self) -> Result<()> {
        let pool = self
            .pool
            .write()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?
            .take();
        drop(pool);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.pool.read().map(|p| p.is_none()).unwrap_or(true)
    }

    pub fn health_check(&self) -> bool {
        self.get().is_ok()
    }

    pub fn data_source_id(&self) -> i64 {
        self.data_source_id
    }

    pub fn driver_id(&self) -> i64 {
        self.driver_id
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn state(&self) -> PoolState {
        match self.pool.read().ok().and_then(|p| p.as_ref().map(|p| p.state())) {
            Some(state) => PoolState {
                size: state.connections,
                idle: state.idle_connections,
            },
            None => PoolState { size: 0, idle: 0 },
        }
    }
}

impl std::fmt::Debug for DataSourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourcePool")
            .field("data_source_id", &self.data_source_id)
            .field("driver_id", &self.driver_id)
            .field("max_size", &self.max_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct PooledConnectionWrapper {
    pooled: PooledConnection<DriverConnectionManager>,
}

impl PooledConnectionWrapper {
    pub fn get_connection(&self) -> &dyn Connection {
        &**self.pooled
    }

    pub fn get_connection_mut(&mut self) -> &mut dyn Connection {
        &mut **self.pooled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub size: u32,
    pub idle: u32,
}
