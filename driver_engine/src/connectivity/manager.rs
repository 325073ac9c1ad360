use super::driver::{Connection, ConnectProperties, ConnectRequest, Driver};
use crate::error::{DriverError, Result};
use std::sync::{Arc, RwLock};

/// Generic connection resolution: tries every registered driver in
/// registration order and connects with the first one that accepts the
/// target.
pub struct DriverManager {
    drivers: RwLock<Vec<Arc<dyn Driver>>>,
}

impl DriverManager {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let mut drivers = self
            .drivers
            .write()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?;
        if !drivers.iter().any(|d| Arc::ptr_eq(d, &driver)) {
            drivers.push(driver);
        }
        Ok(())
    }

    /// Removes a previously registered driver (pointer identity). Returns
    /// whether it was present.
    pub fn deregister(&self, driver: &Arc<dyn Driver>) -> Result<bool> {
        let mut drivers = self
            .drivers
            .write()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?;
        let before = drivers.len();
        drivers.retain(|d| !Arc::ptr_eq(d, driver));
        Ok(drivers.len() != before)
    }

    pub fn is_registered(&self, driver: &Arc<dyn Driver>) -> bool {
        self.drivers
            .read()
            .map(|drivers| drivers.iter().any(|d| Arc::ptr_eq(d, driver)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.drivers.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn driver_for(&self, target: &str) -> Option<Arc<dyn Driver>> {
        let drivers = self.drivers.read().ok()?;
        drivers.iter().find(|d| d.accepts_target(target)).cloned()
    }

    pub fn connect(&self, target: &str, properties: &ConnectProperties) -> Result<Box<dyn Connection>> {
        self.connect_request(&ConnectRequest::new(target, properties.clone()))
    }

    pub fn connect_request(&self, request: &ConnectRequest) -> Result<Box<dyn Connection>> {
        // Snapshot so that connects never run under the lock
        let candidates: Vec<Arc<dyn Driver>> = self
            .drivers
            .read()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?
            .clone();

        let mut first_error = None;
        for driver in candidates {
            if !driver.accepts_target(&request.target) {
                continue;
            }
            match driver.connect(request) {
                Ok(Some(conn)) => return Ok(conn),
                Ok(None) => continue,
                Err(e) => {
                    log::debug!(
                        "Driver {} failed for target: {}",
                        driver.implementation_id(),
                        e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or_else(|| DriverError::NoAcceptingDriver(request.target.clone())))
    }
}

impl Default for DriverManager {
    fn default() -> Self {
        Self::new()
    }
}
