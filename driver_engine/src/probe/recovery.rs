use super::family::DatabaseFamily;
use crate::config::{FamilyDriverConfig, RecoveryConfig};
use crate::connectivity::{ConnectProperties, ConnectRequest, Connection};
use crate::error::{DriverError, Result};
use crate::registry::DriverRegistry;
use crate::resolver::ArtifactResolver;
use crate::security::Credentials;
use std::sync::Arc;

/// Connects to well-known database families, installing the family's
/// driver from the artifact repository when nothing accepts the target.
pub struct DriverRecovery {
    registry: Arc<DriverRegistry>,
    resolver: Option<Arc<ArtifactResolver>>,
    families: RecoveryConfig,
}

impl DriverRecovery {
    pub fn new(
        registry: Arc<DriverRegistry>,
        resolver: Option<Arc<ArtifactResolver>>,
        families: RecoveryConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            families,
        }
    }

    /// Connects through the family's active driver, or generic resolution
    /// when none is loaded. When no driver accepts the target the family's
    /// driver is resolved, registered and tried once more; if recovery
    /// itself fails the first error is returned.
    pub fn connect_with_recovery(
        &self,
        family: DatabaseFamily,
        target: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>> {
        let properties = family.connect_properties(credentials);
        let family_driver = family.driver(&self.families);

        let original = match self.connect_once(family_driver, target, &properties) {
            Err(e) if e.is_no_accepting_driver() => e,
            other => return other,
        };

        log::info!(
            "No driver accepts the {} target, attempting recovery from {}",
            family,
            family_driver.coordinate
        );
        let driver_id = match self.recover(family_driver) {
            Ok(id) => id,
            Err(e) => {
                log::error!("Recovery of the {} driver failed: {}", family, e);
                return Err(original);
            }
        };

        log::info!("Recovered {} driver {}; retrying", family, driver_id);
        self.connect_with_driver(driver_id, target, &properties)
    }

    fn connect_once(
        &self,
        family_driver: &FamilyDriverConfig,
        target: &str,
        properties: &ConnectProperties,
    ) -> Result<Box<dyn Connection>> {
        match self
            .registry
            .find_active_driver_id_by_implementation(&family_driver.implementation_id)
        {
            Some(driver_id) => self.connect_with_driver(driver_id, target, properties),
            None => self.registry.manager().connect(target, properties),
        }
    }

    fn connect_with_driver(
        &self,
        driver_id: i64,
        target: &str,
        properties: &ConnectProperties,
    ) -> Result<Box<dyn Connection>> {
        let driver = self.registry.get_driver_instance(driver_id)?;
        driver
            .connect(&ConnectRequest::new(target, properties.clone()))?
            .ok_or_else(|| {
                DriverError::ConnectionFailed(format!(
                    "Driver {} ({}) does not accept the target",
                    driver_id,
                    driver.implementation_id()
                ))
            })
    }

    fn recover(&self, family_driver: &FamilyDriverConfig) -> Result<i64> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            DriverError::ConfigError("no artifact repository configured".to_string())
        })?;
        let files = resolver.resolve(&family_driver.coordinate)?;
        let (module, dependencies) =
            files
                .split_first()
                .ok_or_else(|| DriverError::ArtifactResolutionFailure {
                    coordinate: family_driver.coordinate.clone(),
                    reason: "no files resolved".to_string(),
                })?;

        match self
            .registry
            .register(module, dependencies, Some(&family_driver.implementation_id))
        {
            Ok(descriptor) => Ok(descriptor.id),
            Err(e) if e.is_duplicate() => self
                .registry
                .find_active_driver_id_by_implementation(&family_driver.implementation_id)
                .ok_or(e),
            Err(e) => Err(e),
        }
    }
}
