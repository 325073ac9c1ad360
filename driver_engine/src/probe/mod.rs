//! Bounded-time connection tests and automatic driver recovery.

pub mod family;
pub mod recovery;

pub use family::DatabaseFamily;
pub use recovery::DriverRecovery;

use crate::async_bridge::execute_async;
use crate::connectivity::{CancelToken, ConnectRequest, Connection, Driver};
use crate::error::DriverError;
use crate::observability::{Metrics, ProbeOutcome};
use crate::registry::DriverRegistry;
use crate::security::Credentials;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub error_message: Option<String>,
}

impl ConnectionTestResult {
    pub fn success(product_name: String, product_version: String) -> Self {
        Self {
            success: true,
            product_name: Some(product_name),
            product_version: Some(product_version),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            product_name: None,
            product_version: None,
            error_message: Some(message.into()),
        }
    }
}

/// Tests connections against a specific loaded driver with a hard deadline.
pub struct ConnectionProbe {
    registry: Arc<DriverRegistry>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl ConnectionProbe {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        let metrics = Arc::clone(registry.metrics());
        Self {
            registry,
            timeout: DEFAULT_TEST_TIMEOUT,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connects through `driver_id`, validates the connection and reads
    /// product metadata. Failures, including the deadline, are reported in
    /// the result.
    pub fn test_connection(
        &self,
        driver_id: i64,
        target: &str,
        credentials: &Credentials,
    ) -> ConnectionTestResult {
        let started = Instant::now();
        let (result, outcome) = self.run(driver_id, target, credentials);
        let latency = started.elapsed();
        self.metrics.record_connection_test(latency, outcome);

        match &result.error_message {
            None => log::info!(
                "Connection test via driver {} succeeded in {} ms",
                driver_id,
                latency.as_millis()
            ),
            Some(msg) => log::warn!("Connection test via driver {} failed: {}", driver_id, msg),
        }
        result
    }

    fn run(
        &self,
        driver_id: i64,
        target: &str,
        credentials: &Credentials,
    ) -> (ConnectionTestResult, ProbeOutcome) {
        let driver = match self.registry.get_driver_instance(driver_id) {
            Ok(driver) => driver,
            Err(e) => return (ConnectionTestResult::failure(e.to_string()), ProbeOutcome::Failure),
        };

        let cancel = CancelToken::new();
        let request =
            ConnectRequest::new(target, credentials.to_properties()).with_cancel(cancel.clone());
        let timeout = self.timeout;

        let attempt = execute_async(async move {
            let worker = tokio::task::spawn_blocking(move || probe_driver(driver.as_ref(), &request));
            match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(result)) => Ok(Some(result)),
                Ok(Err(e)) => Err(DriverError::InternalError(format!(
                    "Connection test worker failed: {}",
                    e
                ))),
                Err(_) => Ok(None),
            }
        });

        match attempt {
            Ok(Some(result)) => {
                let outcome = if result.success {
                    ProbeOutcome::Success
                } else {
                    ProbeOutcome::Failure
                };
                (result, outcome)
            }
            Ok(None) => {
                // The worker keeps running; it closes whatever it gets.
                cancel.cancel();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                (
                    ConnectionTestResult::failure(DriverError::ConnectionTimeout(timeout_ms).to_string()),
                    ProbeOutcome::Timeout,
                )
            }
            Err(e) => (ConnectionTestResult::failure(e.to_string()), ProbeOutcome::Failure),
        }
    }
}

/// Runs on a blocking worker. The connection is always closed before
/// returning.
fn probe_driver(driver: &dyn Driver, request: &ConnectRequest) -> ConnectionTestResult {
    let mut conn = match driver.connect(request) {
        Ok(Some(conn)) => conn,
        Ok(None) => {
            return ConnectionTestResult::failure(
                DriverError::NoAcceptingDriver(request.target.clone()).to_string(),
            )
        }
        Err(e) => return ConnectionTestResult::failure(e.to_string()),
    };

    let result = if request.cancel.is_cancelled() {
        log::warn!(
            "Connection from {} arrived after the deadline; closing it",
            driver.implementation_id()
        );
        ConnectionTestResult::failure("Connection test cancelled")
    } else {
        inspect(conn.as_ref())
    };

    if let Err(e) = conn.close() {
        log::warn!("Failed to close test connection: {}", e);
    }
    result
}

fn inspect(conn: &dyn Connection) -> ConnectionTestResult {
    if !conn.is_valid(VALIDATION_TIMEOUT) {
        return ConnectionTestResult::failure("Connection is invalid");
    }
    let product_name = conn.product_name().unwrap_or_else(|e| {
        log::warn!("Could not read product name: {}", e);
        UNKNOWN.to_string()
    });
    let product_version = conn.product_version().unwrap_or_else(|e| {
        log::warn!("Could not read product version: {}", e);
        UNKNOWN.to_string()
    });
    ConnectionTestResult::success(product_name, product_version)
}
