use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Standard connectivity interface every loaded module is exposed through.
pub trait Driver: Send + Sync {
    /// Identifier of the concrete implementation (e.g. `sample.SampleDriver`).
    fn implementation_id(&self) -> &str;

    fn accepts_target(&self, target: &str) -> bool;

    /// Opens a connection. `Ok(None)` means the driver does not accept the
    /// target, mirroring the convention used by generic resolution.
    fn connect(&self, request: &ConnectRequest) -> Result<Option<Box<dyn Connection>>>;

    fn version(&self) -> DriverVersion;
}

/// A live connection produced by a [`Driver`].
pub trait Connection: Send {
    fn product_name(&self) -> Result<String>;

    fn product_version(&self) -> Result<String>;

    fn is_valid(&self, timeout: Duration) -> bool;

    fn is_closed(&self) -> bool;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
}

impl std::fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Connection properties handed to a driver (`user`, `password`,
/// `internal_logon`, ...). Values are never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectProperties {
    values: BTreeMap<String, String>,
}

impl ConnectProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.values)?)
    }
}

impl std::fmt::Debug for ConnectProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectProperties")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Cooperative cancellation flag shared between a caller and a connect
/// attempt running on a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub target: String,
    pub properties: ConnectProperties,
    pub cancel: CancelToken,
}

impl ConnectRequest {
    pub fn new(target: impl Into<String>, properties: ConnectProperties) -> Self {
        Self {
            target: target.into(),
            properties,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
