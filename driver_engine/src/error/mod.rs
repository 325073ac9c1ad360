use thiserror::Error;

/// Error category for decision-making (retry, abort, reconnect, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may resolve
    Transient,
    /// Fatal error - should abort operation
    Fatal,
    /// Validation error - invalid user input
    Validation,
    /// Connection lost - should reconnect
    ConnectionLost,
}

#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Module file not found: {0}")]
    ModuleNotFound(String),

    #[error("Dependency file not found: {0}")]
    DependencyNotFound(String),

    #[error("No driver implementation found: {0}")]
    ImplementationNotFound(String),

    #[error("Invalid driver module: {0}")]
    InvalidModule(String),

    #[error("Driver with same content hash is already active: {0}")]
    DuplicateActiveDriver(String),

    #[error("Driver not found: {0}")]
    DriverNotFound(i64),

    #[error("Driver not loaded or not found: {0}")]
    DriverNotLoaded(i64),

    #[error("No suitable driver found for target: {0}")]
    NoAcceptingDriver(String),

    #[error("Connection timed out after {0} ms")]
    ConnectionTimeout(u64),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to resolve artifacts for {coordinate}: {reason}")]
    ArtifactResolutionFailure { coordinate: String, reason: String },

    #[error("Failed to register driver: {0}")]
    RegistrationFailed(String),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(i64),

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Pool closed: {0}")]
    PoolClosed(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        DriverError::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::StoreError(format!("JSON: {}", err))
    }
}

impl From<libloading::Error> for DriverError {
    fn from(err: libloading::Error) -> Self {
        DriverError::InvalidModule(err.to_string())
    }
}

#[cfg(feature = "remote")]
impl From<ureq::Error> for DriverError {
    fn from(err: ureq::Error) -> Self {
        DriverError::Io(format!("HTTP: {}", err))
    }
}

impl From<r2d2::Error> for DriverError {
    fn from(err: r2d2::Error) -> Self {
        DriverError::PoolError(err.to_string())
    }
}

impl DriverError {
    /// Message text of the error, as shown to callers.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// True when a registration failed because identical content is already
    /// active. The directory watcher treats this as benign.
    pub fn is_duplicate(&self) -> bool {
        match self {
            DriverError::DuplicateActiveDriver(_) => true,
            DriverError::RegistrationFailed(msg) => {
                msg.contains("already active") || msg.contains("duplicate")
            }
            _ => false,
        }
    }

    /// True when no loaded driver accepted the connection target. This is the
    /// trigger for automatic driver recovery.
    pub fn is_no_accepting_driver(&self) -> bool {
        matches!(self, DriverError::NoAcceptingDriver(_))
    }

    /// Returns true if the error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::ConnectionTimeout(_) => true,
            DriverError::PoolError(_) => true,
            DriverError::ArtifactResolutionFailure { reason, .. } => {
                // Network hiccups while talking to the repository
                reason.contains("timeout") || reason.contains("Timeout")
            }
            DriverError::InternalError(msg) => msg.contains("timeout") || msg.contains("Timeout"),
            _ => false,
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DriverError::ConnectionFailed(_)
                | DriverError::NoAcceptingDriver(_)
                | DriverError::PoolClosed(_)
        )
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        if matches!(
            self,
            DriverError::ModuleNotFound(_)
                | DriverError::DuplicateActiveDriver(_)
                | DriverError::ConfigError(_)
                | DriverError::DataSourceNotFound(_)
                | DriverError::DriverNotFound(_)
        ) {
            return ErrorCategory::Validation;
        }
        if self.is_connection_error() {
            return ErrorCategory::ConnectionLost;
        }
        if self.is_retryable() {
            return ErrorCategory::Transient;
        }
        ErrorCategory::Fatal
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
