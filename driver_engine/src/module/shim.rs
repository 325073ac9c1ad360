use super::context::LoadingContext;
use crate::connectivity::{ConnectRequest, Connection, Driver, DriverVersion};
use crate::error::{DriverError, Result};
use std::sync::Arc;

/// Uniform adapter registered with generic resolution in place of the
/// implementation it wraps. Forwards every call, and stops accepting work
/// once its loading context has been released.
pub struct DriverShim {
    inner: Arc<dyn Driver>,
    context: Arc<dyn LoadingContext>,
}

impl DriverShim {
    pub fn new(inner: Arc<dyn Driver>, context: Arc<dyn LoadingContext>) -> Self {
        Self { inner, context }
    }

    pub fn wrapped(&self) -> &Arc<dyn Driver> {
        &self.inner
    }

    pub fn context(&self) -> &Arc<dyn LoadingContext> {
        &self.context
    }
}

impl Driver for DriverShim {
    fn implementation_id(&self) -> &str {
        self.inner.implementation_id()
    }

    fn accepts_target(&self, target: &str) -> bool {
        !self.context.is_released() && self.inner.accepts_target(target)
    }

    fn connect(&self, request: &ConnectRequest) -> Result<Option<Box<dyn Connection>>> {
        if self.context.is_released() {
            return Err(DriverError::ConnectionFailed(format!(
                "Module of {} has been unloaded",
                self.inner.implementation_id()
            )));
        }
        self.inner.connect(request)
    }

    fn version(&self) -> DriverVersion {
        self.inner.version()
    }
}

impl std::fmt::Debug for DriverShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverShim")
            .field("implementation_id", &self.inner.implementation_id())
            .field("module", &self.context.module_path())
            .field("released", &self.context.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectProperties;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StaticContext {
        path: PathBuf,
        released: AtomicBool,
    }

    impl LoadingContext for StaticContext {
        fn module_path(&self) -> &Path {
            &self.path
        }
        fn release(&self) -> Result<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn is_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    struct Conn;

    impl Connection for Conn {
        fn product_name(&self) -> Result<String> {
            Ok("Test".to_string())
        }
        fn product_version(&self) -> Result<String> {
            Ok("1".to_string())
        }
        fn is_valid(&self, _timeout: Duration) -> bool {
            true
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct AnyDriver;

    impl Driver for AnyDriver {
        fn implementation_id(&self) -> &str {
            "test.AnyDriver"
        }
        fn accepts_target(&self, _target: &str) -> bool {
            true
        }
        fn connect(&self, _request: &ConnectRequest) -> Result<Option<Box<dyn Connection>>> {
            let conn: Box<dyn Connection> = Box::new(Conn);
            Ok(Some(conn))
        }
        fn version(&self) -> DriverVersion {
            DriverVersion { major: 3, minor: 1 }
        }
    }

    fn shim() -> (DriverShim, Arc<StaticContext>) {
        let ctx = Arc::new(StaticContext {
            path: PathBuf::from("/tmp/any.so"),
            released: AtomicBool::new(false),
        });
        let shim = DriverShim::new(Arc::new(AnyDriver), ctx.clone());
        (shim, ctx)
    }

    #[test]
    fn test_shim_forwards_calls() {
        let (shim, _ctx) = shim();
        assert_eq!(shim.implementation_id(), "test.AnyDriver");
        assert_eq!(shim.version(), DriverVersion { major: 3, minor: 1 });
        assert!(shim.accepts_target("x"));
        let request = ConnectRequest::new("x", ConnectProperties::new());
        assert!(shim.connect(&request).unwrap().is_some());
    }

    #[test]
    fn test_shim_refuses_after_release() {
        let (shim, ctx) = shim();
        ctx.release().unwrap();
        assert!(!shim.accepts_target("x"));
        let request = ConnectRequest::new("x", ConnectProperties::new());
        assert!(shim.connect(&request).is_err());
    }
}
