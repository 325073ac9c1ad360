//! In-process stand-ins for native modules, shared by unit and integration
//! tests.

use crate::connectivity::{ConnectRequest, Connection, Driver, DriverVersion};
use crate::error::{DriverError, Result};
use crate::module::{DriverShim, LoadedModule, LoadingContext, ModuleLoader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Loads `.env` from the current directory, if present.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Loading context with no libraries behind it.
#[derive(Debug)]
pub struct StaticContext {
    path: PathBuf,
    released: AtomicBool,
    releases: Arc<AtomicUsize>,
}

impl StaticContext {
    pub fn new(path: impl Into<PathBuf>, releases: Arc<AtomicUsize>) -> Self {
        Self {
            path: path.into(),
            released: AtomicBool::new(false),
            releases,
        }
    }
}

impl LoadingContext for StaticContext {
    fn module_path(&self) -> &Path {
        &self.path
    }

    fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn Driver> + Send + Sync>;

/// Serves in-process drivers keyed by module file name. The module file
/// must still exist on disk so content hashing works as in production.
#[derive(Default)]
pub struct StaticModuleLoader {
    // `None` marks a module that declares no providers.
    drivers: RwLock<HashMap<String, Option<DriverFactory>>>,
    loads: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, file_name: &str, factory: DriverFactory) {
        if let Ok(mut drivers) = self.drivers.write() {
            drivers.insert(file_name.to_string(), Some(factory));
        }
    }

    /// Makes `file_name` a well-formed module that declares no providers.
    pub fn provide_empty(&self, file_name: &str) {
        if let Ok(mut drivers) = self.drivers.write() {
            drivers.insert(file_name.to_string(), None);
        }
    }

    /// Registers a [`MockDriver`] for `file_name`, returning the shared
    /// connection statistics of every instance it creates.
    pub fn provide_mock(&self, file_name: &str, implementation_id: &str, prefix: &str) -> Arc<MockStats> {
        let stats = Arc::new(MockStats::default());
        let (id, prefix, shared) = (
            implementation_id.to_string(),
            prefix.to_string(),
            Arc::clone(&stats),
        );
        self.provide(
            file_name,
            Arc::new(move || -> Arc<dyn Driver> {
                Arc::new(MockDriver::with_stats(&id, &prefix, Arc::clone(&shared)))
            }),
        );
        stats
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Contexts released so far, across every module this loader served.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(
        &self,
        module_path: &Path,
        _dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<LoadedModule> {
        if !module_path.is_file() {
            return Err(DriverError::ModuleNotFound(module_path.display().to_string()));
        }
        let file_name = module_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let factory = self
            .drivers
            .read()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?
            .get(&file_name)
            .cloned()
            .ok_or_else(|| DriverError::InvalidModule(format!("no provider for {}", file_name)))?;

        // Opened like a native module, then released when nothing is inside.
        let Some(factory) = factory else {
            let context = StaticContext::new(module_path, Arc::clone(&self.releases));
            context.release()?;
            return Err(DriverError::ImplementationNotFound(format!(
                "No provider declared by {}",
                module_path.display()
            )));
        };
        let driver = factory();
        if let Some(id) = implementation_id {
            if driver.implementation_id() != id {
                return Err(DriverError::ImplementationNotFound(id.to_string()));
            }
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        let context: Arc<dyn LoadingContext> =
            Arc::new(StaticContext::new(module_path, Arc::clone(&self.releases)));
        Ok(LoadedModule {
            shim: Arc::new(DriverShim::new(driver, Arc::clone(&context))),
            context,
        })
    }
}

/// Counters shared between a [`MockDriver`] and the connections it opens.
#[derive(Debug, Default)]
pub struct MockStats {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Open connections: opened minus closed.
    pub fn open(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }
}

/// Accepts targets starting with `prefix`. Recognised target suffixes:
/// `slow` blocks until the request is cancelled (at most ten seconds) and
/// then still returns a connection, `fail` errors, `invalid` opens a
/// connection that fails validation, `nometa` opens one whose metadata
/// calls fail.
pub struct MockDriver {
    implementation_id: String,
    prefix: String,
    stats: Arc<MockStats>,
}

impl MockDriver {
    pub fn new(implementation_id: &str, prefix: &str) -> Self {
        Self::with_stats(implementation_id, prefix, Arc::new(MockStats::default()))
    }

    pub fn with_stats(implementation_id: &str, prefix: &str, stats: Arc<MockStats>) -> Self {
        Self {
            implementation_id: implementation_id.to_string(),
            prefix: prefix.to_string(),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<MockStats> {
        &self.stats
    }
}

impl Driver for MockDriver {
    fn implementation_id(&self) -> &str {
        &self.implementation_id
    }

    fn accepts_target(&self, target: &str) -> bool {
        target.starts_with(&self.prefix)
    }

    fn connect(&self, request: &ConnectRequest) -> Result<Option<Box<dyn Connection>>> {
        let Some(rest) = request.target.strip_prefix(&self.prefix) else {
            return Ok(None);
        };
        match rest {
            "fail" => {
                return Err(DriverError::ConnectionFailed(format!(
                    "{} refused the connection",
                    self.implementation_id
                )))
            }
            "slow" => {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !request.cancel.is_cancelled() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            _ => {}
        }

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        let conn: Box<dyn Connection> = Box::new(MockConnection {
            product: self.implementation_id.clone(),
            valid: rest != "invalid",
            metadata: rest != "nometa",
            user: request.properties.get("user").map(str::to_string),
            closed: false,
            stats: Arc::clone(&self.stats),
        });
        Ok(Some(conn))
    }

    fn version(&self) -> DriverVersion {
        DriverVersion { major: 1, minor: 0 }
    }
}

pub struct MockConnection {
    product: String,
    valid: bool,
    metadata: bool,
    user: Option<String>,
    closed: bool,
    stats: Arc<MockStats>,
}

impl MockConnection {
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl Connection for MockConnection {
    fn product_name(&self) -> Result<String> {
        if !self.metadata {
            return Err(DriverError::ConnectionFailed("metadata unavailable".to_string()));
        }
        Ok(self.product.clone())
    }

    fn product_version(&self) -> Result<String> {
        if !self.metadata {
            return Err(DriverError::ConnectionFailed("metadata unavailable".to_string()));
        }
        Ok("1.0".to_string())
    }

    fn is_valid(&self, _timeout: Duration) -> bool {
        self.valid && !self.closed
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Writes a module stand-in whose content (and so content hash) is
/// derived from `content`.
pub fn write_module_file(dir: &Path, file_name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(file_name);
    std::fs::write(&path, content.as_bytes())?;
    Ok(path)
}
