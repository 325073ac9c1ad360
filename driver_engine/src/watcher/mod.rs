//! Polling watcher for a driver drop directory.
//!
//! A file is registered once its size has stayed the same for longer than
//! the settling window, and at most once per watcher lifetime. A file seen
//! for the first time counts as stable since its last modification, so a
//! module that was already sitting in the directory does not wait out a
//! full window after discovery.

use crate::error::{DriverError, Result};
use crate::registry::DriverRegistry;
use crate::store::DriverDescriptor;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_SETTLING_WINDOW: Duration = Duration::from_millis(2000);

/// Shared-library extension of the host platform.
pub fn platform_module_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub drop_dir: PathBuf,
    pub extension: String,
    pub scan_interval: Duration,
    pub settling_window: Duration,
}

impl WatcherConfig {
    pub fn new(drop_dir: impl Into<PathBuf>) -> Self {
        Self {
            drop_dir: drop_dir.into(),
            extension: platform_module_extension().to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            settling_window: DEFAULT_SETTLING_WINDOW,
        }
    }
}

/// Target of watcher registrations.
pub trait ModuleRegistrar: Send + Sync {
    fn register_module(&self, path: &Path) -> Result<DriverDescriptor>;
}

impl ModuleRegistrar for DriverRegistry {
    fn register_module(&self, path: &Path) -> Result<DriverDescriptor> {
        self.register(path, &[], None)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingFileState {
    last_observed_size: u64,
    first_observed_at_stable_size: Instant,
}

#[derive(Debug, Default)]
struct WatcherState {
    pending: HashMap<PathBuf, PendingFileState>,
    processed: HashSet<PathBuf>,
}

/// Files handled by one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub registered: Vec<PathBuf>,
    pub duplicates: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.duplicates.is_empty() && self.failed.is_empty()
    }
}

pub struct DirectoryWatcher {
    config: WatcherConfig,
    registrar: Arc<dyn ModuleRegistrar>,
    state: Mutex<WatcherState>,
}

impl DirectoryWatcher {
    pub fn new(config: WatcherConfig, registrar: Arc<dyn ModuleRegistrar>) -> Self {
        Self {
            config,
            registrar,
            state: Mutex::new(WatcherState::default()),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.state
            .lock()
            .map(|s| s.processed.contains(path))
            .unwrap_or(false)
    }

    pub fn scan_once(&self) -> Result<ScanReport> {
        self.scan(Instant::now())
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(self.config.extension.trim_start_matches('.')))
            .unwrap_or(false)
    }

    fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config.drop_dir)? {
            let path = entry?.path();
            if self.matches_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Collects files whose size has been stable past the settling window.
    fn settled_files(&self, now: Instant) -> Result<Vec<PathBuf>> {
        let candidates = self.candidates()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))?;

        let mut settled = Vec::new();
        for path in candidates {
            if state.processed.contains(&path) {
                continue;
            }
            let (size, modified) = match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => (meta.len(), meta.modified().ok()),
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("Skipping {}: {}", path.display(), e);
                    state.pending.remove(&path);
                    continue;
                }
            };

            let stable_from = match state.pending.get_mut(&path) {
                None => {
                    let since = stable_since(now, modified, self.config.settling_window);
                    log::debug!("New file {} ({} bytes)", path.display(), size);
                    state.pending.insert(
                        path.clone(),
                        PendingFileState {
                            last_observed_size: size,
                            first_observed_at_stable_size: since,
                        },
                    );
                    since
                }
                Some(pending) if pending.last_observed_size != size => {
                    log::debug!(
                        "File {} still growing ({} -> {} bytes)",
                        path.display(),
                        pending.last_observed_size,
                        size
                    );
                    pending.last_observed_size = size;
                    pending.first_observed_at_stable_size = now;
                    continue;
                }
                Some(pending) => pending.first_observed_at_stable_size,
            };

            if now.saturating_duration_since(stable_from) > self.config.settling_window {
                state.pending.remove(&path);
                state.processed.insert(path.clone());
                settled.push(path);
            }
        }
        Ok(settled)
    }

    fn scan(&self, now: Instant) -> Result<ScanReport> {
        let settled = self.settled_files(now)?;

        // Registration runs outside the state lock.
        let mut report = ScanReport::default();
        for path in settled {
            match self.registrar.register_module(&path) {
                Ok(descriptor) => {
                    log::info!(
                        "Registered dropped driver {} as {} (id {})",
                        path.display(),
                        descriptor.implementation_id,
                        descriptor.id
                    );
                    report.registered.push(path);
                }
                Err(e) if e.is_duplicate() => {
                    log::info!("Dropped driver {} already active: {}", path.display(), e);
                    report.duplicates.push(path);
                }
                Err(e) => {
                    log::error!("Failed to register dropped driver {}: {}", path.display(), e);
                    report.failed.push(path);
                }
            }
        }
        Ok(report)
    }

    /// Creates the drop directory if needed and polls it on a dedicated
    /// thread until the returned handle is stopped or dropped.
    pub fn start(self: Arc<Self>) -> Result<WatcherHandle> {
        std::fs::create_dir_all(&self.config.drop_dir)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.config.scan_interval;
        log::info!(
            "Watching {} for *.{} every {:?}",
            self.config.drop_dir.display(),
            self.config.extension,
            interval
        );

        let thread = std::thread::Builder::new()
            .name("driver-watcher".to_string())
            .spawn(move || loop {
                if let Err(e) = self.scan_once() {
                    log::error!("Scan of {} failed: {}", self.config.drop_dir.display(), e);
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(WatcherHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Maps a file's modification time onto the scan clock. The age is capped
/// just past the window; a modification time in the future counts as now.
fn stable_since(now: Instant, modified: Option<SystemTime>, window: Duration) -> Instant {
    let age = modified
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .unwrap_or(Duration::ZERO)
        .min(window + Duration::from_millis(1));
    now.checked_sub(age).unwrap_or(now)
}

pub struct WatcherHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Directory watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Default)]
    struct RecordingRegistrar {
        calls: Mutex<Vec<PathBuf>>,
        fail_with: Option<DriverError>,
    }

    impl ModuleRegistrar for RecordingRegistrar {
        fn register_module(&self, path: &Path) -> Result<DriverDescriptor> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            let mut d = DriverDescriptor::new("d", path, "test.Driver", "hash");
            d.id = 1;
            d.created_at = Utc::now();
            Ok(d)
        }
    }

    fn watcher(dir: &Path, registrar: Arc<RecordingRegistrar>) -> DirectoryWatcher {
        let mut config = WatcherConfig::new(dir);
        config.extension = "so".to_string();
        DirectoryWatcher::new(config, registrar)
    }

    const WINDOW: Duration = DEFAULT_SETTLING_WINDOW;

    #[test]
    fn test_growing_file_is_not_registered() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.so");
        let registrar = Arc::new(RecordingRegistrar::default());
        let w = watcher(dir.path(), registrar.clone());
        let t0 = Instant::now();

        std::fs::write(&file, vec![0u8; 10]).unwrap();
        assert!(w.scan(t0).unwrap().is_empty());

        // Size changes: timer resets.
        std::fs::write(&file, vec![0u8; 20]).unwrap();
        assert!(w.scan(t0 + Duration::from_millis(1500)).unwrap().is_empty());
        assert!(w.scan(t0 + Duration::from_millis(3000)).unwrap().is_empty());
        assert!(registrar.calls.lock().unwrap().is_empty());

        let report = w.scan(t0 + Duration::from_millis(3600)).unwrap();
        assert_eq!(report.registered, vec![file.clone()]);
        assert!(w.is_processed(&file));
    }

    #[test]
    fn test_stable_file_registered_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.so");
        std::fs::write(&file, b"module").unwrap();
        // Pin the timer to the first scan.
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let w = watcher(dir.path(), registrar.clone());
        let t0 = Instant::now();

        w.scan(t0).unwrap();
        // Exactly the window is not enough.
        assert!(w.scan(t0 + WINDOW).unwrap().is_empty());
        assert_eq!(w.scan(t0 + WINDOW * 2).unwrap().registered.len(), 1);
        assert!(w.scan(t0 + WINDOW * 4).unwrap().is_empty());
        assert_eq!(registrar.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_old_file_settles_from_its_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.so");
        std::fs::write(&file, b"module").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(10))
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let w = watcher(dir.path(), registrar.clone());

        let t0 = Instant::now();
        let report = w.scan(t0).unwrap();
        assert_eq!(report.registered, vec![file.clone()]);
        assert!(w.scan(t0 + Duration::from_millis(1000)).unwrap().is_empty());
        assert_eq!(registrar.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stable_since_caps_age() {
        let now = Instant::now();
        let window = Duration::from_millis(500);
        let ancient = SystemTime::now() - Duration::from_secs(86_400);
        assert_eq!(
            now.saturating_duration_since(stable_since(now, Some(ancient), window)),
            window + Duration::from_millis(1)
        );
        let future = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(stable_since(now, Some(future), window), now);
        assert_eq!(stable_since(now, None, window), now);
    }

    #[test]
    fn test_other_extensions_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.so")).unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let w = watcher(dir.path(), registrar.clone());
        let t0 = Instant::now();
        w.scan(t0).unwrap();
        assert!(w.scan(t0 + WINDOW * 2).unwrap().is_empty());
        assert!(registrar.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_is_benign_and_processed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("c.so");
        std::fs::write(&file, b"module").unwrap();
        let registrar = Arc::new(RecordingRegistrar {
            fail_with: Some(DriverError::DuplicateActiveDriver("abc".to_string())),
            ..Default::default()
        });
        let w = watcher(dir.path(), registrar.clone());
        let t0 = Instant::now();
        w.scan(t0).unwrap();
        let report = w.scan(t0 + WINDOW * 2).unwrap();
        assert_eq!(report.duplicates, vec![file.clone()]);
        assert!(w.is_processed(&file));
        assert!(w.scan(t0 + WINDOW * 3).unwrap().is_empty());
    }

    #[test]
    fn test_failure_is_processed_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("d.so");
        std::fs::write(&file, b"garbage").unwrap();
        let registrar = Arc::new(RecordingRegistrar {
            fail_with: Some(DriverError::InvalidModule("bad".to_string())),
            ..Default::default()
        });
        let w = watcher(dir.path(), registrar.clone());
        let t0 = Instant::now();
        w.scan(t0).unwrap();
        assert_eq!(w.scan(t0 + WINDOW * 2).unwrap().failed, vec![file]);
        w.scan(t0 + WINDOW * 3).unwrap();
        assert_eq!(registrar.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_missing_directory_errors() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let w = watcher(Path::new("/nonexistent/drop"), registrar);
        assert!(w.scan_once().is_err());
    }

    #[test]
    fn test_start_creates_dir_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let drop_dir = dir.path().join("drop");
        let registrar = Arc::new(RecordingRegistrar::default());
        let mut config = WatcherConfig::new(&drop_dir);
        config.scan_interval = Duration::from_millis(20);
        let w = Arc::new(DirectoryWatcher::new(config, registrar));

        let handle = w.start().unwrap();
        assert!(drop_dir.is_dir());
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
