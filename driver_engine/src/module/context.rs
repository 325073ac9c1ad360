use crate::error::Result;
use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// An isolated loading context: the set of resources a loaded module lives
/// in. Releasing a context makes every adapter built on it refuse new work;
/// the underlying resources are freed once the last adapter referencing them
/// is gone.
pub trait LoadingContext: Send + Sync {
    fn module_path(&self) -> &Path;

    fn release(&self) -> Result<()>;

    fn is_released(&self) -> bool;
}

/// Loading context for a native module: the module library plus the
/// dependency libraries opened before it, each with local symbol visibility.
pub struct NativeModuleContext {
    module_path: PathBuf,
    // Field order matters: the module is closed before its dependencies.
    module: Library,
    dependencies: Vec<Library>,
    released: AtomicBool,
}

impl NativeModuleContext {
    pub(crate) fn new(module_path: &Path, module: Library, dependencies: Vec<Library>) -> Self {
        Self {
            module_path: module_path.to_path_buf(),
            module,
            dependencies,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn library(&self) -> &Library {
        &self.module
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }
}

impl LoadingContext for NativeModuleContext {
    fn module_path(&self) -> &Path {
        &self.module_path
    }

    fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            log::info!(
                "Released loading context for {}",
                self.module_path.display()
            );
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for NativeModuleContext {
    fn drop(&mut self) {
        log::debug!(
            "Closing module {} ({} dependencies)",
            self.module_path.display(),
            self.dependencies.len()
        );
    }
}
