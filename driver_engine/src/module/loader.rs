use super::abi::{read_c_str, DriverVTable, ManifestFn, MANIFEST_SYMBOL, MODULE_ABI_VERSION};
use super::context::{LoadingContext, NativeModuleContext};
use super::native::NativeDriver;
use super::shim::DriverShim;
use crate::connectivity::Driver;
use crate::error::{DriverError, Result};
use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A module loaded into its own context, exposed through a [`DriverShim`].
pub struct LoadedModule {
    pub context: Arc<dyn LoadingContext>,
    pub shim: Arc<DriverShim>,
}

impl LoadedModule {
    pub fn implementation_id(&self) -> &str {
        self.shim.implementation_id()
    }
}

pub trait ModuleLoader: Send + Sync {
    /// Loads `module_path` with its dependency files into a fresh isolated
    /// context. Without `implementation_id` the first provider declared by
    /// the module is used.
    fn load(
        &self,
        module_path: &Path,
        dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<LoadedModule>;
}

/// Loads native shared libraries with local symbol visibility.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn open_local(path: &Path) -> Result<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
    let lib = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map_err(|e| {
        DriverError::InvalidModule(format!("Cannot open {}: {}", path.display(), e))
    })?;
    Ok(Library::from(lib))
}

#[cfg(not(unix))]
fn open_local(path: &Path) -> Result<Library> {
    unsafe { Library::new(path) }.map_err(|e| {
        DriverError::InvalidModule(format!("Cannot open {}: {}", path.display(), e))
    })
}

struct ProviderInfo {
    implementation_id: String,
    vtable: *const DriverVTable,
}

/// Reads the provider list of the module's manifest. A library without the
/// manifest export declares no providers.
fn read_providers(module: &Library, module_path: &Path) -> Result<Vec<ProviderInfo>> {
    let manifest_fn = match unsafe { module.get::<ManifestFn>(MANIFEST_SYMBOL) } {
        Ok(f) => f,
        Err(_) => return Ok(Vec::new()),
    };
    let manifest = unsafe { manifest_fn() };
    if manifest.is_null() {
        return Err(DriverError::InvalidModule(format!(
            "{}: manifest is null",
            module_path.display()
        )));
    }
    let manifest = unsafe { &*manifest };
    if manifest.abi_version != MODULE_ABI_VERSION {
        return Err(DriverError::InvalidModule(format!(
            "{}: ABI version {} (expected {})",
            module_path.display(),
            manifest.abi_version,
            MODULE_ABI_VERSION
        )));
    }
    if manifest.provider_count == 0 {
        return Ok(Vec::new());
    }
    if manifest.providers.is_null() {
        return Err(DriverError::InvalidModule(format!(
            "{}: provider table is null",
            module_path.display()
        )));
    }

    let entries = unsafe { std::slice::from_raw_parts(manifest.providers, manifest.provider_count) };
    let mut providers = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let id = unsafe { read_c_str(entry.implementation_id) }.ok_or_else(|| {
            DriverError::InvalidModule(format!(
                "{}: provider {} has no valid implementation id",
                module_path.display(),
                i
            ))
        })?;
        if entry.vtable.is_null() {
            return Err(DriverError::InvalidModule(format!(
                "{}: provider {} has no vtable",
                module_path.display(),
                id
            )));
        }
        providers.push(ProviderInfo {
            implementation_id: id.to_string(),
            vtable: entry.vtable,
        });
    }
    Ok(providers)
}

fn select_provider(
    providers: Vec<ProviderInfo>,
    implementation_id: Option<&str>,
    module_path: &Path,
) -> Result<ProviderInfo> {
    match implementation_id {
        Some(id) => providers
            .into_iter()
            .find(|p| p.implementation_id == id)
            .ok_or_else(|| {
                DriverError::ImplementationNotFound(format!("{} in {}", id, module_path.display()))
            }),
        None => {
            if providers.len() > 1 {
                log::warn!(
                    "{} declares {} providers, using the first ({})",
                    module_path.display(),
                    providers.len(),
                    providers[0].implementation_id
                );
            }
            providers.into_iter().next().ok_or_else(|| {
                DriverError::ImplementationNotFound(format!(
                    "No provider declared by {}",
                    module_path.display()
                ))
            })
        }
    }
}

impl NativeModuleLoader {
    fn instantiate(
        context: &Arc<NativeModuleContext>,
        module_path: &Path,
        implementation_id: Option<&str>,
    ) -> Result<NativeDriver> {
        let providers = read_providers(context.library(), module_path)?;
        let provider = select_provider(providers, implementation_id, module_path)?;
        unsafe {
            NativeDriver::instantiate(
                Arc::clone(context),
                provider.implementation_id,
                provider.vtable,
            )
        }
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn load(
        &self,
        module_path: &Path,
        dependency_paths: &[PathBuf],
        implementation_id: Option<&str>,
    ) -> Result<LoadedModule> {
        if !module_path.is_file() {
            return Err(DriverError::ModuleNotFound(module_path.display().to_string()));
        }

        let mut dependencies = Vec::with_capacity(dependency_paths.len());
        for dep in dependency_paths {
            if !dep.is_file() {
                log::warn!("{}", DriverError::DependencyNotFound(dep.display().to_string()));
                continue;
            }
            dependencies.push(open_local(dep)?);
        }

        let module = open_local(module_path)?;
        let context = Arc::new(NativeModuleContext::new(module_path, module, dependencies));

        let driver = match Self::instantiate(&context, module_path, implementation_id) {
            Ok(driver) => driver,
            Err(e) => {
                let _ = context.release();
                return Err(e);
            }
        };

        log::info!(
            "Loaded {} v{} from {}",
            driver.implementation_id(),
            driver.version(),
            module_path.display()
        );

        let context: Arc<dyn LoadingContext> = context;
        let inner: Arc<dyn Driver> = Arc::new(driver);
        let shim = Arc::new(DriverShim::new(inner, Arc::clone(&context)));
        Ok(LoadedModule { context, shim })
    }
}
