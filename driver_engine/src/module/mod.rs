//! Isolated loading of native driver modules.

pub mod abi;
pub mod context;
pub mod loader;
pub mod native;
pub mod shim;

pub use context::{LoadingContext, NativeModuleContext};
pub use loader::{LoadedModule, ModuleLoader, NativeModuleLoader};
pub use native::{NativeConnection, NativeDriver};
pub use shim::DriverShim;
