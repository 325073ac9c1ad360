pub mod engine;
pub mod native;

#[allow(unused_imports)]
pub use engine::{FailingSaveStore, Harness};
#[allow(unused_imports)]
pub use native::{copy_module, sample_module_path, should_run_native_tests};
