//! Locating the `sample_driver` cdylib for tests that load a real module.

use driver_engine::test_helpers::load_dotenv;
use std::path::{Path, PathBuf};

const SAMPLE_MODULE_ENV: &str = "DRIVER_ENGINE_SAMPLE_MODULE";

fn sample_module_file_name() -> String {
    format!(
        "{}sample_driver.{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_EXTENSION
    )
}

/// Path of the built sample module: `DRIVER_ENGINE_SAMPLE_MODULE`, or the
/// workspace `target/{debug,release}` directory.
pub fn sample_module_path() -> Option<PathBuf> {
    load_dotenv();

    if let Some(path) = std::env::var(SAMPLE_MODULE_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
    {
        return path.is_file().then_some(path);
    }

    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).parent()?.to_path_buf();
    let target = std::env::var("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| workspace.join("target"));
    ["debug", "release"]
        .iter()
        .map(|profile| target.join(profile).join(sample_module_file_name()))
        .find(|p| p.is_file())
}

/// True when the sample module is available; tests return early otherwise.
#[allow(dead_code)]
pub fn should_run_native_tests() -> bool {
    match sample_module_path() {
        Some(path) => {
            eprintln!("[OK] Using sample module {}", path.display());
            true
        }
        None => {
            eprintln!("⚠️  Skipping native module test: sample module not built");
            eprintln!(
                "   Run `cargo build -p sample_driver` or set {}",
                SAMPLE_MODULE_ENV
            );
            false
        }
    }
}

/// Copies the sample module into `dir` under `file_name`.
#[allow(dead_code)]
pub fn copy_module(dir: &Path, file_name: &str) -> PathBuf {
    let source = sample_module_path().expect("sample module");
    let dest = dir.join(file_name);
    std::fs::copy(&source, &dest).expect("copy sample module");
    dest
}
