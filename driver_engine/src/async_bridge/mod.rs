use crate::error::{DriverError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};

pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 16;

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();
static MAX_BLOCKING_THREADS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_BLOCKING_THREADS);

fn get_runtime() -> Result<&'static Runtime> {
    let runtime = RUNTIME.get_or_init(|| {
        let max_blocking = MAX_BLOCKING_THREADS.load(Ordering::SeqCst).max(1);
        Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(max_blocking)
            .thread_name("driver-engine-worker")
            .enable_time()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))
    });

    match runtime {
        Ok(rt) => Ok(rt),
        Err(msg) => Err(DriverError::InternalError(msg.clone())),
    }
}

/// Sizes the blocking-worker pool and starts the shared runtime. Only the
/// first call that reaches the runtime decides its size.
pub fn init_runtime(max_blocking_threads: usize) {
    if RUNTIME.get().is_some() {
        log::debug!("Async runtime already initialized; ignoring max_blocking_threads={}", max_blocking_threads);
        return;
    }
    MAX_BLOCKING_THREADS.store(max_blocking_threads.max(1), Ordering::SeqCst);
    if let Err(e) = get_runtime() {
        log::error!("init_runtime failed: {}", e);
    }
}

/// Runs `f` to completion on the shared runtime. Callers already inside a
/// runtime are parked while a scoped thread drives the future.
pub fn execute_async<F, R>(f: F) -> Result<R>
where
    F: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let runtime = get_runtime()?;
    if tokio::runtime::Handle::try_current().is_err() {
        return runtime.block_on(f);
    }

    log::debug!("execute_async called inside a runtime; blocking on a helper thread");
    std::thread::scope(|scope| {
        scope
            .spawn(|| runtime.block_on(f))
            .join()
            .map_err(|_| DriverError::InternalError("Async bridge thread panicked".to_string()))?
    })
}
