//! Sample driver module.
//!
//! Provides two implementations through the module manifest:
//!
//! - `sample.SampleDriver` accepts `sample:` targets and reports product
//!   `SampleDB` 1.0.
//! - `sample.LegacyDriver` accepts `legacy:` targets and reports product
//!   `SampleDB Legacy` 0.9.
//!
//! Target names drive behaviour: `<prefix>fail` refuses the connection,
//! `<prefix>hang` blocks until the connect is cancelled, `<prefix>stale`
//! connects but fails validation, and a `user` property of `denied` is
//! rejected. Anything else connects.

use driver_engine::module::abi::{
    read_c_str, write_c_buffer, write_error, CancelHandle, DriverVTable, ErrorBuffer, MetadataKey,
    ModuleManifest, ProviderEntry, CONNECT_ERROR, CONNECT_NOT_ACCEPTED, CONNECT_OK,
    MODULE_ABI_VERSION,
};
use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const HANG_LIMIT: Duration = Duration::from_secs(30);

static OPEN_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);
static LIVE_DRIVERS: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy)]
struct SampleDriver {
    prefix: &'static str,
    product: &'static str,
    version: (u32, u32),
}

const SAMPLE: SampleDriver = SampleDriver {
    prefix: "sample:",
    product: "SampleDB",
    version: (1, 0),
};

const LEGACY: SampleDriver = SampleDriver {
    prefix: "legacy:",
    product: "SampleDB Legacy",
    version: (0, 9),
};

struct SampleConnection {
    product: &'static str,
    version: String,
    database: String,
}

impl SampleDriver {
    fn accepts(&self, target: &str) -> bool {
        target.starts_with(self.prefix)
    }

    fn open(
        &self,
        target: &str,
        properties: &HashMap<String, String>,
        cancel: Option<&CancelHandle>,
    ) -> Result<Option<SampleConnection>, String> {
        let Some(database) = target.strip_prefix(self.prefix) else {
            return Ok(None);
        };
        if properties.get("user").map(String::as_str) == Some("denied") {
            return Err("access denied for user 'denied'".to_string());
        }
        match database {
            "fail" => return Err("connection refused".to_string()),
            "hang" => {
                let started = Instant::now();
                loop {
                    if cancel.map(is_cancelled).unwrap_or(false) {
                        return Err("connect cancelled".to_string());
                    }
                    if started.elapsed() > HANG_LIMIT {
                        return Err("connect timed out".to_string());
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            _ => {}
        }
        Ok(Some(SampleConnection {
            product: self.product,
            version: format!("{}.{}", self.version.0, self.version.1),
            database: database.to_string(),
        }))
    }
}

fn is_cancelled(cancel: &CancelHandle) -> bool {
    unsafe { (cancel.is_cancelled)(cancel.ctx) }
}

/// Runs `f`, turning a panic into `fallback` so it never unwinds into the
/// host.
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

unsafe fn driver<'a>(ptr: *mut c_void) -> Option<&'a SampleDriver> {
    (ptr as *const SampleDriver).as_ref()
}

fn create(template: &SampleDriver) -> *mut c_void {
    LIVE_DRIVERS.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(*template)) as *mut c_void
}

unsafe extern "C" fn create_sample() -> *mut c_void {
    guard(std::ptr::null_mut(), || create(&SAMPLE))
}

unsafe extern "C" fn create_legacy() -> *mut c_void {
    guard(std::ptr::null_mut(), || create(&LEGACY))
}

unsafe extern "C" fn destroy(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    guard((), || {
        drop(Box::from_raw(ptr as *mut SampleDriver));
        LIVE_DRIVERS.fetch_sub(1, Ordering::SeqCst);
    })
}

unsafe extern "C" fn accepts_target(ptr: *mut c_void, target: *const c_char) -> bool {
    guard(false, || match (driver(ptr), read_c_str(target)) {
        (Some(d), Some(t)) => d.accepts(t),
        _ => false,
    })
}

unsafe extern "C" fn major_version(ptr: *mut c_void) -> u32 {
    guard(0, || driver(ptr).map(|d| d.version.0).unwrap_or(0))
}

unsafe extern "C" fn minor_version(ptr: *mut c_void) -> u32 {
    guard(0, || driver(ptr).map(|d| d.version.1).unwrap_or(0))
}

unsafe extern "C" fn connect(
    ptr: *mut c_void,
    target: *const c_char,
    properties_json: *const c_char,
    cancel: *const CancelHandle,
    out_connection: *mut *mut c_void,
    error: *mut ErrorBuffer,
) -> i32 {
    guard(CONNECT_ERROR, || {
        let (Some(d), Some(target)) = (driver(ptr), read_c_str(target)) else {
            write_error(error, "invalid arguments");
            return CONNECT_ERROR;
        };
        if out_connection.is_null() {
            write_error(error, "invalid arguments");
            return CONNECT_ERROR;
        }
        let properties: HashMap<String, String> = match read_c_str(properties_json) {
            Some(json) => match serde_json::from_str(json) {
                Ok(p) => p,
                Err(e) => {
                    write_error(error, &format!("invalid properties: {}", e));
                    return CONNECT_ERROR;
                }
            },
            None => HashMap::new(),
        };

        match d.open(target, &properties, cancel.as_ref()) {
            Ok(Some(conn)) => {
                OPEN_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                *out_connection = Box::into_raw(Box::new(conn)) as *mut c_void;
                CONNECT_OK
            }
            Ok(None) => CONNECT_NOT_ACCEPTED,
            Err(message) => {
                write_error(error, &message);
                CONNECT_ERROR
            }
        }
    })
}

unsafe extern "C" fn connection_metadata(
    conn: *mut c_void,
    key: MetadataKey,
    buffer: *mut c_char,
    capacity: usize,
) -> usize {
    guard(0, || {
        let Some(conn) = (conn as *const SampleConnection).as_ref() else {
            return 0;
        };
        let value = match key {
            MetadataKey::ProductName => conn.product,
            MetadataKey::ProductVersion => conn.version.as_str(),
        };
        write_c_buffer(buffer, capacity, value)
    })
}

unsafe extern "C" fn connection_is_valid(conn: *mut c_void, _timeout_secs: u32) -> bool {
    guard(false, || {
        (conn as *const SampleConnection)
            .as_ref()
            .map(|c| c.database != "stale")
            .unwrap_or(false)
    })
}

unsafe extern "C" fn connection_close(conn: *mut c_void) {
    if conn.is_null() {
        return;
    }
    guard((), || {
        drop(Box::from_raw(conn as *mut SampleConnection));
        OPEN_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
    })
}

const SAMPLE_VTABLE: DriverVTable = DriverVTable {
    create: create_sample,
    destroy,
    accepts_target,
    major_version,
    minor_version,
    connect,
    connection_metadata,
    connection_is_valid,
    connection_close,
};

const LEGACY_VTABLE: DriverVTable = DriverVTable {
    create: create_legacy,
    ..SAMPLE_VTABLE
};

static PROVIDERS: [ProviderEntry; 2] = [
    ProviderEntry {
        implementation_id: b"sample.SampleDriver\0".as_ptr() as *const c_char,
        vtable: &SAMPLE_VTABLE,
    },
    ProviderEntry {
        implementation_id: b"sample.LegacyDriver\0".as_ptr() as *const c_char,
        vtable: &LEGACY_VTABLE,
    },
];

static MANIFEST: ModuleManifest = ModuleManifest {
    abi_version: MODULE_ABI_VERSION,
    provider_count: 2,
    providers: &PROVIDERS as *const [ProviderEntry; 2] as *const ProviderEntry,
};

#[no_mangle]
pub extern "C" fn driver_module_manifest() -> *const ModuleManifest {
    &MANIFEST
}

/// Connections opened and not yet closed, across every instance.
#[no_mangle]
pub extern "C" fn sample_open_connections() -> usize {
    OPEN_CONNECTIONS.load(Ordering::SeqCst)
}

/// Driver instances created and not yet destroyed.
#[no_mangle]
pub extern "C" fn sample_live_drivers() -> usize {
    LIVE_DRIVERS.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_lists_both_providers() {
        let manifest = unsafe { &*driver_module_manifest() };
        assert_eq!(manifest.abi_version, MODULE_ABI_VERSION);
        let providers =
            unsafe { std::slice::from_raw_parts(manifest.providers, manifest.provider_count) };
        let ids: Vec<&str> = providers
            .iter()
            .map(|p| unsafe { read_c_str(p.implementation_id) }.unwrap())
            .collect();
        assert_eq!(ids, vec!["sample.SampleDriver", "sample.LegacyDriver"]);
    }

    #[test]
    fn test_open_rules() {
        let props = HashMap::new();
        assert!(SAMPLE.open("other:db", &props, None).unwrap().is_none());
        assert!(SAMPLE.open("sample:fail", &props, None).is_err());
        let conn = SAMPLE.open("sample:orders", &props, None).unwrap().unwrap();
        assert_eq!(conn.product, "SampleDB");
        assert_eq!(conn.version, "1.0");

        let denied = HashMap::from([("user".to_string(), "denied".to_string())]);
        assert!(SAMPLE.open("sample:orders", &denied, None).is_err());
        assert!(LEGACY.accepts("legacy:db") && !LEGACY.accepts("sample:db"));
    }

    #[test]
    fn test_connect_through_vtable() {
        unsafe {
            let d = (SAMPLE_VTABLE.create)();
            assert!(!d.is_null());
            let mut out: *mut c_void = std::ptr::null_mut();
            let mut buf = [0 as c_char; 64];
            let mut error = ErrorBuffer {
                data: buf.as_mut_ptr(),
                capacity: buf.len(),
            };
            let code = (SAMPLE_VTABLE.connect)(
                d,
                b"sample:db\0".as_ptr() as *const c_char,
                b"{}\0".as_ptr() as *const c_char,
                std::ptr::null(),
                &mut out,
                &mut error,
            );
            assert_eq!(code, CONNECT_OK);
            let mut name = [0 as c_char; 32];
            let len = (SAMPLE_VTABLE.connection_metadata)(
                out,
                MetadataKey::ProductName,
                name.as_mut_ptr(),
                name.len(),
            );
            assert_eq!(len, "SampleDB".len());
            assert!((SAMPLE_VTABLE.connection_is_valid)(out, 1));
            (SAMPLE_VTABLE.connection_close)(out);
            (SAMPLE_VTABLE.destroy)(d);
        }
    }
}
