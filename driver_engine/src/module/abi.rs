//! C ABI shared between the engine and driver modules.
//!
//! A module is a shared library exporting [`MANIFEST_SYMBOL`], a function
//! returning a pointer to a static [`ModuleManifest`]. The manifest lists the
//! connectivity implementations the module provides; each entry carries the
//! implementation id and a [`DriverVTable`]. All strings crossing the boundary
//! are NUL-terminated UTF-8.

use std::ffi::{c_char, c_void, CStr};

/// Bumped on any layout change of the types in this module.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Name of the exported manifest function (`ManifestFn`).
pub const MANIFEST_SYMBOL: &[u8] = b"driver_module_manifest\0";

/// `connect` status codes.
pub const CONNECT_OK: i32 = 0;
pub const CONNECT_NOT_ACCEPTED: i32 = 1;
pub const CONNECT_ERROR: i32 = -1;

pub type ManifestFn = unsafe extern "C" fn() -> *const ModuleManifest;

#[repr(C)]
pub struct ModuleManifest {
    pub abi_version: u32,
    pub provider_count: usize,
    pub providers: *const ProviderEntry,
}

#[repr(C)]
pub struct ProviderEntry {
    pub implementation_id: *const c_char,
    pub vtable: *const DriverVTable,
}

// Manifests and provider tables are immutable statics inside the module.
unsafe impl Sync for ModuleManifest {}
unsafe impl Sync for ProviderEntry {}

/// Metadata requested from a connection through `connection_metadata`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    ProductName = 1,
    ProductVersion = 2,
}

/// Caller-owned buffer a module writes an error message into.
#[repr(C)]
pub struct ErrorBuffer {
    pub data: *mut c_char,
    pub capacity: usize,
}

/// Cancellation probe handed to `connect`. Modules performing long blocking
/// work should poll `is_cancelled(ctx)` and give up when it returns true.
#[repr(C)]
pub struct CancelHandle {
    pub ctx: *const c_void,
    pub is_cancelled: unsafe extern "C" fn(ctx: *const c_void) -> bool,
}

#[repr(C)]
pub struct DriverVTable {
    /// No-argument constructor of the driver instance.
    pub create: unsafe extern "C" fn() -> *mut c_void,
    pub destroy: unsafe extern "C" fn(driver: *mut c_void),
    pub accepts_target: unsafe extern "C" fn(driver: *mut c_void, target: *const c_char) -> bool,
    pub major_version: unsafe extern "C" fn(driver: *mut c_void) -> u32,
    pub minor_version: unsafe extern "C" fn(driver: *mut c_void) -> u32,
    /// Returns one of `CONNECT_OK`, `CONNECT_NOT_ACCEPTED`, `CONNECT_ERROR`.
    /// On `CONNECT_OK`, `*out_connection` holds the new connection handle.
    /// `properties_json` is a JSON object of string values.
    pub connect: unsafe extern "C" fn(
        driver: *mut c_void,
        target: *const c_char,
        properties_json: *const c_char,
        cancel: *const CancelHandle,
        out_connection: *mut *mut c_void,
        error: *mut ErrorBuffer,
    ) -> i32,
    /// Writes the requested metadata (NUL-terminated, truncated to `capacity`)
    /// and returns the full length in bytes, or 0 when unavailable.
    pub connection_metadata: unsafe extern "C" fn(
        connection: *mut c_void,
        key: MetadataKey,
        buffer: *mut c_char,
        capacity: usize,
    ) -> usize,
    pub connection_is_valid: unsafe extern "C" fn(connection: *mut c_void, timeout_secs: u32) -> bool,
    /// Closes and frees the connection handle.
    pub connection_close: unsafe extern "C" fn(connection: *mut c_void),
}

/// Reads a NUL-terminated UTF-8 string owned by the module.
///
/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string that lives at
/// least as long as the returned slice is used.
pub unsafe fn read_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Copies `message` into `buffer` (truncating, always NUL-terminated). Meant
/// for module implementations.
///
/// # Safety
/// `buffer` must be null or point to a valid [`ErrorBuffer`] whose `data`
/// is writable for `capacity` bytes.
pub unsafe fn write_error(buffer: *mut ErrorBuffer, message: &str) {
    if buffer.is_null() {
        return;
    }
    let buffer = &mut *buffer;
    write_c_buffer(buffer.data, buffer.capacity, message);
}

/// Copies `value` into a caller-owned buffer, truncating to fit and always
/// NUL-terminating. Returns the untruncated length of `value`.
///
/// # Safety
/// `data` must be null or writable for `capacity` bytes.
pub unsafe fn write_c_buffer(data: *mut c_char, capacity: usize, value: &str) -> usize {
    if data.is_null() || capacity == 0 {
        return value.len();
    }
    let bytes = value.as_bytes();
    let n = bytes.len().min(capacity - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, data, n);
    *data.add(n) = 0;
    value.len()
}
