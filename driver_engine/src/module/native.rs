use super::abi::{
    CancelHandle, DriverVTable, ErrorBuffer, MetadataKey, CONNECT_NOT_ACCEPTED, CONNECT_OK,
};
use super::context::NativeModuleContext;
use crate::connectivity::{CancelToken, ConnectRequest, Connection, Driver, DriverVersion};
use crate::error::{DriverError, Result};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;
use std::time::Duration;

const ERROR_BUFFER_SIZE: usize = 1024;
const METADATA_BUFFER_SIZE: usize = 256;

/// Driver instance living inside a native module, driven through its vtable.
pub struct NativeDriver {
    implementation_id: String,
    vtable: *const DriverVTable,
    instance: *mut c_void,
    // Dropped after `destroy` runs, keeping the library mapped until then.
    context: Arc<NativeModuleContext>,
}

// Module contract: driver instances and connections are safe to use from any
// thread, connections from one thread at a time.
unsafe impl Send for NativeDriver {}
unsafe impl Sync for NativeDriver {}

impl NativeDriver {
    /// # Safety
    /// `vtable` must point to a static table inside the library owned by
    /// `context`.
    pub(crate) unsafe fn instantiate(
        context: Arc<NativeModuleContext>,
        implementation_id: String,
        vtable: *const DriverVTable,
    ) -> Result<Self> {
        let instance = ((*vtable).create)();
        if instance.is_null() {
            return Err(DriverError::InvalidModule(format!(
                "Constructor of {} returned null",
                implementation_id
            )));
        }
        Ok(Self {
            implementation_id,
            vtable,
            instance,
            context,
        })
    }

    fn vtable(&self) -> &DriverVTable {
        unsafe { &*self.vtable }
    }

    pub fn context(&self) -> &Arc<NativeModuleContext> {
        &self.context
    }
}

unsafe extern "C" fn probe_cancel(ctx: *const c_void) -> bool {
    if ctx.is_null() {
        return false;
    }
    (*(ctx as *const CancelToken)).is_cancelled()
}

impl Driver for NativeDriver {
    fn implementation_id(&self) -> &str {
        &self.implementation_id
    }

    fn accepts_target(&self, target: &str) -> bool {
        let Ok(target) = CString::new(target) else {
            return false;
        };
        unsafe { (self.vtable().accepts_target)(self.instance, target.as_ptr()) }
    }

    fn connect(&self, request: &ConnectRequest) -> Result<Option<Box<dyn Connection>>> {
        let target = CString::new(request.target.as_str())
            .map_err(|_| DriverError::ConnectionFailed("Target contains NUL byte".to_string()))?;
        let properties = CString::new(request.properties.to_json()?).map_err(|_| {
            DriverError::ConnectionFailed("Connection property contains NUL byte".to_string())
        })?;
        let cancel = CancelHandle {
            ctx: &request.cancel as *const CancelToken as *const c_void,
            is_cancelled: probe_cancel,
        };
        let mut message = vec![0 as c_char; ERROR_BUFFER_SIZE];
        let mut error = ErrorBuffer {
            data: message.as_mut_ptr(),
            capacity: message.len(),
        };
        let mut handle: *mut c_void = std::ptr::null_mut();

        let rc = unsafe {
            (self.vtable().connect)(
                self.instance,
                target.as_ptr(),
                properties.as_ptr(),
                &cancel,
                &mut handle,
                &mut error,
            )
        };

        match rc {
            CONNECT_OK if handle.is_null() => Err(DriverError::InvalidModule(format!(
                "{} reported success without a connection",
                self.implementation_id
            ))),
            CONNECT_OK => {
                let conn: Box<dyn Connection> = Box::new(NativeConnection {
                    handle,
                    vtable: self.vtable,
                    closed: false,
                    _context: Arc::clone(&self.context),
                });
                Ok(Some(conn))
            }
            CONNECT_NOT_ACCEPTED => Ok(None),
            code => {
                let text = unsafe { CStr::from_ptr(message.as_ptr()) }
                    .to_string_lossy()
                    .into_owned();
                let text = if text.is_empty() {
                    format!("{} failed with code {}", self.implementation_id, code)
                } else {
                    text
                };
                Err(DriverError::ConnectionFailed(text))
            }
        }
    }

    fn version(&self) -> DriverVersion {
        let vt = self.vtable();
        unsafe {
            DriverVersion {
                major: (vt.major_version)(self.instance),
                minor: (vt.minor_version)(self.instance),
            }
        }
    }
}

impl Drop for NativeDriver {
    fn drop(&mut self) {
        unsafe { (self.vtable().destroy)(self.instance) };
    }
}

/// Connection handle owned by a native module.
pub struct NativeConnection {
    handle: *mut c_void,
    vtable: *const DriverVTable,
    closed: bool,
    _context: Arc<NativeModuleContext>,
}

unsafe impl Send for NativeConnection {}

impl NativeConnection {
    fn vtable(&self) -> &DriverVTable {
        unsafe { &*self.vtable }
    }

    fn metadata(&self, key: MetadataKey) -> Result<String> {
        if self.closed {
            return Err(DriverError::ConnectionFailed("Connection is closed".to_string()));
        }
        let mut buffer = vec![0 as c_char; METADATA_BUFFER_SIZE];
        let mut len = unsafe {
            (self.vtable().connection_metadata)(self.handle, key, buffer.as_mut_ptr(), buffer.len())
        };
        if len >= buffer.len() {
            buffer = vec![0 as c_char; len + 1];
            len = unsafe {
                (self.vtable().connection_metadata)(
                    self.handle,
                    key,
                    buffer.as_mut_ptr(),
                    buffer.len(),
                )
            };
        }
        if len == 0 {
            return Err(DriverError::ConnectionFailed(format!(
                "Metadata {:?} unavailable",
                key
            )));
        }
        Ok(unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }
}

impl Connection for NativeConnection {
    fn product_name(&self) -> Result<String> {
        self.metadata(MetadataKey::ProductName)
    }

    fn product_version(&self) -> Result<String> {
        self.metadata(MetadataKey::ProductVersion)
    }

    fn is_valid(&self, timeout: Duration) -> bool {
        if self.closed {
            return false;
        }
        let secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        unsafe { (self.vtable().connection_is_valid)(self.handle, secs) }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            unsafe { (self.vtable().connection_close)(self.handle) };
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for NativeConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
