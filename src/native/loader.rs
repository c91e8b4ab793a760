//! Loading compiled artifacts and calling their entry points.
//!
//! All `unsafe` touching a loaded artifact lives in this module. The artifact is opened with
//! `RTLD_NOW | RTLD_LOCAL`: every symbol must resolve at load time and nothing
//! it defines becomes visible to later loads.

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::ExecutionError;

type EntryFn = unsafe extern "C" fn();

/// Whether this build can load artifacts at all.
pub const LOADER_AVAILABLE: bool = cfg!(unix);

#[cfg(unix)]
mod platform {
    use std::os::raw::{c_char, c_int, c_void};

    #[cfg_attr(target_os = "linux", link(name = "dl"))]
    extern "C" {
        fn dlopen(filename: *const c_char, flag: c_int) -> *mut c_void;
        fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
        fn dlclose(handle: *mut c_void) -> c_int;
        fn dlerror() -> *mut c_char;
    }

    extern "C" {
        fn fflush(stream: *mut c_void) -> c_int;
    }

    const RTLD_NOW: c_int = 2;
    #[cfg(target_os = "macos")]
    const RTLD_LOCAL: c_int = 4;
    #[cfg(not(target_os = "macos"))]
    const RTLD_LOCAL: c_int = 0;

    pub(super) unsafe fn open(path: *const c_char) -> *mut c_void {
        dlopen(path, RTLD_NOW | RTLD_LOCAL)
    }

    pub(super) unsafe fn symbol(
        handle: *mut c_void,
        name: *const c_char,
    ) -> *mut c_void {
        // clear any stale error before the lookup
        dlerror();
        dlsym(handle, name)
    }

    pub(super) unsafe fn close(handle: *mut c_void) -> bool {
        dlclose(handle) == 0
    }

    pub(super) unsafe fn last_error() -> Option<String> {
        let msg = dlerror();
        if msg.is_null() {
            None
        } else {
            Some(
                std::ffi::CStr::from_ptr(msg)
                    .to_string_lossy()
                    .into_owned(),
            )
        }
    }

    pub(super) unsafe fn flush_stdio() {
        fflush(std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
mod platform {
    use std::os::raw::{c_char, c_void};

    pub(super) unsafe fn open(_path: *const c_char) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub(super) unsafe fn symbol(
        _handle: *mut c_void,
        _name: *const c_char,
    ) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub(super) unsafe fn close(_handle: *mut c_void) -> bool {
        true
    }

    pub(super) unsafe fn last_error() -> Option<String> {
        Some("dynamic loading is not supported on this platform".to_string())
    }

    pub(super) unsafe fn flush_stdio() {}
}

/// A loaded artifact with its resolved entry point.
///
/// Unloaded on drop. Not `Send`: it is created, invoked and dropped within a
/// single `run` call on one thread.
pub struct CompiledArtifact {
    handle: *mut c_void,
    entry: EntryFn,
    path: PathBuf,
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("path", &self.path)
            .finish()
    }
}

impl CompiledArtifact {
    /// Load the shared object at `path` and resolve `entry`.
    pub fn load(
        path: &Path,
        entry: &str,
    ) -> Result<Self, ExecutionError> {
        let c_path = path_to_cstring(path)?;
        let c_entry = CString::new(entry)
            .map_err(|_| ExecutionError::load_failed("entry symbol contains a NUL byte"))?;

        // SAFETY: both pointers are valid NUL-terminated strings for the call.
        let handle = unsafe { platform::open(c_path.as_ptr()) };
        if handle.is_null() {
            return Err(ExecutionError::load_failed(loader_message(&format!(
                "cannot open {}",
                path.display()
            ))));
        }

        // SAFETY: `handle` is a live handle returned by dlopen above.
        let sym = unsafe { platform::symbol(handle, c_entry.as_ptr()) };
        if sym.is_null() {
            let reason = loader_message(&format!("entry symbol {} not found", entry));
            // SAFETY: closing the handle we just opened; nothing refers into it.
            unsafe { platform::close(handle) };
            return Err(ExecutionError::load_failed(reason));
        }

        // SAFETY: the entry was generated as `void name(void)` with C linkage.
        let entry: EntryFn = unsafe { std::mem::transmute::<*mut c_void, EntryFn>(sym) };
        debug!("loaded {} ({:p})", path.display(), handle);
        Ok(Self {
            handle,
            entry,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call the entry point once on the current thread.
    ///
    /// Rust's stdout is flushed before the call and C stdio buffers after it,
    /// so native output interleaves in call order. A fault inside native code
    /// is not caught.
    pub fn invoke(&self) {
        use std::io::Write;

        if let Err(err) = std::io::stdout().flush() {
            warn!("failed to flush stdout before native call: {}", err);
        }
        // SAFETY: `entry` was resolved from `handle`, which stays loaded until
        // `self` is dropped; the function takes no arguments.
        unsafe {
            (self.entry)();
            platform::flush_stdio();
        }
    }
}

impl Drop for CompiledArtifact {
    fn drop(&mut self) {
        // SAFETY: `handle` came from dlopen and is closed exactly once here.
        let closed = unsafe { platform::close(self.handle) };
        if !closed {
            warn!(
                "failed to unload {}: {}",
                self.path.display(),
                loader_message("dlclose failed")
            );
        }
    }
}

fn loader_message(context: &str) -> String {
    // SAFETY: dlerror returns a thread-local string or null.
    match unsafe { platform::last_error() } {
        Some(msg) => format!("{}: {}", context, msg),
        None => context.to_string(),
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, ExecutionError> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path.to_string_lossy().into_owned().into_bytes();

    CString::new(bytes).map_err(|_| {
        ExecutionError::load_failed(format!("artifact path {} contains a NUL byte", path.display()))
    })
}
