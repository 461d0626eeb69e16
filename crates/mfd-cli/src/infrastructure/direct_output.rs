//! [`DriverBinding`] over the vendor `DirectOutput.dll`.
//!
//! The library is loaded at runtime with `LoadLibraryW` and every export is
//! resolved with `GetProcAddress`, so the binary starts (and reports a clean
//! error) on machines without the Saitek/Logitech software installed.
//!
//! # Callbacks
//!
//! The C API takes a function pointer plus a `void* pCtxt` for each callback.
//! Each Rust closure is boxed, the box address is passed as `pCtxt`, and an
//! `extern "system"` trampoline turns it back into the closure on the driver
//! thread.  The boxes are owned by the binding and only released after
//! `DirectOutput_Deinitialize`, when the driver no longer calls them.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mfd_core::driver::{DeviceChangeCallback, PageChangeCallback, SoftButtonCallback};
use mfd_core::{DeviceHandle, DriverBinding, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use windows::core::{s, GUID, PCSTR, PCWSTR};
use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

/// Failure to load the vendor library.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("failed to load {path}: {source}")]
    LibraryNotFound {
        path: PathBuf,
        #[source]
        source: windows::core::Error,
    },

    #[error("{0} is missing from the DirectOutput library")]
    MissingSymbol(&'static str),
}

// ── C signatures ──────────────────────────────────────────────────────────────

type DeviceChangeProc = unsafe extern "system" fn(*mut c_void, bool, *mut c_void);
type EnumerateProc = unsafe extern "system" fn(*mut c_void, *mut c_void);
type PageChangeProc = unsafe extern "system" fn(*mut c_void, u32, bool, *mut c_void);
type SoftButtonProc = unsafe extern "system" fn(*mut c_void, u32, *mut c_void);

type InitializeFn = unsafe extern "system" fn(PCWSTR) -> u32;
type DeinitializeFn = unsafe extern "system" fn() -> u32;
type RegisterDeviceCallbackFn = unsafe extern "system" fn(DeviceChangeProc, *mut c_void) -> u32;
type EnumerateFn = unsafe extern "system" fn(EnumerateProc, *mut c_void) -> u32;
type RegisterPageCallbackFn =
    unsafe extern "system" fn(*mut c_void, PageChangeProc, *mut c_void) -> u32;
type RegisterSoftButtonCallbackFn =
    unsafe extern "system" fn(*mut c_void, SoftButtonProc, *mut c_void) -> u32;
type AddPageFn = unsafe extern "system" fn(*mut c_void, u32, PCWSTR, u32) -> u32;
type SetStringFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32, PCWSTR) -> u32;
type GetDeviceTypeFn = unsafe extern "system" fn(*mut c_void, *mut GUID) -> u32;

struct Exports {
    initialize: InitializeFn,
    deinitialize: DeinitializeFn,
    register_device_callback: RegisterDeviceCallbackFn,
    enumerate: EnumerateFn,
    register_page_callback: RegisterPageCallbackFn,
    register_soft_button_callback: RegisterSoftButtonCallbackFn,
    add_page: AddPageFn,
    set_string: SetStringFn,
    get_device_type: GetDeviceTypeFn,
}

/// Closures handed to the driver, kept alive until deinitialization.
#[derive(Default)]
struct CallbackContexts {
    device: Vec<Box<DeviceChangeCallback>>,
    page: Vec<Box<PageChangeCallback>>,
    soft_button: Vec<Box<SoftButtonCallback>>,
}

/// The vendor driver, loaded from a DLL.
pub struct DirectOutputBinding {
    module: HMODULE,
    exports: Exports,
    contexts: Mutex<CallbackContexts>,
}

// SAFETY: HMODULE is only used to free the library on drop, and the exported
// functions are documented as callable from any thread.
unsafe impl Send for DirectOutputBinding {}
// SAFETY: see above; mutable state is behind `contexts`' mutex.
unsafe impl Sync for DirectOutputBinding {}

impl DirectOutputBinding {
    /// Loads the library at `path` and resolves all required exports.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] if the library cannot be loaded or lacks one
    /// of the exports.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BindingError> {
        let path = path.as_ref();
        let wide = to_wide(&path.to_string_lossy());
        // SAFETY: `wide` is a NUL-terminated UTF-16 string that outlives the call.
        let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }.map_err(|source| {
            BindingError::LibraryNotFound {
                path: path.to_path_buf(),
                source,
            }
        })?;

        match resolve_exports(module) {
            Ok(exports) => {
                debug!(path = %path.display(), "DirectOutput library loaded");
                Ok(Self {
                    module,
                    exports,
                    contexts: Mutex::new(CallbackContexts::default()),
                })
            }
            Err(err) => {
                // SAFETY: `module` was returned by LoadLibraryW above and is not used again.
                unsafe { FreeLibrary(module) }.ok();
                Err(err)
            }
        }
    }

    fn contexts(&self) -> MutexGuard<'_, CallbackContexts> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves one export and reinterprets it as `T`.
///
/// # Safety
///
/// `T` must be the function pointer type matching the export's C signature.
unsafe fn resolve<T>(module: HMODULE, name: PCSTR, label: &'static str) -> Result<T, BindingError> {
    let proc = GetProcAddress(module, name).ok_or(BindingError::MissingSymbol(label))?;
    Ok(std::mem::transmute_copy(&proc))
}

fn resolve_exports(module: HMODULE) -> Result<Exports, BindingError> {
    // SAFETY: each type alias above matches the DirectOutput SDK header.
    unsafe {
        Ok(Exports {
            initialize: resolve(module, s!("DirectOutput_Initialize"), "DirectOutput_Initialize")?,
            deinitialize: resolve(
                module,
                s!("DirectOutput_Deinitialize"),
                "DirectOutput_Deinitialize",
            )?,
            register_device_callback: resolve(
                module,
                s!("DirectOutput_RegisterDeviceCallback"),
                "DirectOutput_RegisterDeviceCallback",
            )?,
            enumerate: resolve(module, s!("DirectOutput_Enumerate"), "DirectOutput_Enumerate")?,
            register_page_callback: resolve(
                module,
                s!("DirectOutput_RegisterPageCallback"),
                "DirectOutput_RegisterPageCallback",
            )?,
            register_soft_button_callback: resolve(
                module,
                s!("DirectOutput_RegisterSoftButtonCallback"),
                "DirectOutput_RegisterSoftButtonCallback",
            )?,
            add_page: resolve(module, s!("DirectOutput_AddPage"), "DirectOutput_AddPage")?,
            set_string: resolve(module, s!("DirectOutput_SetString"), "DirectOutput_SetString")?,
            get_device_type: resolve(
                module,
                s!("DirectOutput_GetDeviceType"),
                "DirectOutput_GetDeviceType",
            )?,
        })
    }
}

impl Drop for DirectOutputBinding {
    fn drop(&mut self) {
        // SAFETY: `module` came from LoadLibraryW and no export is called after this.
        if let Err(err) = unsafe { FreeLibrary(self.module) } {
            warn!(error = %err, "failed to free DirectOutput library");
        }
    }
}

// ── Trampolines ───────────────────────────────────────────────────────────────

fn handle_of(raw: *mut c_void) -> DeviceHandle {
    DeviceHandle(raw as usize)
}

fn raw_of(handle: DeviceHandle) -> *mut c_void {
    handle.0 as *mut c_void
}

// SAFETY (all trampolines): `ctx` is the address of a boxed closure owned by
// the binding's `contexts`, which outlives every driver callback.  The
// driver ignores the return value of its callbacks.
unsafe extern "system" fn device_change_trampoline(device: *mut c_void, added: bool, ctx: *mut c_void) {
    let callback = &*(ctx as *const DeviceChangeCallback);
    callback(handle_of(device), added);
}

unsafe extern "system" fn enumerate_trampoline(device: *mut c_void, ctx: *mut c_void) {
    let callback = &mut *(ctx as *mut &mut dyn FnMut(DeviceHandle) -> StatusCode);
    callback(handle_of(device));
}

unsafe extern "system" fn page_change_trampoline(
    device: *mut c_void,
    page: u32,
    activated: bool,
    ctx: *mut c_void,
) {
    let callback = &*(ctx as *const PageChangeCallback);
    callback(handle_of(device), page, activated);
}

unsafe extern "system" fn soft_button_trampoline(device: *mut c_void, buttons: u32, ctx: *mut c_void) {
    let callback = &*(ctx as *const SoftButtonCallback);
    callback(handle_of(device), buttons);
}

/// NUL-terminated UTF-16.
fn to_wide(text: &str) -> Vec<u16> {
    std::ffi::OsStr::new(text).encode_wide().chain(Some(0)).collect()
}

// ── DriverBinding ─────────────────────────────────────────────────────────────

impl DriverBinding for DirectOutputBinding {
    fn initialize(&self, app_name: &str) -> StatusCode {
        let name = to_wide(app_name);
        // SAFETY: `name` is NUL-terminated and outlives the call.
        StatusCode(unsafe { (self.exports.initialize)(PCWSTR(name.as_ptr())) })
    }

    fn deinitialize(&self) -> StatusCode {
        // SAFETY: no arguments; the driver stops calling back before returning.
        let status = StatusCode(unsafe { (self.exports.deinitialize)() });
        if status.is_success() {
            *self.contexts() = CallbackContexts::default();
        }
        status
    }

    fn enumerate(&self, callback: &mut dyn FnMut(DeviceHandle) -> StatusCode) -> StatusCode {
        let mut callback: &mut dyn FnMut(DeviceHandle) -> StatusCode = callback;
        let ctx = &mut callback as *mut &mut dyn FnMut(DeviceHandle) -> StatusCode as *mut c_void;
        // SAFETY: enumeration is synchronous, so `callback` outlives every invocation.
        StatusCode(unsafe { (self.exports.enumerate)(enumerate_trampoline, ctx) })
    }

    fn register_device_callback(&self, callback: DeviceChangeCallback) -> StatusCode {
        let boxed = Box::new(callback);
        let ctx = &*boxed as *const DeviceChangeCallback as *mut c_void;
        self.contexts().device.push(boxed);
        // SAFETY: the box is stored in `contexts` until deinitialization.
        StatusCode(unsafe { (self.exports.register_device_callback)(device_change_trampoline, ctx) })
    }

    fn register_page_callback(&self, handle: DeviceHandle, callback: PageChangeCallback) -> StatusCode {
        let boxed = Box::new(callback);
        let ctx = &*boxed as *const PageChangeCallback as *mut c_void;
        self.contexts().page.push(boxed);
        // SAFETY: the box is stored in `contexts` until deinitialization.
        StatusCode(unsafe {
            (self.exports.register_page_callback)(raw_of(handle), page_change_trampoline, ctx)
        })
    }

    fn register_soft_button_callback(
        &self,
        handle: DeviceHandle,
        callback: SoftButtonCallback,
    ) -> StatusCode {
        let boxed = Box::new(callback);
        let ctx = &*boxed as *const SoftButtonCallback as *mut c_void;
        self.contexts().soft_button.push(boxed);
        // SAFETY: the box is stored in `contexts` until deinitialization.
        StatusCode(unsafe {
            (self.exports.register_soft_button_callback)(raw_of(handle), soft_button_trampoline, ctx)
        })
    }

    fn add_page(&self, handle: DeviceHandle, page_id: u32, name: &str, flags: u32) -> StatusCode {
        let name = to_wide(name);
        // SAFETY: `name` is NUL-terminated and outlives the call.
        StatusCode(unsafe {
            (self.exports.add_page)(raw_of(handle), page_id, PCWSTR(name.as_ptr()), flags)
        })
    }

    fn set_string(&self, handle: DeviceHandle, page_id: u32, line: u32, text: &str) -> StatusCode {
        let text = to_wide(text);
        let count = (text.len() - 1) as u32;
        // SAFETY: `text` holds `count` UTF-16 units plus a NUL and outlives the call.
        StatusCode(unsafe {
            (self.exports.set_string)(raw_of(handle), page_id, line, count, PCWSTR(text.as_ptr()))
        })
    }

    fn get_device_type(&self, handle: DeviceHandle) -> Result<Uuid, StatusCode> {
        let mut guid = GUID::zeroed();
        // SAFETY: `guid` is a valid out-pointer for the duration of the call.
        let status = StatusCode(unsafe { (self.exports.get_device_type)(raw_of(handle), &mut guid) });
        if status.is_success() {
            Ok(Uuid::from_u128(guid.to_u128()))
        } else {
            Err(status)
        }
    }
}
