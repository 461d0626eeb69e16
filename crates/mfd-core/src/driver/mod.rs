//! The vendor driver contract.
//!
//! The page engine never talks to `DirectOutput.dll` directly.  Everything it
//! needs from the vendor driver is expressed by the [`DriverBinding`] trait:
//! lifecycle (initialize / deinitialize), device discovery, three callback
//! registrations, and the three display primitives.
//!
//! # Callbacks and threads
//!
//! Registered callbacks are invoked by the driver on a thread it owns, at any
//! time between registration and deinitialization.  They must therefore be
//! `Send + Sync` and must not assume anything about the caller's thread.
//! The C API's `void* pCtxt` context argument is replaced by closure capture.
//!
//! # Testability
//!
//! [`mock::MockDriver`] implements the trait in memory, recording every call
//! and letting tests fire device, page and soft-button events on demand.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

pub mod mock;
pub mod status;

pub use status::{DriverError, StatusCode};

/// `AddPage` flag requesting that the new page becomes the displayed page.
pub const FLAG_SET_AS_ACTIVE: u32 = 0x0000_0001;

/// Device type reported by the X52 Pro flight controller.
pub const X52_PRO_DEVICE_TYPE: Uuid = Uuid::from_u128(0x29da_d506_f93b_4f20_85fa_1e02_c04f_ac17);

/// Opaque handle identifying one physical device, as issued by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceHandle(pub usize);

impl DeviceHandle {
    /// The unset handle.  Calls made with it are rejected by the driver.
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Invoked when a device is attached (`true`) or detached (`false`).
pub type DeviceChangeCallback = Arc<dyn Fn(DeviceHandle, bool) -> StatusCode + Send + Sync>;

/// Invoked when the device switches pages: `(handle, page_id, activated)`.
pub type PageChangeCallback = Arc<dyn Fn(DeviceHandle, u32, bool) -> StatusCode + Send + Sync>;

/// Invoked when the soft buttons change: `(handle, button_mask)`.
pub type SoftButtonCallback = Arc<dyn Fn(DeviceHandle, u32) -> StatusCode + Send + Sync>;

/// Synchronous operation set exposed by the vendor driver.
///
/// Every method returns the raw [`StatusCode`]; translating it into typed
/// errors is the job of [`crate::device::DeviceHandleManager`].
pub trait DriverBinding: Send + Sync {
    /// Initializes the driver on behalf of `app_name`.
    fn initialize(&self, app_name: &str) -> StatusCode;

    /// Releases all driver state.  Registered callbacks stop firing.
    fn deinitialize(&self) -> StatusCode;

    /// Calls `callback` once for every attached device, synchronously,
    /// before returning.
    fn enumerate(&self, callback: &mut dyn FnMut(DeviceHandle) -> StatusCode) -> StatusCode;

    /// Registers the device attach/detach callback.
    fn register_device_callback(&self, callback: DeviceChangeCallback) -> StatusCode;

    /// Registers the page activation callback for `handle`.
    fn register_page_callback(&self, handle: DeviceHandle, callback: PageChangeCallback)
        -> StatusCode;

    /// Registers the soft-button callback for `handle`.
    fn register_soft_button_callback(
        &self,
        handle: DeviceHandle,
        callback: SoftButtonCallback,
    ) -> StatusCode;

    /// Adds page `page_id` to the device.  See [`FLAG_SET_AS_ACTIVE`].
    fn add_page(&self, handle: DeviceHandle, page_id: u32, name: &str, flags: u32) -> StatusCode;

    /// Writes `text` to row `line` of page `page_id`.
    fn set_string(&self, handle: DeviceHandle, page_id: u32, line: u32, text: &str)
        -> StatusCode;

    /// Returns the device type GUID.
    fn get_device_type(&self, handle: DeviceHandle) -> Result<Uuid, StatusCode>;
}
