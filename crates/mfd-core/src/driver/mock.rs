//! In-memory driver for tests and the CLI simulator.
//!
//! # Why a mock driver?
//!
//! The real binding needs Windows, the vendor DLL and a physical X52 Pro.
//! [`MockDriver`] replaces all of that with a small model of the device:
//!
//! - It records every call in order so tests can assert exactly what reached
//!   the "hardware".
//! - It keeps per-device screen state (pages, the active page, the text on
//!   every row) and enforces the same rules as the device, e.g. writing to a
//!   page that is not shown fails with `E_PAGENOTACTIVE`.
//! - It lets tests play the role of the driver thread: attach or detach
//!   devices, press the page wheel, press soft buttons.
//!
//! Every failure can be injected per operation with [`MockDriver::fail_on`].
//!
//! # Usage in tests
//!
//! ```ignore
//! let driver = Arc::new(MockDriver::with_device(DeviceHandle(0x1000)));
//! let mfd = DisplayController::open(driver.clone(), "test")?;
//! let page = mfd.add_page("nav", false)?;
//! page.set_line(0, "HDG 270")?;
//!
//! driver.activate_page(DeviceHandle(0x1000), page.id());
//! assert_eq!(driver.displayed_line(DeviceHandle(0x1000), page.id(), 0).as_deref(), Some("HDG 270"));
//! ```
//!
//! Events fired through the mock run on the calling thread, never while one
//! of the mock's own locks is held, so a callback may call back into the
//! driver.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::{
    DeviceChangeCallback, DeviceHandle, DriverBinding, PageChangeCallback, SoftButtonCallback,
    StatusCode, FLAG_SET_AS_ACTIVE, X52_PRO_DEVICE_TYPE,
};

/// Number of text rows on the emulated display.
const ROWS: u32 = 3;

/// A driver operation, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Deinitialize,
    Enumerate,
    RegisterDeviceCallback,
    RegisterPageCallback,
    RegisterSoftButtonCallback,
    AddPage,
    SetString,
    GetDeviceType,
}

/// One recorded call into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Initialize(String),
    Deinitialize,
    Enumerate,
    RegisterDeviceCallback,
    RegisterPageCallback(DeviceHandle),
    RegisterSoftButtonCallback(DeviceHandle),
    AddPage {
        handle: DeviceHandle,
        page_id: u32,
        name: String,
        flags: u32,
    },
    SetString {
        handle: DeviceHandle,
        page_id: u32,
        line: u32,
        text: String,
    },
    GetDeviceType(DeviceHandle),
}

/// Emulated state of one attached device.
#[derive(Debug, Default)]
struct Screen {
    pages: Vec<u32>,
    active: Option<u32>,
    text: HashMap<(u32, u32), String>,
}

#[derive(Default)]
struct Callbacks {
    device: Option<DeviceChangeCallback>,
    page: HashMap<DeviceHandle, PageChangeCallback>,
    soft_button: HashMap<DeviceHandle, SoftButtonCallback>,
}

/// A recording, rule-enforcing stand-in for the DirectOutput driver.
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    initialized: Mutex<bool>,
    screens: Mutex<HashMap<DeviceHandle, Screen>>,
    callbacks: Mutex<Callbacks>,
    failures: Mutex<HashMap<Operation, StatusCode>>,
    line_failures: Mutex<HashMap<u32, StatusCode>>,
    device_type: Uuid,
}

impl MockDriver {
    /// Creates a driver with no attached devices.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            initialized: Mutex::new(false),
            screens: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
            failures: Mutex::new(HashMap::new()),
            line_failures: Mutex::new(HashMap::new()),
            device_type: X52_PRO_DEVICE_TYPE,
        }
    }

    /// Creates a driver with `handle` already attached, so it is reported
    /// during enumeration.
    pub fn with_device(handle: DeviceHandle) -> Self {
        let driver = Self::new();
        lock(&driver.screens).insert(handle, Screen::default());
        driver
    }

    /// Makes every subsequent call to `op` return `status`.
    pub fn fail_on(&self, op: Operation, status: StatusCode) {
        lock(&self.failures).insert(op, status);
    }

    /// Makes `SetString` calls targeting row `line` return `status`.
    pub fn fail_set_string_on_line(&self, line: u32, status: StatusCode) {
        lock(&self.line_failures).insert(line, status);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
        lock(&self.line_failures).clear();
    }

    // ── Driver-side events ────────────────────────────────────────────────────

    /// Attaches (`added = true`) or detaches a device and fires the device
    /// callback.  Returns the callback's status, or `S_OK` if none is
    /// registered.
    pub fn plug(&self, handle: DeviceHandle, added: bool) -> StatusCode {
        {
            let mut screens = lock(&self.screens);
            if added {
                screens.entry(handle).or_default();
            } else {
                screens.remove(&handle);
            }
        }
        let callback = lock(&self.callbacks).device.clone();
        match callback {
            Some(cb) => cb(handle, added),
            None => StatusCode::S_OK,
        }
    }

    /// Emulates the user turning the page wheel to `page_id`.
    ///
    /// Like the device, this deactivates the previously shown page first and
    /// notifies both transitions.  Returns `false` if the page is unknown.
    pub fn activate_page(&self, handle: DeviceHandle, page_id: u32) -> bool {
        let previous = {
            let mut screens = lock(&self.screens);
            let Some(screen) = screens.get_mut(&handle) else {
                return false;
            };
            if !screen.pages.contains(&page_id) {
                return false;
            }
            screen.active.replace(page_id)
        };
        if let Some(previous) = previous.filter(|&p| p != page_id) {
            self.notify_page_change(handle, previous, false);
        }
        self.notify_page_change(handle, page_id, true);
        true
    }

    /// Fires the page callback without touching the emulated screen.
    pub fn notify_page_change(&self, handle: DeviceHandle, page_id: u32, activated: bool) -> StatusCode {
        let callback = lock(&self.callbacks).page.get(&handle).cloned();
        match callback {
            Some(cb) => cb(handle, page_id, activated),
            None => StatusCode::S_OK,
        }
    }

    /// Fires the soft-button callback.
    pub fn press_soft_buttons(&self, handle: DeviceHandle, mask: u32) -> StatusCode {
        let callback = lock(&self.callbacks).soft_button.get(&handle).cloned();
        match callback {
            Some(cb) => cb(handle, mask),
            None => StatusCode::S_OK,
        }
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    /// All calls received so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// `(page_id, line, text)` for every `SetString` call, in order.
    pub fn set_string_calls(&self) -> Vec<(u32, u32, String)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                DriverCall::SetString {
                    page_id, line, text, ..
                } => Some((*page_id, *line, text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Forgets all recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn is_initialized(&self) -> bool {
        *lock(&self.initialized)
    }

    /// Number of `Deinitialize` calls received.
    pub fn deinitialize_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, DriverCall::Deinitialize))
            .count()
    }

    /// Text currently shown on row `line` of `page_id`, if ever written.
    pub fn displayed_line(&self, handle: DeviceHandle, page_id: u32, line: u32) -> Option<String> {
        lock(&self.screens)
            .get(&handle)
            .and_then(|screen| screen.text.get(&(page_id, line)).cloned())
    }

    /// Page currently shown on the device.
    pub fn active_page(&self, handle: DeviceHandle) -> Option<u32> {
        lock(&self.screens).get(&handle).and_then(|screen| screen.active)
    }

    /// Pages added to the device, in insertion order.
    pub fn page_ids(&self, handle: DeviceHandle) -> Vec<u32> {
        lock(&self.screens)
            .get(&handle)
            .map(|screen| screen.pages.clone())
            .unwrap_or_default()
    }

    /// `true` if a page callback is registered for `handle`.
    pub fn has_page_callback(&self, handle: DeviceHandle) -> bool {
        lock(&self.callbacks).page.contains_key(&handle)
    }

    fn record(&self, call: DriverCall) {
        lock(&self.calls).push(call);
    }

    fn injected(&self, op: Operation) -> Option<StatusCode> {
        lock(&self.failures).get(&op).copied()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBinding for MockDriver {
    fn initialize(&self, app_name: &str) -> StatusCode {
        self.record(DriverCall::Initialize(app_name.to_string()));
        if let Some(status) = self.injected(Operation::Initialize) {
            return status;
        }
        *lock(&self.initialized) = true;
        StatusCode::S_OK
    }

    fn deinitialize(&self) -> StatusCode {
        self.record(DriverCall::Deinitialize);
        if let Some(status) = self.injected(Operation::Deinitialize) {
            return status;
        }
        *lock(&self.initialized) = false;
        *lock(&self.callbacks) = Callbacks::default();
        StatusCode::S_OK
    }

    fn enumerate(&self, callback: &mut dyn FnMut(DeviceHandle) -> StatusCode) -> StatusCode {
        self.record(DriverCall::Enumerate);
        if let Some(status) = self.injected(Operation::Enumerate) {
            return status;
        }
        let mut handles: Vec<DeviceHandle> = lock(&self.screens).keys().copied().collect();
        handles.sort_by_key(|h| h.0);
        for handle in handles {
            callback(handle);
        }
        StatusCode::S_OK
    }

    fn register_device_callback(&self, callback: DeviceChangeCallback) -> StatusCode {
        self.record(DriverCall::RegisterDeviceCallback);
        if let Some(status) = self.injected(Operation::RegisterDeviceCallback) {
            return status;
        }
        lock(&self.callbacks).device = Some(callback);
        StatusCode::S_OK
    }

    fn register_page_callback(
        &self,
        handle: DeviceHandle,
        callback: PageChangeCallback,
    ) -> StatusCode {
        self.record(DriverCall::RegisterPageCallback(handle));
        if let Some(status) = self.injected(Operation::RegisterPageCallback) {
            return status;
        }
        lock(&self.callbacks).page.insert(handle, callback);
        StatusCode::S_OK
    }

    fn register_soft_button_callback(
        &self,
        handle: DeviceHandle,
        callback: SoftButtonCallback,
    ) -> StatusCode {
        self.record(DriverCall::RegisterSoftButtonCallback(handle));
        if let Some(status) = self.injected(Operation::RegisterSoftButtonCallback) {
            return status;
        }
        lock(&self.callbacks).soft_button.insert(handle, callback);
        StatusCode::S_OK
    }

    fn add_page(&self, handle: DeviceHandle, page_id: u32, name: &str, flags: u32) -> StatusCode {
        self.record(DriverCall::AddPage {
            handle,
            page_id,
            name: name.to_string(),
            flags,
        });
        if let Some(status) = self.injected(Operation::AddPage) {
            return status;
        }
        if !self.is_initialized() {
            return StatusCode::E_HANDLE;
        }
        let mut screens = lock(&self.screens);
        let Some(screen) = screens.get_mut(&handle) else {
            return StatusCode::E_HANDLE;
        };
        if screen.pages.contains(&page_id) {
            return StatusCode::E_INVALIDARG;
        }
        screen.pages.push(page_id);
        if flags & FLAG_SET_AS_ACTIVE != 0 {
            screen.active = Some(page_id);
        }
        StatusCode::S_OK
    }

    fn set_string(&self, handle: DeviceHandle, page_id: u32, line: u32, text: &str) -> StatusCode {
        self.record(DriverCall::SetString {
            handle,
            page_id,
            line,
            text: text.to_string(),
        });
        if let Some(status) = self.injected(Operation::SetString) {
            return status;
        }
        if let Some(status) = lock(&self.line_failures).get(&line).copied() {
            return status;
        }
        if !self.is_initialized() {
            return StatusCode::E_HANDLE;
        }
        let mut screens = lock(&self.screens);
        let Some(screen) = screens.get_mut(&handle) else {
            return StatusCode::E_HANDLE;
        };
        if !screen.pages.contains(&page_id) || line >= ROWS {
            return StatusCode::E_INVALIDARG;
        }
        if screen.active != Some(page_id) {
            return StatusCode::E_PAGENOTACTIVE;
        }
        screen.text.insert((page_id, line), text.to_string());
        StatusCode::S_OK
    }

    fn get_device_type(&self, handle: DeviceHandle) -> Result<Uuid, StatusCode> {
        self.record(DriverCall::GetDeviceType(handle));
        if let Some(status) = self.injected(Operation::GetDeviceType) {
            return Err(status);
        }
        if !self.is_initialized() || !lock(&self.screens).contains_key(&handle) {
            return Err(StatusCode::E_HANDLE);
        }
        Ok(self.device_type)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    const DEV: DeviceHandle = DeviceHandle(0x1000);

    fn initialized_with_page(page_id: u32, active: bool) -> MockDriver {
        let driver = MockDriver::with_device(DEV);
        driver.initialize("test");
        let flags = if active { FLAG_SET_AS_ACTIVE } else { 0 };
        assert_eq!(driver.add_page(DEV, page_id, "p", flags), StatusCode::S_OK);
        driver
    }

    #[test]
    fn test_enumerate_reports_attached_devices() {
        // Arrange
        let driver = MockDriver::with_device(DEV);
        let mut seen = Vec::new();

        // Act
        let status = driver.enumerate(&mut |handle: DeviceHandle| {
            seen.push(handle);
            StatusCode::S_OK
        });

        // Assert
        assert_eq!(status, StatusCode::S_OK);
        assert_eq!(seen, vec![DEV]);
    }

    #[test]
    fn test_set_string_on_active_page_updates_screen() {
        let driver = initialized_with_page(1, true);

        assert_eq!(driver.set_string(DEV, 1, 0, "hello"), StatusCode::S_OK);

        assert_eq!(driver.displayed_line(DEV, 1, 0).as_deref(), Some("hello"));
    }

    #[test]
    fn test_set_string_on_inactive_page_is_rejected() {
        let driver = initialized_with_page(1, false);

        assert_eq!(driver.set_string(DEV, 1, 0, "hello"), StatusCode::E_PAGENOTACTIVE);
        assert_eq!(driver.displayed_line(DEV, 1, 0), None);
    }

    #[test]
    fn test_set_string_with_unknown_handle_is_rejected() {
        let driver = initialized_with_page(1, true);

        assert_eq!(
            driver.set_string(DeviceHandle::NULL, 1, 0, "x"),
            StatusCode::E_HANDLE
        );
    }

    #[test]
    fn test_injected_failure_is_returned() {
        let driver = MockDriver::new();
        driver.fail_on(Operation::Initialize, StatusCode(0x8000_4005));

        assert_eq!(driver.initialize("test"), StatusCode(0x8000_4005));
        assert!(!driver.is_initialized());
    }

    #[test]
    fn test_activate_page_notifies_deactivation_then_activation() {
        // Arrange
        let driver = initialized_with_page(1, true);
        driver.add_page(DEV, 2, "q", 0);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        driver.register_page_callback(
            DEV,
            Arc::new(move |_: DeviceHandle, page: u32, active: bool| {
                sink.lock().unwrap().push((page, active));
                StatusCode::S_OK
            }),
        );

        // Act
        let switched = driver.activate_page(DEV, 2);

        // Assert
        assert!(switched);
        assert_eq!(driver.active_page(DEV), Some(2));
        assert_eq!(*events.lock().unwrap(), vec![(1, false), (2, true)]);
    }

    #[test]
    fn test_activate_unknown_page_does_nothing() {
        let driver = initialized_with_page(1, true);

        assert!(!driver.activate_page(DEV, 9));
        assert_eq!(driver.active_page(DEV), Some(1));
    }

    #[test]
    fn test_deinitialize_drops_callbacks() {
        // Arrange
        let driver = initialized_with_page(1, true);
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        driver.register_soft_button_callback(
            DEV,
            Arc::new(move |_: DeviceHandle, _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::S_OK
            }),
        );

        // Act
        driver.deinitialize();
        driver.press_soft_buttons(DEV, 0b1);

        // Assert
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(driver.deinitialize_count(), 1);
    }
}
