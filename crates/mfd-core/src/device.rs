//! Device Handle Manager: binds one physical device to the process.
//!
//! [`DeviceHandleManager`] sits directly on top of a [`DriverBinding`]:
//!
//! - **Lifecycle.** [`DeviceHandleManager::open`] initializes the driver,
//!   registers the device-change callback and enumerates the devices that are
//!   already connected.  [`DeviceHandleManager::close`] deinitializes it.
//! - **Handle injection.** The driver identifies the device by an opaque
//!   handle.  The manager stores the first handle it is told about and adds it
//!   to every display call, so nothing above this layer ever sees a handle.
//! - **Error translation.** Raw status codes become [`MfdError`]s.
//! - **Notifications.** Page activation events from the driver thread are
//!   forwarded to a single registered [`PageChangeHandler`].
//!
//! # Device binding rules
//!
//! ```text
//! device added,   nothing bound      ──►  bind, register page + soft-button callbacks
//! device added,   same handle bound  ──►  re-register callbacks
//! device added,   other handle bound ──►  rejected (multiple devices unsupported)
//! device removed                     ──►  rejected (hot removal unsupported)
//! ```
//!
//! The bind-once transition goes through [`OnceLock`], so it is race-free even
//! if the driver were to report devices from two threads.  If the page or
//! soft-button callback cannot be registered the engine is half-wired; a
//! [`FatalError`] is sent on the fatal channel and the application decides
//! how to shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::driver::{
    DeviceChangeCallback, DeviceHandle, DriverBinding, DriverError, PageChangeCallback, SoftButtonCallback,
    StatusCode, FLAG_SET_AS_ACTIVE,
};
use crate::error::{FatalError, MfdError, UnsupportedHandle};

/// Upward sink for page activation events: `(page_id, activated)`.
pub type PageChangeHandler = Arc<dyn Fn(u32, bool) + Send + Sync>;

/// State reachable from driver callbacks.
struct DeviceShared {
    driver: Arc<dyn DriverBinding>,
    handle: OnceLock<DeviceHandle>,
    page_change: RwLock<Option<PageChangeHandler>>,
    fatal_tx: Sender<FatalError>,
}

/// Owns the driver session and the single bound device.
pub struct DeviceHandleManager {
    shared: Arc<DeviceShared>,
    fatal_rx: Mutex<Option<Receiver<FatalError>>>,
    closed: AtomicBool,
}

impl DeviceHandleManager {
    /// Initializes the driver and discovers already-connected devices.
    ///
    /// # Errors
    ///
    /// - [`MfdError::Init`] if the driver fails to initialize.
    /// - [`MfdError::CallbackRegistration`] if the device callback is refused.
    /// - [`MfdError::Driver`] if enumeration fails.
    ///
    /// The driver is deinitialized before any error is returned.
    pub fn open(driver: Arc<dyn DriverBinding>, app_name: &str) -> Result<Self, MfdError> {
        info!(app_name, "initializing DirectOutput");
        if let Err(err) = driver.initialize(app_name).into_result() {
            deinitialize_after_failure(driver.as_ref());
            return Err(MfdError::Init(err));
        }

        let (fatal_tx, fatal_rx) = mpsc::channel();
        let shared = Arc::new(DeviceShared {
            driver: Arc::clone(&driver),
            handle: OnceLock::new(),
            page_change: RwLock::new(None),
            fatal_tx,
        });

        let weak = Arc::downgrade(&shared);
        let on_device_change: DeviceChangeCallback = Arc::new(move |handle: DeviceHandle, added: bool| {
            match weak.upgrade() {
                Some(shared) => shared.on_device_change(handle, added),
                None => StatusCode::S_OK,
            }
        });
        if let Err(err) = driver.register_device_callback(on_device_change).into_result() {
            deinitialize_after_failure(driver.as_ref());
            return Err(MfdError::CallbackRegistration(err));
        }

        let status = driver.enumerate(&mut |handle: DeviceHandle| {
            debug!(%handle, "enumerated device");
            shared.on_device_change(handle, true)
        });
        if let Err(err) = status.into_result() {
            deinitialize_after_failure(driver.as_ref());
            return Err(MfdError::Driver(err));
        }

        Ok(Self {
            shared,
            fatal_rx: Mutex::new(Some(fatal_rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Deinitializes the driver.  Only the first call reaches the driver.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::Driver`] if deinitialization fails.
    pub fn close(&self) -> Result<(), MfdError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("deinitializing DirectOutput");
        self.shared.driver.deinitialize().into_result()?;
        Ok(())
    }

    /// Registers the sink for page activation events, replacing any previous one.
    pub fn set_page_change_handler(&self, handler: PageChangeHandler) {
        *self
            .shared
            .page_change
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Takes the receiving end of the fatal channel.  Returns `None` after
    /// the first call.
    pub fn take_fatal_receiver(&self) -> Option<Receiver<FatalError>> {
        self.fatal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The bound device, if one has been reported.
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.shared.handle.get().copied()
    }

    /// Adds page `id` to the device.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::Driver`] on any failure status.
    pub fn add_page(&self, id: u32, name: &str, activate: bool) -> Result<(), MfdError> {
        let flags = if activate { FLAG_SET_AS_ACTIVE } else { 0 };
        debug!(page_id = id, name, activate, "AddPage");
        self.shared
            .driver
            .add_page(self.bound_handle(), id, name, flags)
            .into_result()?;
        Ok(())
    }

    /// Writes one row of a page.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::Driver`] on any failure status, notably
    /// `PageNotActive` when `page` is not the displayed page.
    pub fn set_line(&self, page: u32, line: u32, text: &str) -> Result<(), MfdError> {
        trace!(page_id = page, line, text, "SetString");
        self.shared
            .driver
            .set_string(self.bound_handle(), page, line, text)
            .into_result()?;
        Ok(())
    }

    /// Queries the device type GUID.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::Driver`] on any failure status.
    pub fn device_type(&self) -> Result<Uuid, MfdError> {
        self.shared
            .driver
            .get_device_type(self.bound_handle())
            .map_err(|status| {
                // A driver that fails with S_OK has broken its contract.
                let err = DriverError::from_status(status).unwrap_or(DriverError::Unknown(status.0));
                MfdError::Driver(err)
            })
    }

    /// Calls made before any device is reported use the null handle, which
    /// the driver rejects with `E_HANDLE`.
    fn bound_handle(&self) -> DeviceHandle {
        self.handle().unwrap_or(DeviceHandle::NULL)
    }
}

impl Drop for DeviceHandleManager {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to deinitialize DirectOutput on drop");
        }
    }
}

impl DeviceShared {
    /// Device-change and enumeration entry point.  Runs on the driver thread.
    fn on_device_change(self: &Arc<Self>, handle: DeviceHandle, added: bool) -> StatusCode {
        debug!(%handle, added, "device change");

        if let Err(reason) = self.bind(handle, added) {
            error!(%handle, error = %reason, "rejecting device change");
            return reason.status();
        }

        if let Err(fatal) = self.register_device_callbacks(handle) {
            error!(%handle, error = %fatal, "device bound without its callbacks");
            let status = fatal.status();
            if self.fatal_tx.send(fatal).is_err() {
                error!("fatal error receiver dropped; nobody will act on this failure");
            }
            return status;
        }

        info!(%handle, "device bound");
        StatusCode::S_OK
    }

    fn bind(&self, handle: DeviceHandle, added: bool) -> Result<(), UnsupportedHandle> {
        if !added {
            return Err(UnsupportedHandle::Removal(handle));
        }
        let bound = *self.handle.get_or_init(|| handle);
        if bound != handle {
            return Err(UnsupportedHandle::MultipleDevices {
                bound,
                reported: handle,
            });
        }
        Ok(())
    }

    fn register_device_callbacks(self: &Arc<Self>, handle: DeviceHandle) -> Result<(), FatalError> {
        let weak = Arc::downgrade(self);
        let on_page_change: PageChangeCallback = Arc::new(move |_: DeviceHandle, page: u32, activated: bool| {
            if let Some(shared) = weak.upgrade() {
                shared.on_page_change(page, activated);
            }
            StatusCode::S_OK
        });
        self.driver
            .register_page_callback(handle, on_page_change)
            .into_result()
            .map_err(|source| FatalError::PageCallbackRegistration { handle, source })?;

        let on_soft_button: SoftButtonCallback = Arc::new(|handle: DeviceHandle, buttons: u32| {
            trace!(%handle, buttons, "soft button change ignored");
            StatusCode::S_OK
        });
        self.driver
            .register_soft_button_callback(handle, on_soft_button)
            .into_result()
            .map_err(|source| FatalError::SoftButtonCallbackRegistration { handle, source })?;

        Ok(())
    }

    fn on_page_change(&self, page: u32, activated: bool) {
        debug!(page_id = page, activated, "page change");
        let handler = self
            .page_change
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(page, activated);
        }
    }
}

fn deinitialize_after_failure(driver: &dyn DriverBinding) {
    if let Err(err) = driver.deinitialize().into_result() {
        error!(error = %err, "failed to deinitialize DirectOutput");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::driver::mock::{DriverCall, MockDriver, Operation};
    use crate::driver::X52_PRO_DEVICE_TYPE;

    const DEV: DeviceHandle = DeviceHandle(0x1000);

    fn open_with_device() -> (Arc<MockDriver>, DeviceHandleManager) {
        let driver = Arc::new(MockDriver::with_device(DEV));
        let manager = DeviceHandleManager::open(driver.clone(), "test").expect("open");
        (driver, manager)
    }

    #[test]
    fn test_open_initializes_registers_and_enumerates() {
        // Arrange / Act
        let (driver, manager) = open_with_device();

        // Assert
        assert_eq!(manager.handle(), Some(DEV));
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Initialize("test".to_string()),
                DriverCall::RegisterDeviceCallback,
                DriverCall::Enumerate,
                DriverCall::RegisterPageCallback(DEV),
                DriverCall::RegisterSoftButtonCallback(DEV),
            ]
        );
    }

    #[test]
    fn test_open_without_device_leaves_handle_unbound() {
        let driver = Arc::new(MockDriver::new());
        let manager = DeviceHandleManager::open(driver, "test").expect("open");

        assert_eq!(manager.handle(), None);
    }

    #[test]
    fn test_open_fails_with_init_error_and_deinitializes() {
        // Arrange
        let driver = Arc::new(MockDriver::with_device(DEV));
        driver.fail_on(Operation::Initialize, StatusCode::E_INVALIDARG);

        // Act
        let result = DeviceHandleManager::open(driver.clone(), "test");

        // Assert
        assert!(matches!(
            result,
            Err(MfdError::Init(DriverError::InvalidArgument))
        ));
        assert_eq!(driver.deinitialize_count(), 1);
    }

    #[test]
    fn test_open_fails_when_device_callback_is_refused() {
        let driver = Arc::new(MockDriver::with_device(DEV));
        driver.fail_on(Operation::RegisterDeviceCallback, StatusCode::E_NOTIMPL);

        let result = DeviceHandleManager::open(driver.clone(), "test");

        assert!(matches!(
            result,
            Err(MfdError::CallbackRegistration(DriverError::NotImplemented))
        ));
        assert_eq!(driver.deinitialize_count(), 1);
        assert!(!driver.is_initialized());
    }

    #[test]
    fn test_open_fails_when_enumeration_fails() {
        let driver = Arc::new(MockDriver::with_device(DEV));
        driver.fail_on(Operation::Enumerate, StatusCode(0x8000_4005));

        let result = DeviceHandleManager::open(driver.clone(), "test");

        assert!(matches!(
            result,
            Err(MfdError::Driver(DriverError::Unknown(0x8000_4005)))
        ));
        assert_eq!(driver.deinitialize_count(), 1);
    }

    #[test]
    fn test_device_plugged_after_open_is_bound() {
        let driver = Arc::new(MockDriver::new());
        let manager = DeviceHandleManager::open(driver.clone(), "test").expect("open");

        let status = driver.plug(DEV, true);

        assert_eq!(status, StatusCode::S_OK);
        assert_eq!(manager.handle(), Some(DEV));
        assert!(driver.has_page_callback(DEV));
    }

    #[test]
    fn test_device_removal_is_rejected_and_keeps_handle() {
        let (driver, manager) = open_with_device();

        let status = driver.plug(DEV, false);

        assert_eq!(status, StatusCode::E_NOTIMPL);
        assert_eq!(manager.handle(), Some(DEV));
    }

    #[test]
    fn test_second_device_is_rejected() {
        let (driver, manager) = open_with_device();

        let status = driver.plug(DeviceHandle(0x2000), true);

        assert_eq!(status, StatusCode::E_HANDLE);
        assert_eq!(manager.handle(), Some(DEV));
        assert!(!driver.has_page_callback(DeviceHandle(0x2000)));
    }

    #[test]
    fn test_same_device_reported_again_is_accepted() {
        let (driver, manager) = open_with_device();

        assert_eq!(driver.plug(DEV, true), StatusCode::S_OK);
        assert_eq!(manager.handle(), Some(DEV));
    }

    #[test]
    fn test_page_callback_registration_failure_is_reported_as_fatal() {
        // Arrange
        let driver = Arc::new(MockDriver::new());
        driver.fail_on(Operation::RegisterPageCallback, StatusCode::E_HANDLE);
        let manager = DeviceHandleManager::open(driver.clone(), "test").expect("open");
        let fatal_rx = manager.take_fatal_receiver().expect("receiver");

        // Act
        let status = driver.plug(DEV, true);

        // Assert
        assert_eq!(status, StatusCode::E_HANDLE);
        assert_eq!(
            fatal_rx.try_recv(),
            Ok(FatalError::PageCallbackRegistration {
                handle: DEV,
                source: DriverError::InvalidHandle,
            })
        );
        assert!(fatal_rx.try_recv().is_err(), "exactly one fatal error");
    }

    #[test]
    fn test_soft_button_registration_failure_during_open_is_reported_as_fatal() {
        let driver = Arc::new(MockDriver::with_device(DEV));
        driver.fail_on(Operation::RegisterSoftButtonCallback, StatusCode::E_NOTIMPL);

        let manager = DeviceHandleManager::open(driver, "test").expect("open succeeds");
        let fatal_rx = manager.take_fatal_receiver().expect("receiver");

        assert!(matches!(
            fatal_rx.try_recv(),
            Ok(FatalError::SoftButtonCallbackRegistration { .. })
        ));
    }

    #[test]
    fn test_fatal_receiver_can_only_be_taken_once() {
        let (_driver, manager) = open_with_device();

        assert!(manager.take_fatal_receiver().is_some());
        assert!(manager.take_fatal_receiver().is_none());
    }

    #[test]
    fn test_page_change_is_forwarded_to_the_last_handler() {
        // Arrange
        let (driver, manager) = open_with_device();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(Mutex::new(Vec::new()));
        let first_sink = Arc::clone(&first);
        manager.set_page_change_handler(Arc::new(move |_: u32, _: bool| {
            first_sink.fetch_add(1, Ordering::SeqCst);
        }));
        let second_sink = Arc::clone(&second);
        manager.set_page_change_handler(Arc::new(move |page: u32, activated: bool| {
            second_sink.lock().unwrap().push((page, activated));
        }));

        // Act
        let status = driver.notify_page_change(DEV, 4, true);

        // Assert
        assert_eq!(status, StatusCode::S_OK);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(*second.lock().unwrap(), vec![(4, true)]);
    }

    #[test]
    fn test_page_change_without_handler_is_accepted() {
        let (driver, _manager) = open_with_device();

        assert_eq!(driver.notify_page_change(DEV, 1, true), StatusCode::S_OK);
    }

    #[test]
    fn test_soft_button_events_are_discarded_with_success() {
        let (driver, _manager) = open_with_device();

        assert_eq!(driver.press_soft_buttons(DEV, 0b11), StatusCode::S_OK);
    }

    #[test]
    fn test_add_page_passes_activation_flag() {
        let (driver, manager) = open_with_device();

        manager.add_page(1, "nav", true).expect("add page");

        assert!(driver.calls().contains(&DriverCall::AddPage {
            handle: DEV,
            page_id: 1,
            name: "nav".to_string(),
            flags: FLAG_SET_AS_ACTIVE,
        }));
        assert_eq!(driver.active_page(DEV), Some(1));
    }

    #[test]
    fn test_set_line_on_inactive_page_surfaces_page_not_active() {
        let (_driver, manager) = open_with_device();
        manager.add_page(1, "nav", false).expect("add page");

        let err = manager.set_line(1, 0, "x").expect_err("page is not shown");

        assert!(err.is_page_not_active());
    }

    #[test]
    fn test_calls_before_a_device_is_bound_use_null_handle() {
        let driver = Arc::new(MockDriver::new());
        let manager = DeviceHandleManager::open(driver, "test").expect("open");

        let err = manager.add_page(1, "nav", true).expect_err("no device");

        assert_eq!(err, MfdError::Driver(DriverError::InvalidHandle));
    }

    #[test]
    fn test_device_type_returns_guid() {
        let (_driver, manager) = open_with_device();

        assert_eq!(manager.device_type(), Ok(X52_PRO_DEVICE_TYPE));
    }

    #[test]
    fn test_close_deinitializes_exactly_once() {
        let (driver, manager) = open_with_device();

        manager.close().expect("close");
        manager.close().expect("second close is a no-op");
        drop(manager);

        assert_eq!(driver.deinitialize_count(), 1);
        assert!(!driver.is_initialized());
    }

    #[test]
    fn test_drop_deinitializes() {
        let (driver, manager) = open_with_device();

        drop(manager);

        assert_eq!(driver.deinitialize_count(), 1);
    }
}
