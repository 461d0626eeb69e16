//! Display Controller: the top-level facade over one X52 Pro display.
//!
//! [`DisplayController`] owns:
//!
//! - the [`DeviceHandleManager`] (and therefore the driver session),
//! - every [`Page`], keyed by name,
//! - the page-id counter (ids start at 1 and are never reused),
//! - the subscription to page activation events from the device.
//!
//! # Routing activation events
//!
//! When the user turns the page wheel, the driver reports `(page_id, activated)`
//! on its own thread.  The controller looks the id up under its own lock and
//! calls [`Page::set_activation`] on the matching page, which takes the page's
//! lock in turn.  The lock order is always controller → page, and the
//! application's [`Page::set_line`] only takes the page lock, so the two
//! paths can race in either order without deadlock or lost writes.
//!
//! # Keeping a single active page
//!
//! The device shows exactly one page.  When a known page becomes active (by
//! event, or by [`DisplayController::add_page`] with `activate = true`, which
//! the device does not report), every other page still flagged active is
//! deactivated.  Deactivation only clears the flag; it never writes to the
//! device.  An event for an unknown id changes nothing.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::device::DeviceHandleManager;
use crate::driver::DriverBinding;
use crate::error::{FatalError, MfdError};
use crate::page::Page;

/// Returned by [`DisplayController::device_type`] when the query fails.
pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

#[derive(Default)]
struct PageRegistry {
    pages: HashMap<String, Arc<Page>>,
    page_counter: u32,
}

impl PageRegistry {
    /// Clears the flag of every active page except `keep`.
    fn deactivate_others(&self, keep: u32) {
        for page in self.pages.values() {
            if page.id() != keep && page.is_active() {
                page.set_activation(false);
            }
        }
    }
}

struct ControllerInner {
    device: Arc<DeviceHandleManager>,
    registry: Mutex<PageRegistry>,
}

impl ControllerInner {
    fn lock_registry(&self) -> MutexGuard<'_, PageRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs on the driver thread.
    fn on_page_change(&self, page_id: u32, activated: bool) {
        let registry = self.lock_registry();
        debug!(page_id, activated, "onPageChange");
        let Some(page) = registry.pages.values().find(|p| p.id() == page_id) else {
            debug!(page_id, "no page registered under this id");
            return;
        };
        if activated {
            registry.deactivate_others(page_id);
        }
        page.set_activation(activated);
    }
}

/// Facade over the page namespace and the device.
pub struct DisplayController {
    inner: Arc<ControllerInner>,
}

impl DisplayController {
    /// Opens the driver, binds the device and subscribes to page changes.
    ///
    /// # Errors
    ///
    /// Returns the [`MfdError`] from [`DeviceHandleManager::open`].
    pub fn open(driver: Arc<dyn DriverBinding>, app_name: &str) -> Result<Self, MfdError> {
        let device = Arc::new(DeviceHandleManager::open(driver, app_name)?);
        let inner = Arc::new(ControllerInner {
            device: Arc::clone(&device),
            registry: Mutex::new(PageRegistry::default()),
        });

        let weak = Arc::downgrade(&inner);
        device.set_page_change_handler(Arc::new(move |page_id: u32, activated: bool| {
            if let Some(inner) = weak.upgrade() {
                inner.on_page_change(page_id, activated);
            }
        }));

        Ok(Self { inner })
    }

    /// Deinitializes the driver.
    ///
    /// [`Page`] handles obtained earlier must not be used afterwards; their
    /// writes would be rejected by the driver.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::Driver`] if deinitialization fails.
    pub fn close(self) -> Result<(), MfdError> {
        self.inner.device.close()
    }

    /// Creates page `name` with the next id and adds it to the device.
    ///
    /// An existing page with the same name is replaced: its id is abandoned
    /// and nothing is removed from the device.  On failure the page set is
    /// left unchanged, but the id is still consumed.
    ///
    /// # Errors
    ///
    /// Returns the device error from adding the page, unchanged.
    pub fn add_page(&self, name: &str, activate: bool) -> Result<Arc<Page>, MfdError> {
        let mut registry = self.inner.lock_registry();
        debug!(name, activate, "AddPage");
        registry.page_counter += 1;
        let id = registry.page_counter;

        let page = Arc::new(Page::create(
            Arc::clone(&self.inner.device),
            id,
            name,
            activate,
        )?);

        if activate {
            registry.deactivate_others(id);
        }
        if let Some(replaced) = registry.pages.insert(name.to_string(), Arc::clone(&page)) {
            warn!(
                name,
                replaced_id = replaced.id(),
                page_id = id,
                "page name reused, previous page is no longer reachable"
            );
        }
        Ok(page)
    }

    /// Forgets page `name`.  The device keeps showing it if it was active.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::PageNotFound`] if no such page exists.
    pub fn remove_page(&self, name: &str) -> Result<(), MfdError> {
        let mut registry = self.inner.lock_registry();
        match registry.pages.remove(name) {
            Some(page) => {
                info!(name, page_id = page.id(), "page removed");
                Ok(())
            }
            None => Err(MfdError::PageNotFound(name.to_string())),
        }
    }

    /// Looks up page `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::PageNotFound`] if no such page exists.
    pub fn page(&self, name: &str) -> Result<Arc<Page>, MfdError> {
        self.inner
            .lock_registry()
            .pages
            .get(name)
            .cloned()
            .ok_or_else(|| MfdError::PageNotFound(name.to_string()))
    }

    /// Sets row `line` of page `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MfdError::PageNotFound`] or any error from [`Page::set_line`].
    pub fn set_string(&self, name: &str, line: usize, text: impl Into<String>) -> Result<(), MfdError> {
        self.page(name)?.set_line(line, text)
    }

    /// Device type GUID as `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`, or
    /// [`UNKNOWN_DEVICE_TYPE`] if it cannot be read.
    pub fn device_type(&self) -> String {
        match self.inner.device.device_type() {
            Ok(guid) => guid.braced().to_string().to_uppercase(),
            Err(err) => {
                debug!(error = %err, "device type unavailable");
                UNKNOWN_DEVICE_TYPE.to_string()
            }
        }
    }

    /// Names of all registered pages, sorted.
    pub fn page_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock_registry().pages.keys().cloned().collect();
        names.sort();
        names
    }

    /// Takes the fatal-error channel.  See [`FatalError`].
    pub fn take_fatal_receiver(&self) -> Option<Receiver<FatalError>> {
        self.inner.device.take_fatal_receiver()
    }
}

impl Drop for DisplayController {
    fn drop(&mut self) {
        if let Err(err) = self.inner.device.close() {
            warn!(error = %err, "failed to close device");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
