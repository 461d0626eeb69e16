//! A logical display page: three cached lines and an activation flag.
//!
//! The device only accepts text for the page it is currently showing, so a
//! [`Page`] keeps its own copy of every line:
//!
//! - While the page is **inactive**, [`Page::set_line`] only updates the cache.
//! - While it is **active**, the write also goes to the device.
//! - When it becomes active, the whole cache is pushed (rows 0, 1, 2).
//!
//! Both the application (line writes) and the driver thread (activation
//! changes) mutate a page.  Every mutation and every push takes the page's own
//! mutex, so a write can never slip between "flag flipped to active" and
//! "cache pushed", and the device always ends up showing the latest cached
//! text.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::device::DeviceHandleManager;
use crate::error::MfdError;

/// Rows on the X52 Pro display.
pub const LINE_COUNT: usize = 3;

#[derive(Debug, Default)]
struct PageState {
    lines: [String; LINE_COUNT],
    active: bool,
}

/// A named page registered with the device.
///
/// Pages are created by [`crate::display::DisplayController::add_page`].
pub struct Page {
    id: u32,
    name: String,
    device: Arc<DeviceHandleManager>,
    state: Mutex<PageState>,
}

impl Page {
    /// Adds the page to the device and returns its local record.
    ///
    /// # Errors
    ///
    /// Returns the device's [`MfdError`] if the page could not be added.
    pub(crate) fn create(
        device: Arc<DeviceHandleManager>,
        id: u32,
        name: &str,
        active: bool,
    ) -> Result<Self, MfdError> {
        info!(page_id = id, name, active, "new page");
        device.add_page(id, name, active)?;
        Ok(Self {
            id,
            name: name.to_string(),
            device,
            state: Mutex::new(PageState {
                active,
                ..PageState::default()
            }),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Sets row `index` to `text`.
    ///
    /// The cache is always updated.  The device is only written when the page
    /// is active; otherwise the text is shown on the next activation.
    ///
    /// # Errors
    ///
    /// - [`MfdError::IndexOutOfRange`] if `index` is not 0, 1 or 2.  Nothing
    ///   is changed in that case.
    /// - [`MfdError::Driver`] if the device rejects the write.  The cache
    ///   still holds the new text.
    pub fn set_line(&self, index: usize, text: impl Into<String>) -> Result<(), MfdError> {
        if index >= LINE_COUNT {
            return Err(MfdError::IndexOutOfRange(index));
        }
        let mut state = self.lock();
        state.lines[index] = text.into();
        if state.active {
            self.device
                .set_line(self.id, index as u32, &state.lines[index])?;
        }
        Ok(())
    }

    /// Cached text of row `index`, or an empty string if out of range.
    pub fn line(&self, index: usize) -> String {
        self.lock().lines.get(index).cloned().unwrap_or_default()
    }

    /// Snapshot of all rows, taken under one lock acquisition.
    pub fn lines(&self) -> [String; LINE_COUNT] {
        self.lock().lines.clone()
    }

    /// Records an activation change reported by the device.
    ///
    /// Becoming active pushes every cached row.  Activating an already active
    /// page pushes them again.
    pub fn set_activation(&self, active: bool) {
        let mut state = self.lock();
        debug!(page_id = self.id, active, "set activation");
        state.active = active;
        if active {
            self.push_lines(&state);
        }
    }

    /// Pushes every cached row to the device if the page is active.
    pub fn refresh(&self) {
        let state = self.lock();
        if state.active {
            self.push_lines(&state);
        }
    }

    /// A failing row is logged and does not stop the remaining rows.
    fn push_lines(&self, state: &PageState) {
        for (line, text) in state.lines.iter().enumerate() {
            if let Err(err) = self.device.set_line(self.id, line as u32, text) {
                warn!(page_id = self.id, line, error = %err, "failed to set string");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lines", &state.lines)
            .field("active", &state.active)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
