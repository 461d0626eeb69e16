//! Simulated X52 Pro for machines without the vendor driver.
//!
//! The simulated device is a [`MockDriver`] with one attached device.  A
//! background task plays the user turning the page wheel: every period it
//! activates the next page the application added, which drives the same
//! page-change path the real driver thread would.

use std::sync::Arc;
use std::time::Duration;

use mfd_core::driver::mock::MockDriver;
use mfd_core::DeviceHandle;
use tracing::{debug, info};

/// Handle of the simulated device.
pub const SIMULATED_DEVICE: DeviceHandle = DeviceHandle(0x52_0000);

/// How often the simulated user flips pages.
pub const PAGE_CYCLE_PERIOD: Duration = Duration::from_secs(3);

/// Creates a driver with the simulated device attached.
pub fn simulated_driver() -> Arc<MockDriver> {
    info!(handle = %SIMULATED_DEVICE, "using simulated device");
    Arc::new(MockDriver::with_device(SIMULATED_DEVICE))
}

/// The page that follows `current` in `ids`, wrapping around.
///
/// Starts from the first page when `current` is unset or unknown; returns
/// `None` when there are no pages.
pub fn next_page(ids: &[u32], current: Option<u32>) -> Option<u32> {
    let position = current.and_then(|id| ids.iter().position(|&p| p == id));
    match position {
        Some(i) => ids.get((i + 1) % ids.len()).copied(),
        None => ids.first().copied(),
    }
}

/// Activates the next page every `period`, forever.  Cancel the task to stop.
pub async fn cycle_pages(driver: Arc<MockDriver>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; keep the startup page for one period.
    interval.tick().await;
    loop {
        interval.tick().await;
        let ids = driver.page_ids(SIMULATED_DEVICE);
        if let Some(next) = next_page(&ids, driver.active_page(SIMULATED_DEVICE)) {
            debug!(page_id = next, "simulated page wheel");
            driver.activate_page(SIMULATED_DEVICE, next);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
