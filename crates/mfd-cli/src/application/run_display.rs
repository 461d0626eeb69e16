//! Use cases driving the display from configuration.
//!
//! - [`install_pages`] creates the configured pages and writes their lines.
//! - [`run_ticker`] periodically writes `Loop: N` to one line, which keeps a
//!   visible heartbeat on the display and exercises the hidden-page cache
//!   whenever the user flips away from the ticker's page.

use std::sync::Arc;
use std::time::Duration;

use mfd_core::{DisplayController, MfdError, Page};
use tracing::{error, info};

use crate::infrastructure::storage::config::{PageConfig, TickerConfig};

/// Text written by the ticker on iteration `n`.
pub fn loop_text(n: u64) -> String {
    format!("Loop: {n}")
}

/// Adds every page in `pages`, in order, and writes its initial lines.
///
/// # Errors
///
/// Stops at the first page or line the device rejects and returns its error.
pub fn install_pages(
    mfd: &DisplayController,
    pages: &[PageConfig],
) -> Result<Vec<Arc<Page>>, MfdError> {
    let mut installed = Vec::with_capacity(pages.len());
    for config in pages {
        let page = mfd.add_page(&config.name, config.active)?;
        for (index, text) in config.lines.iter().enumerate() {
            page.set_line(index, text.as_str())?;
        }
        info!(name = %config.name, page_id = page.id(), active = config.active, "page installed");
        installed.push(page);
    }
    Ok(installed)
}

/// Writes [`loop_text`] to the configured line every `interval_ms`, forever.
///
/// Failed writes are logged and the loop carries on.  Cancel the task to stop.
pub async fn run_ticker(mfd: Arc<DisplayController>, config: TickerConfig) {
    let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
    let mut n: u64 = 0;
    loop {
        interval.tick().await;
        n += 1;
        if let Err(err) = mfd.set_string(&config.page, config.line, loop_text(n)) {
            error!(page = %config.page, line = config.line, error = %err, "error setting string in loop");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mfd_core::driver::mock::MockDriver;
    use mfd_core::DeviceHandle;

    const DEV: DeviceHandle = DeviceHandle(0x1000);

    fn open() -> (Arc<MockDriver>, Arc<DisplayController>) {
        let driver = Arc::new(MockDriver::with_device(DEV));
        let mfd = DisplayController::open(driver.clone(), "test").expect("open");
        (driver, Arc::new(mfd))
    }

    fn page(name: &str, active: bool, lines: &[&str]) -> PageConfig {
        PageConfig {
            name: name.to_string(),
            active,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_loop_text_format() {
        assert_eq!(loop_text(1), "Loop: 1");
        assert_eq!(loop_text(42), "Loop: 42");
    }

    #[test]
    fn test_install_pages_creates_pages_in_order_with_lines() {
        // Arrange
        let (driver, mfd) = open();
        let pages = vec![
            page("page1", true, &["p1 l0", "p1 l1"]),
            page("page2", false, &["a", "b", "c"]),
        ];

        // Act
        let installed = install_pages(&mfd, &pages).expect("install");

        // Assert
        assert_eq!(installed.iter().map(|p| p.id()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(driver.displayed_line(DEV, 1, 1).as_deref(), Some("p1 l1"));
        // Inactive page is only cached.
        assert_eq!(driver.displayed_line(DEV, 2, 0), None);
        assert_eq!(installed[1].line(2), "c");
    }

    #[test]
    fn test_install_pages_rejects_fourth_line() {
        let (_driver, mfd) = open();
        let pages = vec![page("p", false, &["0", "1", "2", "3"])];

        let result = install_pages(&mfd, &pages);

        assert_eq!(result.map(|p| p.len()), Err(MfdError::IndexOutOfRange(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_writes_increasing_loop_counter() {
        // Arrange
        let (driver, mfd) = open();
        install_pages(&mfd, &[page("page1", true, &[])]).expect("install");
        let config = TickerConfig {
            enabled: true,
            page: "page1".to_string(),
            line: 2,
            interval_ms: 250,
        };

        // Act: the first tick is immediate, then one per interval.
        let task = tokio::spawn(run_ticker(Arc::clone(&mfd), config));
        tokio::time::sleep(Duration::from_millis(600)).await;
        task.abort();
        let _ = task.await;

        // Assert
        assert_eq!(driver.displayed_line(DEV, 1, 2).as_deref(), Some("Loop: 3"));
        assert_eq!(mfd.page("page1").expect("page").line(2), "Loop: 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_survives_missing_page() {
        let (_driver, mfd) = open();
        let config = TickerConfig {
            page: "absent".to_string(),
            ..TickerConfig::default()
        };

        let task = tokio::spawn(run_ticker(Arc::clone(&mfd), config));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(!task.is_finished());
        task.abort();
    }
}
