//! # mfd-core
//!
//! Page-state synchronization engine for the multi-function display of the
//! Saitek / Logitech X52 Pro, driven through the vendor DirectOutput driver.
//!
//! # Architecture overview
//!
//! The display shows one page of three text lines at a time.  The application
//! defines pages and writes text; the user flips between pages with a wheel
//! on the device.  Those two sources of change arrive on different threads,
//! and this crate keeps them consistent:
//!
//! ```text
//! application ──► DisplayController ──► Page ──► DeviceHandleManager ──► DriverBinding ──► device
//! device ──► DriverBinding callback ──► DeviceHandleManager ──► DisplayController ──► Page
//! ```
//!
//! - **`driver`** – The [`DriverBinding`] trait (the vendor operation set),
//!   status codes, and an in-memory [`driver::mock::MockDriver`].
//!
//! - **`device`** – [`DeviceHandleManager`]: driver lifecycle, the single
//!   device handle, status-code translation and event forwarding.
//!
//! - **`page`** – [`Page`]: the cached lines of one page, written to the
//!   device only while the page is shown.
//!
//! - **`display`** – [`DisplayController`]: the facade applications use.
//!
//! - **`error`** – [`MfdError`] for ordinary failures and [`FatalError`] for
//!   wiring failures delivered on the fatal channel.

pub mod device;
pub mod display;
pub mod driver;
pub mod error;
pub mod page;

pub use device::{DeviceHandleManager, PageChangeHandler};
pub use display::{DisplayController, UNKNOWN_DEVICE_TYPE};
pub use driver::{DeviceHandle, DriverBinding, DriverError, StatusCode};
pub use error::{FatalError, MfdError, UnsupportedHandle};
pub use page::{Page, LINE_COUNT};
