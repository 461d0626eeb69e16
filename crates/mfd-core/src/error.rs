//! Error taxonomy for the page engine.
//!
//! Two kinds of failure exist:
//!
//! - [`MfdError`] – ordinary, recoverable failures returned to the caller of
//!   the operation that produced them.
//! - [`FatalError`] – the device is bound but its page or soft-button
//!   callbacks could not be registered.  These happen on the driver's thread,
//!   have no caller to return to, and leave the engine half-wired, so they
//!   are delivered on a dedicated channel
//!   (see [`crate::display::DisplayController::take_fatal_receiver`]) and the
//!   application decides how to abort.

use thiserror::Error;

use crate::driver::{DeviceHandle, DriverError, StatusCode};

/// Errors returned by the page engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MfdError {
    /// The driver failed to initialize.  Not retried.
    #[error("failed to initialize DirectOutput: {0}")]
    Init(#[source] DriverError),

    /// The device-change callback could not be registered during open.
    #[error("failed to register device callback: {0}")]
    CallbackRegistration(#[source] DriverError),

    /// A device removal or a second device was reported.
    #[error(transparent)]
    HandleUnsupported(#[from] UnsupportedHandle),

    /// A hardware call returned a failure status.  Surfaced verbatim.
    #[error("driver call failed: {0}")]
    Driver(#[from] DriverError),

    /// No page is registered under the given name.
    #[error("page does not exist: {0}")]
    PageNotFound(String),

    /// A line index outside `0..=2`.
    #[error("line {0} out of range, a page has lines 0, 1 and 2")]
    IndexOutOfRange(usize),
}

impl MfdError {
    /// `true` when the driver rejected a write because the page is not shown.
    ///
    /// Callers may treat this as benign: the page layer caches writes to
    /// inactive pages and replays them on activation.
    pub fn is_page_not_active(&self) -> bool {
        matches!(self, Self::Driver(DriverError::PageNotActive))
    }
}

/// Why a device-change report was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedHandle {
    #[error("device removal not supported (device {0})")]
    Removal(DeviceHandle),

    #[error("multiple devices not supported: device {reported} reported while {bound} is bound")]
    MultipleDevices {
        bound: DeviceHandle,
        reported: DeviceHandle,
    },
}

impl UnsupportedHandle {
    /// Status returned to the driver for the rejected event.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Removal(_) => StatusCode::E_NOTIMPL,
            Self::MultipleDevices { .. } => StatusCode::E_HANDLE,
        }
    }
}

/// Unrecoverable wiring failure after a device was bound.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    #[error("failed to register page callback for device {handle}: {source}")]
    PageCallbackRegistration {
        handle: DeviceHandle,
        #[source]
        source: DriverError,
    },

    #[error("failed to register soft button callback for device {handle}: {source}")]
    SoftButtonCallbackRegistration {
        handle: DeviceHandle,
        #[source]
        source: DriverError,
    },
}

impl FatalError {
    /// Status returned to the driver for the device-change event that failed.
    pub fn status(self) -> StatusCode {
        match self {
            Self::PageCallbackRegistration { source, .. }
            | Self::SoftButtonCallbackRegistration { source, .. } => source.code(),
        }
    }
}
