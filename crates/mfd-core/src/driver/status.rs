//! Driver status codes and their mapping to typed errors.
//!
//! Every DirectOutput call returns an `HRESULT`.  Exactly one value,
//! [`StatusCode::S_OK`], means success; every other value is a failure and is
//! translated into a [`DriverError`].  The mapping is exact: a code is never
//! compared by sign bit or severity, so an unrecognised success-looking value
//! is still reported as [`DriverError::Unknown`].

use std::fmt;

use thiserror::Error;

/// Raw status code returned by a driver call or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The call succeeded.
    pub const S_OK: Self = Self(0x0000_0000);
    /// The device handle is not valid.
    pub const E_HANDLE: Self = Self(0x8007_0006);
    /// The operation is not implemented.
    pub const E_NOTIMPL: Self = Self(0x8000_4001);
    /// An argument was rejected by the driver.
    pub const E_INVALIDARG: Self = Self(0x8007_0057);
    /// The targeted page is not the one currently shown on the display.
    pub const E_PAGENOTACTIVE: Self = Self(0xFF04_0001);

    /// Returns `true` only for [`StatusCode::S_OK`].
    pub fn is_success(self) -> bool {
        self == Self::S_OK
    }

    /// Converts the status into a `Result`, mapping failures to [`DriverError`].
    ///
    /// # Errors
    ///
    /// Returns the [`DriverError`] for any code other than `S_OK`.
    pub fn into_result(self) -> Result<(), DriverError> {
        match DriverError::from_status(self) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A non-success status code returned by the driver.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverError {
    #[error("is not a valid handle")]
    InvalidHandle,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid argument")]
    InvalidArgument,
    /// Writing to a page that is not currently displayed.
    #[error("page not active")]
    PageNotActive,
    /// Any failure code without a dedicated variant.  Never holds a known code.
    #[error("unknown error: 0x{0:08X}")]
    Unknown(u32),
}

impl DriverError {
    /// Maps a status code to an error, or `None` for `S_OK`.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::S_OK => None,
            StatusCode::E_HANDLE => Some(Self::InvalidHandle),
            StatusCode::E_NOTIMPL => Some(Self::NotImplemented),
            StatusCode::E_INVALIDARG => Some(Self::InvalidArgument),
            StatusCode::E_PAGENOTACTIVE => Some(Self::PageNotActive),
            StatusCode(other) => Some(Self::Unknown(other)),
        }
    }

    /// The status code this error was produced from.
    pub fn code(self) -> StatusCode {
        match self {
            Self::InvalidHandle => StatusCode::E_HANDLE,
            Self::NotImplemented => StatusCode::E_NOTIMPL,
            Self::InvalidArgument => StatusCode::E_INVALIDARG,
            Self::PageNotActive => StatusCode::E_PAGENOTACTIVE,
            Self::Unknown(code) => StatusCode(code),
        }
    }
}

impl From<DriverError> for StatusCode {
    fn from(err: DriverError) -> Self {
        err.code()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
