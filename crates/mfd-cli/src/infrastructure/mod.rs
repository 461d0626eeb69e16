//! Infrastructure layer for the `x52-mfd` tool.
//!
//! Contains OS-facing adapters: the DirectOutput driver binding (Windows only)
//! and file-system storage for the configuration.
//!
//! **Dependency rule**: this layer may depend on `mfd_core`, but MUST NOT be
//! imported by the `application` layer except for plain configuration types.

#[cfg(target_os = "windows")]
pub mod direct_output;
pub mod storage;
