//! Application layer use cases for the `x52-mfd` tool.
//!
//! Use cases here orchestrate the [`mfd_core::DisplayController`] to fulfil a
//! user goal.  They depend on the controller and configuration types only and
//! make no OS calls of their own.
//!
//! # Sub-modules
//!
//! - **`run_display`** – Installs the configured pages and runs the
//!   `Loop: N` ticker.
//!
//! - **`simulate_device`** – The in-memory device used when the vendor driver
//!   is unavailable, including the task that flips pages like a user would.

pub mod run_display;
pub mod simulate_device;
