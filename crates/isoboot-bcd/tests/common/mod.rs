//! Common test utilities for isoboot-bcd
//!
//! Provides an in-memory boot store that understands the `bcdedit` and
//! `mountvol` commands the configurator issues.

pub mod fake_bcd;

pub use fake_bcd::*;
