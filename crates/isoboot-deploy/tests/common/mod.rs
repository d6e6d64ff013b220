//! Common test utilities for isoboot-deploy
//!
//! Provides a directory-backed image mounter, a scripted DISM and image tree
//! builders.

pub mod fake_dism;
pub mod fake_mounter;

pub use fake_dism::*;
pub use fake_mounter::*;
