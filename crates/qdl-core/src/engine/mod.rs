//! Flashing engine boundary.
//!
//! The engine is an external library; this module defines the trait it is
//! consumed through, a mock twin for testing, and the native backend.

pub mod mock;
pub mod traits;

#[cfg(feature = "libqdl")]
pub mod libqdl;

pub use mock::MockEngine;
pub use traits::{EngineError, FlashEngine, RawDevice, RunArgs, StorageKind};

#[cfg(feature = "libqdl")]
pub use libqdl::LibqdlEngine;
