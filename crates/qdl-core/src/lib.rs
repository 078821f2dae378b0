//! qdl-core: flashing session orchestration for EDL-mode devices.
//!
//! Drives an external flashing/provisioning engine: select a device,
//! assemble a set of firmware artifacts (a programmer image plus one or
//! more descriptor manifests), and run exactly one flashing session at a
//! time while observing live progress.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Engine**: trait boundary over the external flashing library
//!   (native libqdl behind the `libqdl` feature, mock for tests)
//! - **Device**: handles with enumeration-assigned identity
//! - **Matcher**: filtered recursive artifact scan
//! - **Picker / Staging**: pre-filtered temporary view for a generic
//!   file-choosing UI, resolved back to canonical paths
//! - **Bridge**: single-slot progress registration between the engine's
//!   thread and the session
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: single-flight orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use qdl_core::engine::MockEngine;
//! use qdl_core::session::{FlashSession, SessionConfig};
//!
//! let engine = Arc::new(MockEngine::new());
//! let session = FlashSession::new(engine, SessionConfig::default());
//! session.set_programmer(Some("/fw/prog.elf".into()));
//! session.set_rawprogram(vec!["/fw/rawprogram0.xml".into()]);
//! if session.start() {
//!     session.wait();
//! }
//! ```

pub mod bridge;
pub mod device;
pub mod engine;
pub mod events;
pub mod matcher;
pub mod picker;
pub mod session;
pub mod staging;

// Re-exports for convenience
pub use bridge::{ProgressBridge, Registration};
pub use device::{DeviceHandle, EnumerationId, enumerate};
pub use engine::{EngineError, FlashEngine, MockEngine, RawDevice, RunArgs, StorageKind};
pub use events::{LogLevel, NullObserver, ProgressEvent, SessionEvent, SessionObserver, TracingObserver};
pub use matcher::match_artifacts;
pub use picker::{FilePicker, PickRequest};
pub use session::{
    ArtifactSet, FlashSession, OperationMode, RunStatus, SessionConfig, SessionState, can_start,
};
pub use staging::{ResolutionMode, Stager, StagingError};
