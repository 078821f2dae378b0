//! Flashing engine abstraction.
//!
//! Defines the `FlashEngine` trait over the external flashing/provisioning
//! library, allowing different backends (native libqdl, mock for tests).
//! The engine is opaque and assumed correct; this crate's job is to call
//! it safely and exactly once per session.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::ProgressBridge;
use crate::session::OperationMode;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Engine backend not available: {0}")]
    Unavailable(String),
}

/// Target storage medium, as understood by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Unknown,
    Emmc,
    Nand,
    #[default]
    Ufs,
    Nvme,
    Spinor,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageKind::Unknown => "unknown",
            StorageKind::Emmc => "emmc",
            StorageKind::Nand => "nand",
            StorageKind::Ufs => "ufs",
            StorageKind::Nvme => "nvme",
            StorageKind::Spinor => "spinor",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emmc" => Ok(StorageKind::Emmc),
            "nand" => Ok(StorageKind::Nand),
            "ufs" => Ok(StorageKind::Ufs),
            "nvme" => Ok(StorageKind::Nvme),
            "spinor" => Ok(StorageKind::Spinor),
            other => Err(format!("unknown storage kind: {other}")),
        }
    }
}

/// One enumeration entry as reported by the engine.
///
/// Fixed-size C text fields are decoded at the FFI edge; by the time a
/// record reaches this type both strings are owned and NUL-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub serial: String,
    pub product: String,
}

/// Owned, fully marshaled arguments for one engine run.
///
/// Built once per accepted `start` and passed by reference across the
/// engine boundary; all buffers free themselves when the run scope ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    pub mode: OperationMode,
    /// Serial filter; `None` lets the engine pick the first device.
    pub serial: Option<String>,
    pub storage: StorageKind,
    pub programmer: Option<PathBuf>,
    /// Ordered manifest list; the engine applies these in sequence.
    pub artifacts: Vec<PathBuf>,
    pub verbose: bool,
    /// Search root for cross-referenced files; parent of the first
    /// artifact, or `None` when the list is empty.
    pub include_dir: Option<PathBuf>,
}

/// Abstract flashing engine interface.
pub trait FlashEngine: Send + Sync {
    /// Enumerate connected devices, bounded by `max`.
    fn enumerate(&self, max: usize) -> Result<Vec<RawDevice>, EngineError>;

    /// Execute one flashing/provisioning run. Blocking; must be called
    /// from a background context. Progress is delivered through `progress`
    /// from the engine's own execution context. Returns the engine outcome
    /// code; zero conventionally denotes success and non-zero is a normal,
    /// reportable run failure.
    fn run(&self, args: &RunArgs, progress: &ProgressBridge) -> i32;

    /// Engine version string.
    fn version(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_round_trip() {
        for kind in [
            StorageKind::Emmc,
            StorageKind::Nand,
            StorageKind::Ufs,
            StorageKind::Nvme,
            StorageKind::Spinor,
        ] {
            let parsed: StorageKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("floppy".parse::<StorageKind>().is_err());
    }
}
