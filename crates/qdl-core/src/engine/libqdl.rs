//! Native libqdl engine backend (feature `libqdl`).
//!
//! Thin FFI layer over the C flashing library. All C-string argument
//! buffers are owned Rust values built once per run and released when the
//! call scope ends; the global C progress callback is routed through one
//! trampoline into a [`ProgressBridge`] clone whose lifetime brackets the
//! `qdl_run` call.

use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_void};
use std::path::Path;
use std::ptr;

use super::traits::{EngineError, FlashEngine, RawDevice, RunArgs, StorageKind};
use crate::bridge::ProgressBridge;
use crate::events::ProgressEvent;
use crate::session::OperationMode;

const QDL_MODE_FLASH: c_int = 0;
const QDL_MODE_PROVISION: c_int = 1;

#[repr(C)]
struct QdlDeviceInfo {
    serial: [c_char; 64],
    product: [c_char; 64],
}

type QdlProgressCb =
    Option<unsafe extern "C" fn(*const c_char, c_uint, c_uint, *mut c_void)>;

#[link(name = "qdl")]
unsafe extern "C" {
    fn qdl_list_devices(devices: *mut QdlDeviceInfo, max_devices: c_int) -> c_int;
    fn qdl_run(
        mode: c_int,
        serial: *const c_char,
        storage_type: c_int,
        prog_mbn: *const c_char,
        xml_files: *const *const c_char,
        xml_file_count: c_int,
        allow_missing: bool,
        include_dir: *const c_char,
        out_chunk_size: c_uint,
    ) -> c_int;
    fn qdl_set_progress_callback(cb: QdlProgressCb, userdata: *mut c_void);
    fn qdl_version() -> *const c_char;
}

unsafe extern "C" fn progress_trampoline(
    task: *const c_char,
    value: c_uint,
    total: c_uint,
    userdata: *mut c_void,
) {
    if userdata.is_null() {
        return;
    }
    // userdata is the ProgressBridge leased to qdl_run for this call.
    let bridge = unsafe { &*(userdata as *const ProgressBridge) };
    let task = if task.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(task) }.to_string_lossy().into_owned()
    };
    bridge.emit(ProgressEvent {
        task,
        completed: value,
        total,
    });
}

fn storage_code(kind: StorageKind) -> c_int {
    match kind {
        StorageKind::Unknown => 0,
        StorageKind::Emmc => 1,
        StorageKind::Nand => 2,
        StorageKind::Ufs => 3,
        StorageKind::Nvme => 4,
        StorageKind::Spinor => 5,
    }
}

fn c_path(path: &Path) -> CString {
    // Interior NULs cannot appear in real paths; map the impossible case
    // to an empty string rather than aborting the run.
    CString::new(path.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Owned C argument buffers for one `qdl_run` call.
///
/// Every pointer handed to the engine borrows from a field of this struct,
/// so all of them stay valid for the duration of the call and free
/// themselves afterwards.
struct CallBuffers {
    serial: Option<CString>,
    programmer: Option<CString>,
    include_dir: Option<CString>,
    artifacts: Vec<CString>,
}

impl CallBuffers {
    fn build(args: &RunArgs) -> Self {
        Self {
            serial: args
                .serial
                .as_deref()
                .filter(|s| !s.is_empty())
                .and_then(|s| CString::new(s).ok()),
            programmer: args.programmer.as_deref().map(c_path),
            include_dir: args.include_dir.as_deref().map(c_path),
            artifacts: args.artifacts.iter().map(|p| c_path(p)).collect(),
        }
    }

    fn opt_ptr(field: &Option<CString>) -> *const c_char {
        field.as_ref().map_or(ptr::null(), |c| c.as_ptr())
    }
}

fn decode_fixed(field: &[c_char; 64]) -> String {
    let bytes: &[u8] = unsafe { &*(field as *const [c_char; 64] as *const [u8; 64]) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Engine backend over the native libqdl library.
pub struct LibqdlEngine;

impl LibqdlEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LibqdlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashEngine for LibqdlEngine {
    fn enumerate(&self, max: usize) -> Result<Vec<RawDevice>, EngineError> {
        let max = max.min(c_int::MAX as usize) as c_int;
        let mut buf: Vec<QdlDeviceInfo> = Vec::with_capacity(max as usize);
        buf.resize_with(max as usize, || QdlDeviceInfo {
            serial: [0; 64],
            product: [0; 64],
        });

        let count = unsafe { qdl_list_devices(buf.as_mut_ptr(), max) };
        if count < 0 {
            return Err(EngineError::EnumerationFailed(format!(
                "qdl_list_devices returned {count}"
            )));
        }

        Ok(buf
            .iter()
            .take(count as usize)
            .map(|d| RawDevice {
                serial: decode_fixed(&d.serial),
                product: decode_fixed(&d.product),
            })
            .collect())
    }

    fn run(&self, args: &RunArgs, progress: &ProgressBridge) -> i32 {
        let bufs = CallBuffers::build(args);
        let artifact_ptrs: Vec<*const c_char> =
            bufs.artifacts.iter().map(|c| c.as_ptr()).collect();
        let mode = match args.mode {
            OperationMode::Download => QDL_MODE_FLASH,
            OperationMode::Provision => QDL_MODE_PROVISION,
        };

        // Lease a boxed bridge clone to the global callback slot for the
        // duration of the call; cleared before the box is dropped.
        let leased: *mut ProgressBridge = Box::into_raw(Box::new(progress.clone()));
        unsafe {
            qdl_set_progress_callback(Some(progress_trampoline), leased as *mut c_void);
        }

        let ret = unsafe {
            qdl_run(
                mode,
                CallBuffers::opt_ptr(&bufs.serial),
                storage_code(args.storage),
                CallBuffers::opt_ptr(&bufs.programmer),
                artifact_ptrs.as_ptr(),
                artifact_ptrs.len() as c_int,
                false,
                CallBuffers::opt_ptr(&bufs.include_dir),
                0,
            )
        };

        unsafe {
            qdl_set_progress_callback(None, ptr::null_mut());
            drop(Box::from_raw(leased));
        }

        ret
    }

    fn version(&self) -> String {
        let ptr = unsafe { qdl_version() };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}
