use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use qdl_core::engine::FlashEngine;
use qdl_core::picker::{FilePicker, PickRequest};
use qdl_core::session::{FlashSession, OperationMode, SessionConfig};
use qdl_core::staging::{ResolutionMode, Stager};
use qdl_core::{StorageKind, device};
use tracing::{info, warn};

/// Extensions the programmer image may carry.
const PROGRAMMER_EXTS: &[&str] = &["elf", "mbn", "bin"];
/// Extensions descriptor manifests carry.
const MANIFEST_EXTS: &[&str] = &["xml"];

#[derive(Parser, Debug)]
#[command(author, version, about = "Qualcomm EDL flashing front end", long_about = None)]
struct Args {
    /// Session config file (TOML); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Firmware directory to stage artifacts from
    #[arg(long)]
    firmware_dir: Option<PathBuf>,

    /// Operation mode: download or provision
    #[arg(long)]
    mode: Option<OperationMode>,

    /// Target storage: emmc, nand, ufs, nvme, spinor
    #[arg(long)]
    storage: Option<StorageKind>,

    /// Programmer image; staged from the firmware directory when omitted
    #[arg(long)]
    programmer: Option<PathBuf>,

    /// Only flash the device with this serial
    #[arg(long)]
    serial: Option<String>,

    /// List connected devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the engine version and exit
    #[arg(long)]
    engine_version: bool,

    /// Fall back to raw picked paths when staging resolution fails
    #[arg(long)]
    lenient: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Non-interactive picker: accepts every candidate it is shown.
struct PickAll;

impl FilePicker for PickAll {
    fn pick(&self, request: &PickRequest) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&request.dir) else {
            return Vec::new();
        };
        let mut picked: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        picked.sort();
        if !request.multiple {
            picked.truncate(1);
        }
        picked
    }
}

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn run_app<E: FlashEngine + 'static>(engine: Arc<E>, args: Args) -> Result<i32> {
    if args.engine_version {
        println!("{}", engine.version());
        return Ok(0);
    }

    if args.list_devices {
        let devices = device::enumerate(engine.as_ref(), 16)?;
        if devices.is_empty() {
            println!("No devices found");
        }
        for d in &devices {
            println!("{d}");
        }
        return Ok(0);
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(dir) = &args.firmware_dir {
        config.firmware_root = Some(dir.clone());
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(storage) = args.storage {
        config.storage = storage;
    }
    config.lenient_resolution |= args.lenient;
    config.verbose |= args.verbose;

    let Some(firmware_root) = config.firmware_root.clone() else {
        bail!("no firmware directory; pass --firmware-dir or set it in the config");
    };

    let resolution = if config.lenient_resolution {
        ResolutionMode::Lenient
    } else {
        ResolutionMode::Strict
    };
    let stager = Stager::new(PickAll).with_resolution(resolution);

    let mode = config.mode;
    let session = FlashSession::new(engine, config);
    session.set_mode(mode);
    session.set_firmware_root(Some(firmware_root.clone()));

    match args.programmer {
        Some(path) => session.set_programmer(Some(path)),
        None => {
            let staged =
                stager.stage_single(&firmware_root, &exts(PROGRAMMER_EXTS), "prog*")?;
            session.set_programmer(staged);
        }
    }

    match mode {
        OperationMode::Download => {
            session.set_rawprogram(stager.stage(
                &firmware_root,
                &exts(MANIFEST_EXTS),
                "rawprogram*",
            )?);
            session.set_patches(stager.stage(&firmware_root, &exts(MANIFEST_EXTS), "patch*")?);
        }
        OperationMode::Provision => {
            session.set_provision(stager.stage(
                &firmware_root,
                &exts(MANIFEST_EXTS),
                "provision*",
            )?);
        }
    }

    let devices = device::enumerate(session.engine(), 16)?;
    let selected = match &args.serial {
        Some(serial) => {
            let found = devices.into_iter().find(|d| &d.serial == serial);
            if found.is_none() {
                bail!("no device with serial {serial}");
            }
            found
        }
        None => devices.into_iter().next(),
    };
    if let Some(d) = &selected {
        info!(device = %d, "Selected device");
    } else {
        warn!("No device connected; the engine will wait for one");
    }
    session.select_device(selected);

    if !session.start() {
        bail!("session is not runnable; check programmer and manifest selection");
    }
    session.wait();

    let outcome = session.snapshot().last_outcome.unwrap_or(-1);
    Ok(outcome)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    #[cfg(feature = "libqdl")]
    let engine = Arc::new(qdl_core::engine::LibqdlEngine::new());
    #[cfg(not(feature = "libqdl"))]
    let engine = {
        warn!("Built without the libqdl feature; using the mock engine");
        Arc::new(qdl_core::engine::MockEngine::new())
    };

    match run_app(engine, args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
