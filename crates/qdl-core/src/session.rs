//! Flashing session - single-flight orchestrator for engine runs.
//!
//! Owns the mutable session state, validates that a run is possible,
//! marshals state into owned engine arguments, registers the progress
//! bridge, and drives the blocking engine call on a background thread. On
//! completion (success, failure, or engine fault) it unregisters the
//! bridge, releases scoped resources, and publishes the outcome.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bridge::ProgressBridge;
use crate::device::DeviceHandle;
use crate::engine::{FlashEngine, RunArgs, StorageKind};
use crate::events::{ProgressEvent, SessionEvent, SessionObserver, TracingObserver};

/// Outcome code reported when the engine call itself faults (panics)
/// rather than returning. Distinct from any engine-defined failure only by
/// convention; non-zero is non-zero.
pub const ENGINE_FAULT_OUTCOME: i32 = -1;

/// Which kind of run the session performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    #[default]
    Download,
    Provision,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::Download => write!(f, "download"),
            OperationMode::Provision => write!(f, "provision"),
        }
    }
}

impl std::str::FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "download" | "flash" => Ok(OperationMode::Download),
            "provision" => Ok(OperationMode::Provision),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
}

/// The staged firmware artifacts for a session.
///
/// All paths are canonical by the time they land here; staging guarantees
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    pub programmer: Option<PathBuf>,
    pub rawprogram: Vec<PathBuf>,
    pub patches: Vec<PathBuf>,
    pub provision: Vec<PathBuf>,
    pub firmware_root: Option<PathBuf>,
}

/// Mutable session record. Lives for the process lifetime; a run is a
/// transient sub-lifecycle bounded by `status` going Idle-Running-Idle.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub selected: Option<DeviceHandle>,
    pub mode: OperationMode,
    pub artifacts: ArtifactSet,
    pub status: RunStatus,
    pub last_progress: ProgressEvent,
    pub last_outcome: Option<i32>,
}

/// Persistent session defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Firmware directory to stage artifacts from.
    #[serde(default)]
    pub firmware_root: Option<PathBuf>,
    /// Operation mode.
    #[serde(default)]
    pub mode: OperationMode,
    /// Target storage medium.
    #[serde(default)]
    pub storage: StorageKind,
    /// Fall back to the raw picked path when staging resolution fails.
    #[serde(default)]
    pub lenient_resolution: bool,
    /// Pass the engine's verbose flag.
    #[serde(default)]
    pub verbose: bool,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Pure runnability predicate.
///
/// Download requires a programmer and at least one rawprogram manifest.
/// Provision requires at least one provision manifest, or a programmer
/// already present (a previously selected programmer may be reused without
/// re-specifying raw images).
pub fn can_start(state: &SessionState) -> bool {
    match state.mode {
        OperationMode::Download => {
            state.artifacts.programmer.is_some() && !state.artifacts.rawprogram.is_empty()
        }
        OperationMode::Provision => {
            !state.artifacts.provision.is_empty() || state.artifacts.programmer.is_some()
        }
    }
}

/// Build the owned engine arguments from the current state.
///
/// The manifest list is `rawprogram ++ patches` for Download and
/// `provision` for Provision; the engine applies them in this order. The
/// include directory is the parent of the first manifest, absent when the
/// list is empty.
fn marshal(state: &SessionState, config: &SessionConfig) -> RunArgs {
    let artifacts: Vec<PathBuf> = match state.mode {
        OperationMode::Download => state
            .artifacts
            .rawprogram
            .iter()
            .chain(state.artifacts.patches.iter())
            .cloned()
            .collect(),
        OperationMode::Provision => state.artifacts.provision.clone(),
    };

    let include_dir = artifacts
        .first()
        .and_then(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);

    RunArgs {
        mode: state.mode,
        serial: state
            .selected
            .as_ref()
            .map(|d| d.serial.clone())
            .filter(|s| !s.is_empty()),
        storage: config.storage,
        programmer: state.artifacts.programmer.clone(),
        artifacts,
        verbose: config.verbose,
        include_dir,
    }
}

/// Scoped access over the artifacts of one run.
///
/// Stand-in for sandboxed/security-scoped resource access: started before
/// the engine call, released by Drop on every exit path. A path that fails
/// to start is logged and skipped; the run proceeds best-effort with
/// whatever access was obtained.
struct ScopedAccess {
    started: Vec<PathBuf>,
}

impl ScopedAccess {
    fn acquire(args: &RunArgs) -> Self {
        let mut started = Vec::new();
        let all = args.programmer.iter().chain(args.artifacts.iter());
        for path in all {
            match std::fs::metadata(path) {
                Ok(_) => started.push(path.clone()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not start access, continuing");
                }
            }
        }
        debug!(count = started.len(), "Scoped access started");
        Self { started }
    }
}

impl Drop for ScopedAccess {
    fn drop(&mut self) {
        debug!(count = self.started.len(), "Scoped access released");
    }
}

/// Single-flight flashing session orchestrator.
pub struct FlashSession<E: FlashEngine> {
    state: Arc<Mutex<SessionState>>,
    config: SessionConfig,
    engine: Arc<E>,
    bridge: ProgressBridge,
    observer: Arc<dyn SessionObserver>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: FlashEngine + 'static> FlashSession<E> {
    /// Create a session with the default tracing observer.
    pub fn new(engine: Arc<E>, config: SessionConfig) -> Self {
        Self::with_observer(engine, config, Arc::new(TracingObserver))
    }

    /// Create a session with a custom observer.
    pub fn with_observer(
        engine: Arc<E>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            config,
            engine,
            bridge: ProgressBridge::new(),
            observer,
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Clone of the current state, for display.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    /// Whether a run could be accepted right now.
    pub fn can_start(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.status == RunStatus::Idle && can_start(&state)
    }

    pub fn select_device(&self, device: Option<DeviceHandle>) {
        self.state.lock().unwrap().selected = device;
    }

    pub fn set_mode(&self, mode: OperationMode) {
        self.state.lock().unwrap().mode = mode;
    }

    pub fn set_programmer(&self, path: Option<PathBuf>) {
        self.state.lock().unwrap().artifacts.programmer = path;
    }

    pub fn set_rawprogram(&self, paths: Vec<PathBuf>) {
        self.state.lock().unwrap().artifacts.rawprogram = paths;
    }

    pub fn set_patches(&self, paths: Vec<PathBuf>) {
        self.state.lock().unwrap().artifacts.patches = paths;
    }

    pub fn set_provision(&self, paths: Vec<PathBuf>) {
        self.state.lock().unwrap().artifacts.provision = paths;
    }

    pub fn set_firmware_root(&self, path: Option<PathBuf>) {
        self.state.lock().unwrap().artifacts.firmware_root = path;
    }

    /// Try to start a run. Returns false (and changes nothing) when a run
    /// is already in flight or the state is not runnable; at most one run
    /// may be in progress at a time.
    ///
    /// On acceptance the engine call is dispatched onto a background
    /// thread; the caller never blocks on it.
    pub fn start(&self) -> bool {
        let args = {
            let mut state = self.state.lock().unwrap();
            if state.status == RunStatus::Running {
                debug!("Start rejected: run already in flight");
                return false;
            }
            if !can_start(&state) {
                debug!(mode = %state.mode, "Start rejected: state not runnable");
                return false;
            }
            state.status = RunStatus::Running;
            state.last_outcome = None;
            marshal(&state, &self.config)
        };

        let progress_state = Arc::clone(&self.state);
        let progress_observer = Arc::clone(&self.observer);
        let registration = self.bridge.register(move |event| {
            progress_state.lock().unwrap().last_progress = event.clone();
            progress_observer.on_event(&SessionEvent::Progress(event));
        });

        info!(mode = %args.mode, artifacts = args.artifacts.len(), "Run accepted");
        self.observer
            .on_event(&SessionEvent::RunStarted { mode: args.mode });

        let engine = Arc::clone(&self.engine);
        let bridge = self.bridge.clone();
        let state = Arc::clone(&self.state);
        let observer = Arc::clone(&self.observer);

        let handle = thread::spawn(move || {
            let outcome = {
                let _access = ScopedAccess::acquire(&args);
                match catch_unwind(AssertUnwindSafe(|| engine.run(&args, &bridge))) {
                    Ok(code) => code,
                    Err(_) => {
                        error!("Engine call faulted");
                        ENGINE_FAULT_OUTCOME
                    }
                }
                // _access drops here, releasing scoped access on success
                // and fault alike.
            };

            // Unregister before returning to Idle so no stale callback can
            // fire into a later run and no progress lands after Idle.
            bridge.unregister(registration);
            {
                let mut s = state.lock().unwrap();
                s.status = RunStatus::Idle;
                s.last_outcome = Some(outcome);
            }
            observer.on_event(&SessionEvent::RunFinished { outcome });
        });

        *self.worker.lock().unwrap() = Some(handle);
        true
    }

    /// Block until the in-flight run (if any) has finished.
    pub fn wait(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::events::SessionEvent;

    fn runnable_download(session: &FlashSession<MockEngine>) {
        session.set_mode(OperationMode::Download);
        session.set_programmer(Some(PathBuf::from("/fw/prog.elf")));
        session.set_rawprogram(vec![
            PathBuf::from("/fw/rawprogram0.xml"),
            PathBuf::from("/fw/rawprogram1.xml"),
        ]);
        session.set_patches(vec![PathBuf::from("/fw/patch0.xml")]);
    }

    struct Recorder {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl SessionObserver for Recorder {
        fn on_event(&self, event: &SessionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_can_start_matrix() {
        let mut state = SessionState::default();
        assert!(!can_start(&state), "empty download state");

        state.mode = OperationMode::Provision;
        assert!(!can_start(&state), "empty provision state");

        state.artifacts.provision = vec![PathBuf::from("/fw/provision.xml")];
        assert!(can_start(&state), "provision manifest suffices");

        state.artifacts.provision.clear();
        state.artifacts.programmer = Some(PathBuf::from("/fw/prog.elf"));
        assert!(can_start(&state), "previously selected programmer suffices");

        state.mode = OperationMode::Download;
        assert!(!can_start(&state), "download needs rawprogram too");
        state.artifacts.rawprogram = vec![PathBuf::from("/fw/rawprogram0.xml")];
        assert!(can_start(&state));
    }

    #[test]
    fn test_marshal_download_concatenates_in_order() {
        let mut state = SessionState::default();
        state.mode = OperationMode::Download;
        state.artifacts.programmer = Some(PathBuf::from("/fw/prog.elf"));
        state.artifacts.rawprogram = vec![
            PathBuf::from("/fw/rawprogram0.xml"),
            PathBuf::from("/fw/rawprogram1.xml"),
        ];
        state.artifacts.patches = vec![PathBuf::from("/fw/patch0.xml")];

        let args = marshal(&state, &SessionConfig::default());
        assert_eq!(
            args.artifacts,
            vec![
                PathBuf::from("/fw/rawprogram0.xml"),
                PathBuf::from("/fw/rawprogram1.xml"),
                PathBuf::from("/fw/patch0.xml"),
            ]
        );
        assert_eq!(args.include_dir, Some(PathBuf::from("/fw")));
        assert_eq!(args.programmer, Some(PathBuf::from("/fw/prog.elf")));
    }

    #[test]
    fn test_marshal_provision_without_manifests() {
        // Runnable via the programmer-reuse rule; the engine receives a
        // zero-length manifest array and no include dir.
        let mut state = SessionState::default();
        state.mode = OperationMode::Provision;
        state.artifacts.programmer = Some(PathBuf::from("/fw/prog.elf"));

        assert!(can_start(&state));
        let args = marshal(&state, &SessionConfig::default());
        assert!(args.artifacts.is_empty());
        assert_eq!(args.include_dir, None);
    }

    #[test]
    fn test_run_to_completion_publishes_outcome_and_progress() {
        let engine = Arc::new(MockEngine::new());
        engine.queue_progress("program", 1, 4);
        engine.queue_progress("program", 4, 4);

        let recorder = Recorder::new();
        let session =
            FlashSession::with_observer(engine, SessionConfig::default(), recorder.clone());
        runnable_download(&session);

        assert!(session.start());
        session.wait();

        let state = session.snapshot();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.last_outcome, Some(0));
        assert_eq!(state.last_progress.completed, 4);
        assert!(!session.bridge.is_registered());

        let events = recorder.events.lock().unwrap();
        assert!(matches!(events.first(), Some(SessionEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::RunFinished { outcome: 0 })
        ));
        let progress_count = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Progress(_)))
            .count();
        assert_eq!(progress_count, 2);
    }

    #[test]
    fn test_single_flight() {
        let engine = Arc::new(MockEngine::new());
        let release = engine.hold_next_run();

        let session = FlashSession::new(engine.clone(), SessionConfig::default());
        runnable_download(&session);

        assert!(session.start());
        // Second start while the first is outstanding: no-op.
        assert!(!session.start());
        assert!(!session.can_start());

        release.send(()).unwrap();
        session.wait();

        assert_eq!(engine.runs().len(), 1, "exactly one engine invocation");
        assert!(session.can_start());
    }

    #[test]
    fn test_start_rejected_when_not_runnable() {
        let engine = Arc::new(MockEngine::new());
        let session = FlashSession::new(engine.clone(), SessionConfig::default());

        assert!(!session.start());
        session.wait();
        assert!(engine.runs().is_empty());
        assert_eq!(session.snapshot().status, RunStatus::Idle);
    }

    #[test]
    fn test_engine_fault_still_finalizes() {
        let engine = Arc::new(MockEngine::new());
        engine.set_panic_on_run(true);

        let session = FlashSession::new(engine, SessionConfig::default());
        runnable_download(&session);

        assert!(session.start());
        session.wait();

        let state = session.snapshot();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.last_outcome, Some(ENGINE_FAULT_OUTCOME));
        assert!(!session.bridge.is_registered());
        assert!(session.can_start(), "a faulted run must return to Idle");
    }

    #[test]
    fn test_late_callback_after_run_is_dropped() {
        let engine = Arc::new(MockEngine::new());
        engine.queue_progress("program", 2, 2);

        let session = FlashSession::new(engine, SessionConfig::default());
        runnable_download(&session);
        assert!(session.start());
        session.wait();

        let before = session.snapshot().last_progress.clone();
        // Simulate the engine firing its callback after unregistration.
        session.bridge.emit(ProgressEvent {
            task: "stale".into(),
            completed: 9,
            total: 9,
        });
        assert_eq!(session.snapshot().last_progress, before);
    }

    #[test]
    fn test_non_zero_outcome_is_reported_not_fatal() {
        let engine = Arc::new(MockEngine::new());
        engine.set_outcome(3);

        let session = FlashSession::new(engine, SessionConfig::default());
        runnable_download(&session);
        assert!(session.start());
        session.wait();

        let state = session.snapshot();
        assert_eq!(state.last_outcome, Some(3));
        assert_eq!(state.status, RunStatus::Idle);
    }

    #[test]
    fn test_provision_with_programmer_only_reaches_engine() {
        let engine = Arc::new(MockEngine::new());
        let session = FlashSession::new(engine.clone(), SessionConfig::default());
        session.set_mode(OperationMode::Provision);
        session.set_programmer(Some(PathBuf::from("/fw/prog.elf")));

        assert!(session.start());
        session.wait();

        let runs = engine.runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].artifacts.is_empty());
        assert_eq!(runs[0].include_dir, None);
        assert_eq!(runs[0].programmer, Some(PathBuf::from("/fw/prog.elf")));
    }

    #[test]
    fn test_serial_filter_from_selected_device() {
        let engine = Arc::new(MockEngine::new());
        let session = FlashSession::new(engine.clone(), SessionConfig::default());
        runnable_download(&session);

        let devices = crate::device::enumerate(session.engine(), 16).unwrap();
        session.select_device(devices.into_iter().next());

        assert!(session.start());
        session.wait();
        assert_eq!(engine.runs()[0].serial.as_deref(), Some("MOCK0001"));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");

        let config = SessionConfig {
            firmware_root: Some(PathBuf::from("/fw")),
            mode: OperationMode::Provision,
            storage: StorageKind::Emmc,
            lenient_resolution: true,
            verbose: true,
        };
        config.save_to_file(&path).unwrap();

        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.firmware_root, config.firmware_root);
        assert_eq!(loaded.mode, config.mode);
        assert_eq!(loaded.storage, config.storage);
        assert!(loaded.lenient_resolution);
        assert!(loaded.verbose);
    }
}
