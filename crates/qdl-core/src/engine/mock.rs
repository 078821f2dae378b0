//! Mock flashing engine for testing.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use super::traits::{EngineError, FlashEngine, RawDevice, RunArgs};
use crate::bridge::ProgressBridge;
use crate::events::ProgressEvent;

/// Scriptable engine for unit testing the orchestrator.
///
/// Plays the role the mock transport plays for a real protocol stack:
/// captures every `run` invocation, emits queued progress events through
/// the bridge, and returns a settable outcome code. Can optionally block
/// until released (single-flight tests) or panic mid-run (fault-path
/// tests).
pub struct MockEngine {
    devices: Mutex<Vec<RawDevice>>,
    /// Progress events emitted during each run, in order.
    progress_script: Mutex<Vec<ProgressEvent>>,
    outcome: Mutex<i32>,
    run_log: Arc<Mutex<Vec<RunArgs>>>,
    /// When set, `run` blocks until the sender side releases it.
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    panic_on_run: Mutex<bool>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(vec![RawDevice {
                serial: "MOCK0001".into(),
                product: "mock-edl".into(),
            }]),
            progress_script: Mutex::new(Vec::new()),
            outcome: Mutex::new(0),
            run_log: Arc::new(Mutex::new(Vec::new())),
            gate: Mutex::new(None),
            panic_on_run: Mutex::new(false),
        }
    }

    pub fn set_devices(&self, devices: Vec<RawDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Queue a progress event to be emitted on the next run.
    pub fn queue_progress(&self, task: &str, completed: u32, total: u32) {
        self.progress_script.lock().unwrap().push(ProgressEvent {
            task: task.into(),
            completed,
            total,
        });
    }

    pub fn set_outcome(&self, code: i32) {
        *self.outcome.lock().unwrap() = code;
    }

    pub fn set_panic_on_run(&self, panic: bool) {
        *self.panic_on_run.lock().unwrap() = panic;
    }

    /// Make the next run block until the returned sender is dropped or
    /// sent to.
    pub fn hold_next_run(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    /// All captured run invocations.
    pub fn runs(&self) -> Vec<RunArgs> {
        self.run_log.lock().unwrap().clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashEngine for MockEngine {
    fn enumerate(&self, max: usize) -> Result<Vec<RawDevice>, EngineError> {
        let devices = self.devices.lock().unwrap();
        Ok(devices.iter().take(max).cloned().collect())
    }

    fn run(&self, args: &RunArgs, progress: &ProgressBridge) -> i32 {
        self.run_log.lock().unwrap().push(args.clone());

        if let Some(rx) = self.gate.lock().unwrap().take() {
            // Block until the test releases us; a dropped sender also
            // releases (recv error).
            let _ = rx.recv();
        }

        if *self.panic_on_run.lock().unwrap() {
            panic!("simulated engine fault");
        }

        for event in self.progress_script.lock().unwrap().iter() {
            progress.emit(event.clone());
        }

        *self.outcome.lock().unwrap()
    }

    fn version(&self) -> String {
        "mock-1.0".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OperationMode;

    fn args() -> RunArgs {
        RunArgs {
            mode: OperationMode::Download,
            serial: None,
            storage: Default::default(),
            programmer: None,
            artifacts: vec![],
            verbose: false,
            include_dir: None,
        }
    }

    #[test]
    fn test_mock_captures_runs_and_outcome() {
        let engine = MockEngine::new();
        engine.set_outcome(-3);
        let bridge = ProgressBridge::new();

        assert_eq!(engine.run(&args(), &bridge), -3);
        assert_eq!(engine.runs().len(), 1);
    }

    #[test]
    fn test_mock_emits_queued_progress() {
        let engine = MockEngine::new();
        engine.queue_progress("program", 1, 4);
        engine.queue_progress("program", 4, 4);

        let bridge = ProgressBridge::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let reg = bridge.register(move |e| s.lock().unwrap().push(e));

        engine.run(&args(), &bridge);
        bridge.unregister(reg);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].completed, 1);
        assert_eq!(seen[1].completed, 4);
    }

    #[test]
    fn test_mock_enumerate_bounded() {
        let engine = MockEngine::new();
        engine.set_devices(vec![
            RawDevice {
                serial: "A".into(),
                product: "p".into(),
            },
            RawDevice {
                serial: "B".into(),
                product: "p".into(),
            },
        ]);
        assert_eq!(engine.enumerate(1).unwrap().len(), 1);
        assert_eq!(engine.enumerate(16).unwrap().len(), 2);
    }
}
