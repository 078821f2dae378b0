//! Event system for UI decoupling.
//!
//! Allows CLI/TUI/GUI front ends to observe a flashing session without
//! tight coupling to the orchestrator. Observer delivery is the publish
//! mechanism for run status and progress: the UI owns an observer that
//! forwards events onto its own thread.

use std::fmt;

use crate::session::OperationMode;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A single progress notification from the flashing engine.
///
/// `total == 0` is a defined sentinel meaning "indeterminate"; consumers
/// must not divide by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Human-readable task name ("program", "patch", ...).
    pub task: String,
    /// Units completed so far.
    pub completed: u32,
    /// Total units, or 0 when unknown.
    pub total: u32,
}

impl ProgressEvent {
    /// Fraction in 0.0..=1.0, or `None` while indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(f64::from(self.completed) / f64::from(self.total))
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fraction() {
            Some(p) => write!(f, "{}: {:.0}%", self.task, p * 100.0),
            None => write!(f, "{}: {}/?", self.task, self.completed),
        }
    }
}

/// Events emitted by a flashing session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A run was accepted and is now in flight.
    RunStarted { mode: OperationMode },
    /// Progress update bridged from the engine.
    Progress(ProgressEvent),
    /// The run finished; zero outcome conventionally denotes success.
    RunFinished { outcome: i32 },
    /// Log message for UI surfaces.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving session events.
///
/// Implement this in the UI layer. `on_event` may be called from the
/// session's background worker; implementations forward to their own
/// thread as needed.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::RunStarted { mode } => {
                tracing::info!(mode = %mode, "Run started");
            }
            SessionEvent::Progress(p) => {
                tracing::debug!(task = %p.task, completed = p.completed, total = p.total, "Progress");
            }
            SessionEvent::RunFinished { outcome } => {
                if *outcome == 0 {
                    tracing::info!("Run finished successfully");
                } else {
                    tracing::error!(outcome = outcome, "Run failed");
                }
            }
            SessionEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
