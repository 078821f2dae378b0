//! Progress bridge between the engine's execution context and the session.
//!
//! The engine invokes its progress callback from its own thread, zero or
//! more times per run. The bridge is a single-slot registration that
//! forwards each invocation to the currently registered sink, or drops it
//! silently when nothing (or something stale) is registered.
//!
//! Registration is handle-based: `register` returns a [`Registration`]
//! that `unregister` requires, so a stale handle cannot clear a newer
//! registration. Two independent sessions each own their own bridge and
//! cannot clobber each other; single-flight is the orchestrator's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::ProgressEvent;

type Sink = Box<dyn Fn(ProgressEvent) + Send + 'static>;

struct Slot {
    id: u64,
    sink: Sink,
}

/// Cheaply-cloneable handle to a single progress registration slot.
#[derive(Clone)]
pub struct ProgressBridge {
    slot: Arc<Mutex<Option<Slot>>>,
    next_id: Arc<AtomicU64>,
}

/// Proof of a live registration; required to unregister it.
#[derive(Debug)]
pub struct Registration {
    id: u64,
}

impl ProgressBridge {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Install `sink` as the current target, replacing any previous one.
    pub fn register<F>(&self, sink: F) -> Registration
    where
        F: Fn(ProgressEvent) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.slot.lock().unwrap();
        if let Some(old) = slot.replace(Slot {
            id,
            sink: Box::new(sink),
        }) {
            tracing::warn!(old_id = old.id, new_id = id, "Replacing live progress registration");
        }
        Registration { id }
    }

    /// Clear the slot, but only if `reg` still owns it.
    pub fn unregister(&self, reg: Registration) {
        let mut slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            Some(s) if s.id == reg.id => {
                *slot = None;
            }
            _ => {
                tracing::debug!(id = reg.id, "Stale unregister ignored");
            }
        }
    }

    /// Deliver one event to the registered sink, if any.
    ///
    /// Called from the engine's execution context. A callback arriving
    /// after `unregister` finds the slot empty and is dropped silently.
    pub fn emit(&self, event: ProgressEvent) {
        let slot = self.slot.lock().unwrap();
        if let Some(s) = slot.as_ref() {
            (s.sink)(event);
        }
    }

    /// Whether a sink is currently registered.
    pub fn is_registered(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl Default for ProgressBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event() -> ProgressEvent {
        ProgressEvent {
            task: "program".into(),
            completed: 1,
            total: 2,
        }
    }

    #[test]
    fn test_emit_reaches_registered_sink() {
        let bridge = ProgressBridge::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let reg = bridge.register(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bridge.emit(event());
        bridge.emit(event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        bridge.unregister(reg);
        bridge.emit(event());
        assert_eq!(hits.load(Ordering::SeqCst), 2, "late emit must be dropped");
        assert!(!bridge.is_registered());
    }

    #[test]
    fn test_stale_handle_cannot_clear_newer_registration() {
        let bridge = ProgressBridge::new();
        let old = bridge.register(|_| {});
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let new = bridge.register(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        // Old registration was already replaced; its handle must be inert.
        bridge.unregister(old);
        assert!(bridge.is_registered());
        bridge.emit(event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bridge.unregister(new);
        assert!(!bridge.is_registered());
    }

    #[test]
    fn test_emit_with_empty_slot_is_silent() {
        let bridge = ProgressBridge::new();
        bridge.emit(event());
    }
}
