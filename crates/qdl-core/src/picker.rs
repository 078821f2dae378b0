//! File-choosing collaborator boundary.
//!
//! The actual picker is a modal, platform-native surface owned by the
//! presentation layer; the core consumes it through the [`FilePicker`]
//! trait. Staging only ever points a picker at its pre-filtered temporary
//! directory, so implementations need no filtering logic of their own.
//!
//! Modal pickers must run on the presentation thread even when staging is
//! executing elsewhere. [`channel`] provides the handoff: the background
//! side posts a request and blocks on the reply while the presentation
//! thread services it.

use std::path::PathBuf;
use std::sync::mpsc;

/// One modal selection request.
#[derive(Debug, Clone)]
pub struct PickRequest {
    /// Directory the picker is constrained to.
    pub dir: PathBuf,
    /// Extension allow-list (no leading dot).
    pub allowed_exts: Vec<String>,
    /// Whether multi-selection is allowed.
    pub multiple: bool,
}

/// Modal file-choosing collaborator.
///
/// Cancellation is an empty result, not an error.
pub trait FilePicker: Send + Sync {
    fn pick(&self, request: &PickRequest) -> Vec<PathBuf>;
}

impl<F> FilePicker for F
where
    F: Fn(&PickRequest) -> Vec<PathBuf> + Send + Sync,
{
    fn pick(&self, request: &PickRequest) -> Vec<PathBuf> {
        self(request)
    }
}

/// Create a connected picker pair for cross-thread modal handoff.
///
/// `RemotePicker` lives with the background logic; `PickerHost` lives on
/// the presentation thread and services requests against a real picker.
pub fn channel() -> (RemotePicker, PickerHost) {
    let (req_tx, req_rx) = mpsc::channel();
    (
        RemotePicker { requests: req_tx },
        PickerHost { requests: req_rx },
    )
}

struct Envelope {
    request: PickRequest,
    reply: mpsc::Sender<Vec<PathBuf>>,
}

/// Picker half that posts requests and blocks until they are serviced.
pub struct RemotePicker {
    requests: mpsc::Sender<Envelope>,
}

impl FilePicker for RemotePicker {
    fn pick(&self, request: &PickRequest) -> Vec<PathBuf> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let envelope = Envelope {
            request: request.clone(),
            reply: reply_tx,
        };
        if self.requests.send(envelope).is_err() {
            // Host is gone; treat as cancellation.
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }
}

/// Presentation-thread half that services posted requests.
pub struct PickerHost {
    requests: mpsc::Receiver<Envelope>,
}

impl PickerHost {
    /// Service one pending request against `picker`, blocking until a
    /// request arrives. Returns false once all remote handles are gone.
    pub fn serve_one<P: FilePicker>(&self, picker: &P) -> bool {
        match self.requests.recv() {
            Ok(env) => {
                let picked = picker.pick(&env.request);
                // Remote may have given up; nothing to do then.
                let _ = env.reply.send(picked);
                true
            }
            Err(_) => false,
        }
    }

    /// Service requests until every remote handle is dropped.
    pub fn serve<P: FilePicker>(&self, picker: &P) {
        while self.serve_one(picker) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_remote_pick_round_trip() {
        let (remote, host) = channel();

        let worker = thread::spawn(move || {
            remote.pick(&PickRequest {
                dir: PathBuf::from("/tmp/staged"),
                allowed_exts: vec!["xml".into()],
                multiple: true,
            })
        });

        // "Presentation thread": answer with a fixed selection.
        let served = host.serve_one(&|req: &PickRequest| {
            assert_eq!(req.dir, PathBuf::from("/tmp/staged"));
            vec![req.dir.join("rawprogram0.xml")]
        });
        assert!(served);

        let picked = worker.join().unwrap();
        assert_eq!(picked, vec![PathBuf::from("/tmp/staged/rawprogram0.xml")]);
    }

    #[test]
    fn test_dropped_host_is_cancellation() {
        let (remote, host) = channel();
        drop(host);
        let picked = remote.pick(&PickRequest {
            dir: PathBuf::from("/tmp"),
            allowed_exts: vec![],
            multiple: false,
        });
        assert!(picked.is_empty());
    }
}
