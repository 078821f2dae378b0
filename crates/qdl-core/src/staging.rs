//! Picker staging adapter.
//!
//! Restricts a generic file-choosing UI to a pre-filtered candidate set:
//! matched files are mirrored into a throwaway temporary directory as
//! indirection entries, the picker is pointed at that directory, and the
//! user's picks are resolved back to canonical real paths. The temporary
//! directory lives strictly for one call and is removed on every exit
//! path, including panic and cancellation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::matcher::match_artifacts;
use crate::picker::{FilePicker, PickRequest};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to create staging directory: {0}")]
    StagingDir(#[source] std::io::Error),

    #[error("Could not resolve picked path back to a real file: {}", .0.display())]
    Unresolvable(PathBuf),
}

/// What to do when every resolution layer fails for a picked path.
///
/// `Strict` treats exhaustion as a hard error for that entry; `Lenient`
/// falls through to the picked path itself, which may point into the
/// staging directory and stop existing after cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionMode {
    #[default]
    Strict,
    Lenient,
}

/// Stages matched artifacts behind a presentation-neutral selection step.
pub struct Stager<P: FilePicker> {
    picker: P,
    resolution: ResolutionMode,
}

impl<P: FilePicker> Stager<P> {
    pub fn new(picker: P) -> Self {
        Self {
            picker,
            resolution: ResolutionMode::default(),
        }
    }

    pub fn with_resolution(mut self, resolution: ResolutionMode) -> Self {
        self.resolution = resolution;
        self
    }

    /// Match, stage, present, resolve. Returns canonical paths for the
    /// user's picks; empty on no-match or cancellation, never an error for
    /// either.
    pub fn stage(
        &self,
        root: &Path,
        allowed_exts: &[String],
        pattern: &str,
    ) -> Result<Vec<PathBuf>, StagingError> {
        self.stage_inner(root, allowed_exts, pattern, true)
    }

    /// Single-selection variant; first pick wins.
    pub fn stage_single(
        &self,
        root: &Path,
        allowed_exts: &[String],
        pattern: &str,
    ) -> Result<Option<PathBuf>, StagingError> {
        Ok(self
            .stage_inner(root, allowed_exts, pattern, false)?
            .into_iter()
            .next())
    }

    fn stage_inner(
        &self,
        root: &Path,
        allowed_exts: &[String],
        pattern: &str,
        multiple: bool,
    ) -> Result<Vec<PathBuf>, StagingError> {
        let matches = match_artifacts(root, allowed_exts, pattern);
        if matches.is_empty() {
            // Deliberate UX short-circuit: never show an empty picker, and
            // never create temporary resources for one.
            debug!(root = %root.display(), pattern = %pattern, "No matches, skipping picker");
            return Ok(Vec::new());
        }

        // Dropped on every exit path below, removing the directory and
        // its contents.
        let staged = StagedView::build(&matches)?;

        let picked = self.picker.pick(&PickRequest {
            dir: staged.dir().to_path_buf(),
            allowed_exts: allowed_exts.to_vec(),
            multiple,
        });
        if picked.is_empty() {
            debug!("Selection cancelled");
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(picked.len());
        for path in picked {
            match staged.resolve(&path) {
                Some(real) => resolved.push(real),
                None => match self.resolution {
                    ResolutionMode::Strict => return Err(StagingError::Unresolvable(path)),
                    ResolutionMode::Lenient => {
                        warn!(path = %path.display(), "Resolution exhausted, using picked path as-is");
                        resolved.push(path);
                    }
                },
            }
        }
        Ok(resolved)
    }
}

/// Temporary, isolated view of matched files.
///
/// Each entry keeps the match's original base name (later same-named
/// matches overwrite earlier ones) and points back at the real file,
/// preferring a symlink and falling back to a byte copy. The manifest maps
/// entry names to canonical sources and doubles as the first resolution
/// layer, which is what keeps copied entries resolvable at all.
struct StagedView {
    dir: TempDir,
    manifest: HashMap<OsString, PathBuf>,
}

impl StagedView {
    fn build(matches: &[PathBuf]) -> Result<Self, StagingError> {
        let dir = tempfile::Builder::new()
            .prefix("qdl-stage-")
            .tempdir()
            .map_err(StagingError::StagingDir)?;

        let mut manifest = HashMap::new();
        for source in matches {
            let Some(name) = source.file_name() else {
                continue;
            };
            let canonical = match std::fs::canonicalize(source) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %source.display(), error = %e, "Skipping vanished match");
                    continue;
                }
            };
            let dest = dir.path().join(name);
            // Name collision: the later entry wins.
            if dest.exists() {
                let _ = std::fs::remove_file(&dest);
            }
            if let Err(e) = make_link(&canonical, &dest) {
                debug!(path = %canonical.display(), error = %e, "Symlink failed, copying instead");
                if let Err(e) = std::fs::copy(&canonical, &dest) {
                    warn!(path = %canonical.display(), error = %e, "Could not stage entry");
                    continue;
                }
            }
            manifest.insert(name.to_os_string(), canonical);
        }

        Ok(Self { dir, manifest })
    }

    fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Layered resolution of a picked path: manifest lookup, then symlink
    /// target, then full canonicalization. `None` when all layers fail.
    fn resolve(&self, picked: &Path) -> Option<PathBuf> {
        if let Some(real) = picked
            .file_name()
            .and_then(|name| self.manifest.get(name))
        {
            return Some(real.clone());
        }
        if let Ok(target) = std::fs::read_link(picked) {
            if let Ok(real) = std::fs::canonicalize(&target) {
                return Some(real);
            }
        }
        std::fs::canonicalize(picked).ok()
    }
}

#[cfg(unix)]
fn make_link(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn make_link(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, dest)
}

#[cfg(not(any(unix, windows)))]
fn make_link(_source: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks unsupported on this platform"))
}
