//! Artifact matcher - filtered recursive directory scan.
//!
//! Pure function over the filesystem: given a root directory, an extension
//! allow-list, and a glob-style name pattern, produce the matching file
//! paths. Read errors are logged and swallowed; an empty result is always
//! a valid, actionable outcome for the caller.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::warn;

/// Opaque bundle-like directories are skipped wholesale; nothing inside
/// a package is a standalone artifact.
const BUNDLE_EXTENSIONS: &[&str] = &["app", "bundle", "framework", "kext", "xcodeproj"];

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_bundle_dir(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| BUNDLE_EXTENSIONS.iter().any(|b| e.eq_ignore_ascii_case(b)))
}

fn extension_allowed(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

/// Find all files under `root` whose extension is in `allowed_exts`
/// (case-insensitive) and whose base name matches `pattern`.
///
/// `pattern` uses `*` (any run of characters) and `?` (single character)
/// semantics, anchored to the full base name; the literal pattern `*`
/// matches unconditionally without pattern evaluation. Results are sorted
/// by file name so downstream "first path" derivations are deterministic.
pub fn match_artifacts(root: &Path, allowed_exts: &[String], pattern: &str) -> Vec<PathBuf> {
    let compiled = if pattern == "*" {
        None
    } else {
        match Pattern::new(pattern) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid name pattern, no matches");
                return Vec::new();
            }
        }
    };

    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut matches = Vec::new();
    walk(root, allowed_exts, compiled.as_ref(), &options, &mut matches);
    matches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    matches
}

fn walk(
    dir: &Path,
    allowed_exts: &[String],
    pattern: Option<&Pattern>,
    options: &MatchOptions,
    out: &mut Vec<PathBuf>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_hidden(name) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping entry without file type");
                continue;
            }
        };

        if file_type.is_dir() {
            if !is_bundle_dir(&path) {
                walk(&path, allowed_exts, pattern, options, out);
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        if !extension_allowed(&path, allowed_exts) {
            continue;
        }
        let matched = match pattern {
            None => true,
            Some(p) => p.matches_with(name, *options),
        };
        if matched {
            out.push(path);
        }
    }
}
