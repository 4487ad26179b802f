//! Retention pruning for rotated bucket files.
//!
//! Candidates are the files in the template's directory whose names start
//! with the literal part of the template's file name (everything before the
//! first `%`). Time specifiers are expected in the file name only.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Directory and file-name prefix shared by every bucket of `template`.
pub fn template_parts(template: &str) -> (PathBuf, String) {
    let path = Path::new(template);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = match name.find('%') {
        Some(idx) => name[..idx].to_string(),
        None => name,
    };
    (dir, prefix)
}

/// Remove bucket files last modified before `now - max_age`, never touching
/// `keep`. Returns the number of files removed.
pub fn prune_expired(
    template: &str,
    max_age: Duration,
    keep: &Path,
    now: SystemTime,
) -> io::Result<usize> {
    let (dir, prefix) = template_parts(template);
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Ok(0);
    };

    // `read_dir(".")` yields `./name` while a template without a directory
    // renders `name`, so match on the file name alone.
    let keep_name = keep.file_name();
    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) || keep_name == Some(name.as_os_str()) {
            continue;
        }
        // Links are never pruned, only the files they point at.
        let meta = fs::symlink_metadata(&path)?;
        if !meta.is_file() {
            continue;
        }
        if meta.modified()? < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Pruned expired access log");
                    removed += 1;
                }
                Err(e) => warn!(error = %e, path = %path.display(), "Failed to prune access log"),
            }
        }
    }
    Ok(removed)
}

/// Prune on a named background thread.
pub fn spawn_prune(template: &str, max_age: Duration, keep: PathBuf) {
    let template = template.to_string();
    let spawned = std::thread::Builder::new()
        .name("quill-retention".to_string())
        .spawn(move || match prune_expired(&template, max_age, &keep, SystemTime::now()) {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Pruned expired access logs"),
            Err(e) => warn!(error = %e, template = %template, "Access log pruning failed"),
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn access log pruning thread");
    }
}
