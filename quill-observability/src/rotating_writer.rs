//! Time-bucketed rotating file sink.
//!
//! The path template (e.g. `./log/access_log.%Y%m%d%H%M`) is rendered for the
//! start of the current time bucket. Every write checks the bucket, rotates
//! if the wall clock has crossed into a new one, and appends the buffer, all
//! under one mutex, so concurrent writers can neither interleave partial
//! records nor race each other through a rotation.
//!
//! After each rotation a background thread prunes bucket files older than
//! the retention window (see [`crate::retention`]).

use chrono::{DateTime, Local, TimeZone};
use quill_core::config::SinkConfig;
use quill_core::error::QuillError;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::retention;

/// Destination for encoded records. One call carries one complete record.
pub trait LogSink: Send + Sync {
    fn write_record(&self, buf: &[u8]) -> Result<(), QuillError>;

    fn flush(&self) -> Result<(), QuillError> {
        Ok(())
    }
}

pub struct RotatingFileWriter {
    config: SinkConfig,
    rotation_secs: i64,
    inner: Mutex<WriterState>,
}

struct WriterState {
    /// `None` after a failed open or write; the next write reopens.
    writer: Option<BufWriter<File>>,
    bucket: i64,
    path: PathBuf,
}

impl RotatingFileWriter {
    /// Open the sink for the current bucket. Failure here means the process
    /// has no writable log destination.
    pub fn new(config: SinkConfig) -> Result<Self, QuillError> {
        Self::open_at(config, Local::now())
    }

    /// Open the sink for the bucket containing `now`.
    pub fn open_at(config: SinkConfig, now: DateTime<Local>) -> Result<Self, QuillError> {
        if config.rotation_secs == 0 {
            return Err(QuillError::Config("sink.rotation_secs must be > 0".into()));
        }
        let rotation_secs = i64::try_from(config.rotation_secs)
            .map_err(|_| QuillError::Config("sink.rotation_secs is too large".into()))?;

        let bucket = bucket_start(now.timestamp(), rotation_secs);
        let path = render_path(&config.path_template, bucket)?;
        let file = open_append(&path)?;

        info!(path = %path.display(), "Access log sink opened");
        if let Some(link) = &config.link_name {
            update_link(link, &path);
        }

        Ok(Self {
            config,
            rotation_secs,
            inner: Mutex::new(WriterState {
                writer: Some(BufWriter::new(file)),
                bucket,
                path,
            }),
        })
    }

    /// Write one record, stamped with the current wall-clock time.
    pub fn write(&self, buf: &[u8]) -> Result<(), QuillError> {
        self.write_at(buf, Local::now())
    }

    /// Write one record as if the wall clock read `now`.
    pub fn write_at(&self, buf: &[u8], now: DateTime<Local>) -> Result<(), QuillError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| QuillError::Internal("sink lock poisoned".into()))?;

        let bucket = bucket_start(now.timestamp(), self.rotation_secs);
        if bucket != state.bucket || state.writer.is_none() {
            self.rotate(&mut state, bucket)?;
        }

        let result = match state.writer.as_mut() {
            Some(w) => w.write_all(buf).and_then(|()| w.flush()),
            None => return Err(QuillError::SinkClosed),
        };
        if let Err(e) = result {
            error!(error = %e, path = %state.path.display(), "Access log write failed");
            state.writer = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Path of the currently open bucket file.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().map(|s| s.path.clone())
    }

    fn rotate(&self, state: &mut WriterState, bucket: i64) -> Result<(), QuillError> {
        if let Some(mut old) = state.writer.take() {
            if let Err(e) = old.flush() {
                warn!(error = %e, path = %state.path.display(), "Flush before rotation failed");
            }
        }

        let path = render_path(&self.config.path_template, bucket)?;
        let file = open_append(&path).inspect_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to open access log bucket");
        })?;

        let rotated = bucket != state.bucket;
        state.writer = Some(BufWriter::new(file));
        state.bucket = bucket;
        state.path = path;

        if rotated {
            info!(path = %state.path.display(), "Rotated access log");
            if let Some(link) = &self.config.link_name {
                update_link(link, &state.path);
            }
            if self.config.max_age_secs > 0 {
                retention::spawn_prune(
                    &self.config.path_template,
                    self.config.max_age(),
                    state.path.clone(),
                );
            }
        } else {
            debug!(path = %state.path.display(), "Reopened access log after failure");
        }
        Ok(())
    }
}

impl LogSink for RotatingFileWriter {
    fn write_record(&self, buf: &[u8]) -> Result<(), QuillError> {
        self.write(buf)
    }

    fn flush(&self) -> Result<(), QuillError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| QuillError::Internal("sink lock poisoned".into()))?;
        if let Some(w) = state.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Start of the bucket containing `ts` (Unix seconds).
pub fn bucket_start(ts: i64, rotation_secs: i64) -> i64 {
    ts - ts.rem_euclid(rotation_secs)
}

/// Render `template` for the bucket starting at `bucket` (Unix seconds), in local time.
pub fn render_path(template: &str, bucket: i64) -> Result<PathBuf, QuillError> {
    let at = Local
        .timestamp_opt(bucket, 0)
        .single()
        .ok_or_else(|| QuillError::Internal(format!("bucket {bucket} out of range")))?;
    let mut rendered = String::with_capacity(template.len() + 16);
    write!(rendered, "{}", at.format(template))
        .map_err(|_| QuillError::Config(format!("invalid path template {template:?}")))?;
    Ok(PathBuf::from(rendered))
}

fn open_append(path: &Path) -> Result<File, QuillError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Point `link` at `target`, replacing any previous link atomically.
#[cfg(unix)]
fn update_link(link: &Path, target: &Path) {
    let mut tmp = link.as_os_str().to_owned();
    tmp.push("_symlink");
    let tmp = PathBuf::from(tmp);
    let _ = fs::remove_file(&tmp);

    let result = std::os::unix::fs::symlink(target, &tmp).and_then(|()| fs::rename(&tmp, link));
    if let Err(e) = result {
        warn!(error = %e, link = %link.display(), "Failed to update access log link");
    }
}

#[cfg(not(unix))]
fn update_link(link: &Path, _target: &Path) {
    debug!(link = %link.display(), "Access log links are only supported on unix");
}

// ── Tests ────────────────────────────────────────────────────────────────────
