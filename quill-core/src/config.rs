use crate::error::QuillError;
use chrono::format::{Item, StrftimeItems};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, constructed once at startup and passed by
/// reference into the pipeline and sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Service identity attached to every record. Read-only after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub instance_key: String,
}

/// What goes into each access record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    /// Emit `timestamp` as formatted local time instead of epoch millis.
    #[serde(default = "default_true")]
    pub human_time: bool,
    /// chrono `strftime` format used when `human_time` is on.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Capture the client IP.
    #[serde(default)]
    pub ip: bool,
    #[serde(default = "default_true")]
    pub request_body: bool,
    #[serde(default = "default_true")]
    pub response_body: bool,
    #[serde(default = "default_true")]
    pub body_minify: bool,
    #[serde(default)]
    pub bytes_received: bool,
    #[serde(default)]
    pub bytes_sent: bool,
    /// Request header carrying the caller identity.
    #[serde(default = "default_caller_header")]
    pub caller_header: String,
    /// Field extractors to run, in order.
    #[serde(default = "default_extractors")]
    pub extractors: Vec<String>,
}

/// Rotating file sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// File path with chrono `strftime` specifiers, rendered per time bucket.
    #[serde(default = "default_path_template")]
    pub path_template: String,
    #[serde(default = "default_rotation_secs")]
    pub rotation_secs: u64,
    /// Bucket files older than this are pruned after a rotation.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Symlink kept pointing at the current bucket file.
    #[serde(default)]
    pub link_name: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_mode")]
    pub mode: DispatchMode,
    /// Bounded queue capacity in async mode.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Sync,
    Async,
}

/// Host service settings (binary only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_server_name() -> String { "quill".into() }
fn default_environment() -> String { "dev".into() }
fn default_true() -> bool { true }
fn default_time_format() -> String { "%Y-%m-%d %H:%M:%S".into() }
fn default_caller_header() -> String { "X-User-Name".into() }
fn default_extractors() -> Vec<String> {
    vec!["req_id".into(), "user".into(), "url_params".into()]
}
fn default_path_template() -> String { "./log/access_log.%Y%m%d%H%M".into() }
fn default_rotation_secs() -> u64 { 3600 }
fn default_max_age_secs() -> u64 { 24 * 3600 }
fn default_dispatch_mode() -> DispatchMode { DispatchMode::Async }
fn default_buffer_size() -> usize { 4096 }
fn default_addr() -> String { "0.0.0.0:8080".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            environment: default_environment(),
            instance_key: String::new(),
        }
    }
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            human_time: true,
            time_format: default_time_format(),
            ip: false,
            request_body: true,
            response_body: true,
            body_minify: true,
            bytes_received: false,
            bytes_sent: false,
            caller_header: default_caller_header(),
            extractors: default_extractors(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path_template: default_path_template(),
            rotation_secs: default_rotation_secs(),
            max_age_secs: default_max_age_secs(),
            link_name: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

impl AccessLogConfig {
    /// Reject `time_format` strings chrono cannot render.
    pub fn check_time_format(&self) -> Result<(), QuillError> {
        if StrftimeItems::new(&self.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(QuillError::Config(format!(
                "access_log.time_format {:?} is not a valid strftime format",
                self.time_format
            )));
        }
        Ok(())
    }
}

impl SinkConfig {
    pub fn rotation(&self) -> Duration {
        Duration::from_secs(self.rotation_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl QuillConfig {
    /// Load configuration from YAML file + env overrides (`QUILL_SINK__ROTATION_SECS=60`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: QuillConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("QUILL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QuillError> {
        if self.sink.path_template.trim().is_empty() {
            return Err(QuillError::Config("sink.path_template must not be empty".into()));
        }
        if self.sink.rotation_secs == 0 {
            return Err(QuillError::Config("sink.rotation_secs must be > 0".into()));
        }
        if self.dispatch.mode == DispatchMode::Async && self.dispatch.buffer_size == 0 {
            return Err(QuillError::Config(
                "dispatch.buffer_size must be > 0 in async mode".into(),
            ));
        }
        self.access_log.check_time_format()?;
        if self.access_log.caller_header.trim().is_empty() {
            return Err(QuillError::Config("access_log.caller_header must not be empty".into()));
        }
        Ok(())
    }
}
