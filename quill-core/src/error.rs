use thiserror::Error;

/// Unified error type for Quill.
#[derive(Error, Debug)]
pub enum QuillError {
    #[error("URL decode failed for {key}: {reason}")]
    UrlDecode { key: String, reason: String },

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Sink closed")]
    SinkClosed,

    #[error("Internal: {0}")]
    Internal(String),
}

impl QuillError {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            QuillError::UrlDecode { .. } => "decode",
            QuillError::Encode(_) => "encode",
            QuillError::Io(_) | QuillError::SinkClosed => "sink",
            QuillError::Config(_) => "config",
            QuillError::Internal(_) => "internal",
        }
    }

    /// Whether the error came out of record encoding (the record is dropped).
    pub fn is_encode(&self) -> bool {
        matches!(self, QuillError::UrlDecode { .. } | QuillError::Encode(_))
    }
}
