use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("export error: {0}")]
    Export(String),

    #[error("collector returned non-retryable status {status}")]
    NonRetryable { status: u16 },

    #[error("export failed after {attempts} attempts: {source}")]
    ExportFailed {
        attempts: u32,
        #[source]
        source: Box<TraceError>,
    },

    #[error("buffer full")]
    BufferFull,

    #[error("exporter is stopped")]
    Stopped,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TraceError {
    /// Whether a delivery attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Export(_))
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
