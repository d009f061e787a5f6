use thiserror::Error;

/// Error taxonomy for the daemon. Every component boundary collapses its
/// failures into one of these variants (or a bool/Option, where that is
/// the established contract) rather than letting panics or ad-hoc strings
/// cross.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("printer not found: {0}")]
    PrinterNotFound(String),

    #[error("printer offline: {0}")]
    PrinterOffline(String),

    #[error("printer hardware write failed: {0}")]
    PrintJob(String),

    #[error("cloud claim rejected: {0}")]
    ClaimLost(String),

    #[error("cloud unreachable: {0}")]
    CloudUnavailable(String),

    #[error("rendered payload fetch failed: {0}")]
    PayloadFetch(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("tenant mismatch: expected {expected}, got {actual}")]
    TenantMismatch { expected: String, actual: String },

    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("bluetooth error: {0}")]
    Bluetooth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("realtime connection error: {0}")]
    Realtime(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
