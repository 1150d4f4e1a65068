use thiserror::Error;

/// Application-wide error types for Pulse.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-2xx status or transport error).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The extractor reached the page but could not read metrics from it.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A submitted URL is not a recognised post URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error came from the storage layer.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, AppError::DatabaseError(_))
    }

    /// Returns true if this error should stop the process before any work starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ConfigError(_))
    }
}
