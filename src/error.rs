use thiserror::Error;

/// Errors raised by the HTTP transport underneath the fetch client
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors raised by a media library backend
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Library API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Library section not found: {0}")]
    SectionNotFound(String),

    #[error("Operation not supported by this library: {0}")]
    Unsupported(&'static str),

    #[error("Library declined {strategy} for item {item}")]
    Declined { strategy: String, item: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while downloading or caching cover art
#[derive(Error, Debug)]
pub enum CoverError {
    #[error("Cover download failed with HTTP {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
