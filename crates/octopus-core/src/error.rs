//! Error types for Octopus

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error shared by the configuration and upstream crates.
///
/// Script failures have their own type in `octopus-scripting`; upstream call
/// failures reach scripts as [`FailureReason`](crate::FailureReason).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Outbound request could not be turned into a wire request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request builder rejected a method, URI or header
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}
