//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid software fact: {0}")]
    InvalidSoftware(String),

    #[error("invalid list options: {0}")]
    InvalidListOptions(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
