//! Error types shared by the core vocabulary.

use thiserror::Error;

/// Errors raised while constructing or parsing core identifiers and
/// configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identifier string failed validation.
    #[error("invalid identifier {input:?}: {reason}")]
    InvalidIdentifier { input: String, reason: String },

    /// A hex-encoded token or transaction id could not be decoded.
    #[error("invalid hex digest {input:?}: {reason}")]
    InvalidDigest { input: String, reason: String },

    /// A payment URL did not match the `hopnet://<address>/<payee>` shape.
    #[error("invalid payment url {0:?}")]
    InvalidUrl(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
