//! Error types shared across the relay.
//!
//! Protocol-surface failures carry an HTTP-style status code that services
//! embed in their typed failure replies. Framing errors are fatal for the
//! connection that produced them and never generate a reply.

use thiserror::Error;

/// A failure produced while handling a decoded message.
///
/// These map onto the status codes clients already understand; none of them
/// close the connection except where the individual service decides to
/// (e.g. an ACL denial at login).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller presented a valid identity that is denied by policy.
    #[error("{0}")]
    Forbidden(String),

    /// The caller has no valid session for the operation.
    #[error("{0}")]
    Unauthenticated(String),

    /// The requested resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request itself is inconsistent or incomplete.
    #[error("{0}")]
    BadRequest(String),

    /// Storage or other internal failure. Logged at error level.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The HTTP-style status code embedded in typed failure replies.
    pub fn status(&self) -> u64 {
        match self {
            ServiceError::Forbidden(_) => 403,
            ServiceError::Unauthenticated(_) => 401,
            ServiceError::NotFound(_) => 404,
            ServiceError::BadRequest(_) => 400,
            ServiceError::Internal(_) => 500,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(format!("{err:#}"))
    }
}

/// A violation of the wire framing contract.
///
/// Any of these desynchronizes the stream, so the connection is closed
/// without a reply.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("bad message magic 0x{found:016X}")]
    BadMagic { found: u64 },

    #[error("message body of {len} bytes exceeds the {max} byte cap")]
    Oversized { len: u64, max: u64 },

    #[error("message body ended while reading {what}")]
    Truncated { what: &'static str },

    #[error("message field {what} is not valid UTF-8")]
    InvalidString { what: &'static str },

    #[error("malformed JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
