//! Shared error types for waymark
//!
//! Every failure that can cross a route boundary maps onto one of these
//! variants. Handlers translate the variant into an HTTP status plus a
//! JSON body carrying a stable machine-readable code, so clients never
//! have to parse prose.

use hyper::StatusCode;
use thiserror::Error;

/// How a storage failure should be treated by callers.
///
/// Classified once, at the database boundary, from the driver's
/// structured error kind. Route handlers surface `Transient` as 503 so
/// load balancers and clients know a retry may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Connection-level trouble: server selection, I/O, cleared pools.
    Transient,
    /// The operation itself is rejected and will keep failing.
    Permanent,
}

/// Top-level error type for waymark
#[derive(Error, Debug)]
pub enum WaymarkError {
    /// Resource does not resolve for this caller. Also used when a read
    /// is denied, so a denied plan is indistinguishable from a missing
    /// one on the wire.
    #[error("{0}")]
    NotFound(String),

    /// Credential absent or unverifiable on a route that requires one.
    #[error("{0}")]
    Unauthorized(String),

    /// Credential verified but insufficient for the operation.
    #[error("{0}")]
    Forbidden(String),

    /// The request is well-formed but collides with current state
    /// (invite already linked, duplicate plan membership).
    #[error("{0}")]
    Conflict(String),

    /// Input fails a domain rule (visibility not allowed, owner role
    /// change, missing unit on a food item).
    #[error("{0}")]
    Validation(String),

    /// Malformed request: unreadable, oversized or invalid JSON body.
    #[error("{0}")]
    BadRequest(String),

    /// Storage failure, classified at the database boundary.
    #[error("storage error: {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    /// Anything that should never reach a client in detail.
    #[error("{0}")]
    Internal(String),
}

impl WaymarkError {
    pub fn storage_transient(message: impl Into<String>) -> Self {
        WaymarkError::Storage {
            kind: StorageErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn storage_permanent(message: impl Into<String>) -> Self {
        WaymarkError::Storage {
            kind: StorageErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            WaymarkError::NotFound(_) => StatusCode::NOT_FOUND,
            WaymarkError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WaymarkError::Forbidden(_) => StatusCode::FORBIDDEN,
            WaymarkError::Conflict(_) => StatusCode::CONFLICT,
            WaymarkError::Validation(_) => StatusCode::BAD_REQUEST,
            WaymarkError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WaymarkError::Storage { kind, .. } => match kind {
                StorageErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                StorageErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
            },
            WaymarkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            WaymarkError::NotFound(_) => "NOT_FOUND",
            WaymarkError::Unauthorized(_) => "UNAUTHORIZED",
            WaymarkError::Forbidden(_) => "FORBIDDEN",
            WaymarkError::Conflict(_) => "CONFLICT",
            WaymarkError::Validation(_) => "VALIDATION",
            WaymarkError::BadRequest(_) => "BAD_REQUEST",
            WaymarkError::Storage { kind, .. } => match kind {
                StorageErrorKind::Transient => "STORAGE_UNAVAILABLE",
                StorageErrorKind::Permanent => "STORAGE_ERROR",
            },
            WaymarkError::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to echo back to the client. Storage and internal
    /// details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            WaymarkError::Storage {
                kind: StorageErrorKind::Transient,
                ..
            } => "Service temporarily unavailable".to_string(),
            WaymarkError::Storage {
                kind: StorageErrorKind::Permanent,
                ..
            } => "Internal storage error".to_string(),
            WaymarkError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for WaymarkError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WaymarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            WaymarkError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WaymarkError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WaymarkError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            WaymarkError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WaymarkError::storage_transient("down").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WaymarkError::storage_permanent("bad").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_details_not_echoed() {
        let err = WaymarkError::storage_permanent("duplicate key on participants");
        assert_eq!(err.public_message(), "Internal storage error");
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn test_validation_message_is_public() {
        let err = WaymarkError::Validation("Unit is required for food items".into());
        assert_eq!(err.public_message(), "Unit is required for food items");
    }
}
