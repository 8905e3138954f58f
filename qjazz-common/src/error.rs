//! Shared error taxonomy (spec §7). Each layer (worker envelope, gRPC status,
//! HTTP response) maps a [`Kind`] to its own wire representation; this module
//! only fixes the taxonomy and the client-safe message contract.

use thiserror::Error;

/// The error kinds named in §7. Not every error type in the codebase uses
/// this enum directly, but every user-facing error surface maps onto one of
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    ResourceNotAllowed,
    NotFound,
    Removed,
    UnreadableResource,
    StrictCheckingFailure,
    CapacityExhausted,
    BackendUnavailable,
    Timeout,
    InvalidArgument,
    Unauthorized,
    Internal,
}

impl Kind {
    /// HTTP status code surfaced by the gateway router / admin API.
    pub fn http_status(self) -> u16 {
        match self {
            Kind::ResourceNotAllowed => 403,
            Kind::NotFound => 404,
            Kind::Removed => 410,
            Kind::UnreadableResource => 500,
            Kind::StrictCheckingFailure => 422,
            Kind::CapacityExhausted => 409,
            Kind::BackendUnavailable => 503,
            Kind::Timeout => 504,
            Kind::InvalidArgument => 400,
            Kind::Unauthorized => 401,
            Kind::Internal => 500,
        }
    }

    /// Status code used in the worker reply envelope `(status, body)` and
    /// echoed by the gRPC layer in `x-reply-status-code`.
    pub fn envelope_status(self) -> u16 {
        self.http_status()
    }
}

/// A message safe to hand back to an HTTP/gRPC client, as opposed to
/// `Display`/`Debug` which may include internal detail meant for logs only.
/// Mirrors the teacher's `golem_common::SafeDisplay`.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;
}

/// Generic error used by the cache/handler layer (C1/C2). Crates closer to
/// the wire (ipc, gRPC, HTTP) define their own enums but convert from this
/// one via `From`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resource not allowed: {0}")]
    ResourceNotAllowed(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource removed: {0}")]
    Removed(String),
    #[error("unreadable resource: {0}")]
    UnreadableResource(String),
    #[error("strict checking failure: {0}")]
    StrictCheckingFailure(String),
    #[error("capacity exhausted")]
    CapacityExhausted,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> Kind {
        match self {
            CoreError::ResourceNotAllowed(_) => Kind::ResourceNotAllowed,
            CoreError::NotFound(_) => Kind::NotFound,
            CoreError::Removed(_) => Kind::Removed,
            CoreError::UnreadableResource(_) => Kind::UnreadableResource,
            CoreError::StrictCheckingFailure(_) => Kind::StrictCheckingFailure,
            CoreError::CapacityExhausted => Kind::CapacityExhausted,
            CoreError::BackendUnavailable(_) => Kind::BackendUnavailable,
            CoreError::Timeout => Kind::Timeout,
            CoreError::InvalidArgument(_) => Kind::InvalidArgument,
            CoreError::Unauthorized => Kind::Unauthorized,
            CoreError::Internal(_) => Kind::Internal,
        }
    }
}

impl SafeDisplay for CoreError {
    fn to_safe_string(&self) -> String {
        match self {
            // Internal errors must not leak details to clients.
            CoreError::Internal(_) | CoreError::UnreadableResource(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_redacted() {
        let err = CoreError::Internal("leaked /etc/passwd path".to_string());
        assert_eq!(err.to_safe_string(), "internal server error");
    }

    #[test]
    fn kind_maps_to_expected_http_status() {
        assert_eq!(Kind::NotFound.http_status(), 404);
        assert_eq!(Kind::Removed.http_status(), 410);
        assert_eq!(Kind::CapacityExhausted.http_status(), 409);
        assert_eq!(Kind::Timeout.http_status(), 504);
    }
}
