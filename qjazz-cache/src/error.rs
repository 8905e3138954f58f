//! Error surface for the checkout engine (§4.C1/C2). We reuse
//! [`qjazz_common::error::CoreError`] rather than inventing a parallel
//! taxonomy, since every variant here maps onto one of its kinds.

use qjazz_common::error::CoreError;

pub type CacheError = CoreError;

/// Shorthand constructors matching the Python exception names this engine
/// was distilled from (`ResourceNotAllowed`, `InvalidCacheRootUrl`,
/// `UnreadableResource`, `StrictCheckingFailure`).
pub fn resource_not_allowed(path: impl Into<String>) -> CacheError {
    CacheError::ResourceNotAllowed(path.into())
}

pub fn not_found(uri: impl Into<String>) -> CacheError {
    CacheError::NotFound(uri.into())
}

pub fn invalid_root_url(msg: impl Into<String>) -> CacheError {
    CacheError::InvalidArgument(msg.into())
}

pub fn unreadable_resource(msg: impl Into<String>) -> CacheError {
    CacheError::UnreadableResource(msg.into())
}

pub fn strict_checking_failure(msg: impl Into<String>) -> CacheError {
    CacheError::StrictCheckingFailure(msg.into())
}

pub fn capacity_exhausted() -> CacheError {
    CacheError::CapacityExhausted
}
