//! Store operation errors.
//!
//! Domain failures (validation, insufficient stock, conflicts) pass through
//! transparently; the remaining variants are infrastructure concerns.

use thiserror::Error;

use stockroom_core::DomainError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Deterministic domain failure, surfaced unchanged to the caller.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// SKU already in use within the organization.
    #[error("duplicate sku '{0}'")]
    DuplicateSku(String),

    /// The backing storage failed (connection, transaction, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Change publication failed after a successful commit. The write is
    /// durable; retrying delivery may duplicate, which consumers tolerate.
    #[error("change publication failed: {0}")]
    Publish(String),
}

impl StoreError {
    /// True when the error is a lost optimistic-concurrency race, which the
    /// store retries once internally before surfacing.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Domain(DomainError::Conflict(_)))
    }
}
