use thiserror::Error;

use ezbooks_core::TenantId;

/// Suggestion engine failures. Jobs never write, so any of these can be
/// retried safely; only [`AiError::is_transient`] ones are worth it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    /// The snapshot can never produce an entry (zero amount, no bank account).
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    /// The chart lacks a usable account right now.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("job for tenant {job} refused by scheduler of tenant {scheduler}")]
    TenantMismatch { job: TenantId, scheduler: TenantId },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AiError::InferenceFailed(_))
    }
}
