use ezbooks_core::TenantId;

use crate::error::AiError;

/// A tenant-scoped inference unit over snapshots the caller assembled.
///
/// Jobs do no IO; turning the output into a command is up to the caller.
pub trait AiJob: Send + Sync {
    type Output;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn tenant_id(&self) -> TenantId;

    fn run(&self) -> Result<Self::Output, AiError>;
}
