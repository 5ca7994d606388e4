use std::time::Instant;

use ezbooks_core::TenantId;

use crate::error::AiError;
use crate::job::AiJob;

/// Executes jobs for exactly one tenant.
pub trait AiScheduler: Send + Sync {
    fn tenant_id(&self) -> TenantId;

    fn run<J: AiJob>(&self, job: J) -> Result<J::Output, AiError> {
        let scheduler = self.tenant_id();
        if job.tenant_id() != scheduler {
            return Err(AiError::TenantMismatch {
                job: job.tenant_id(),
                scheduler,
            });
        }

        let started = Instant::now();
        let out = job.run();
        tracing::debug!(
            job = job.name(),
            tenant_id = %scheduler,
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = out.is_ok(),
            "ai job finished"
        );
        out
    }
}

/// Runs jobs synchronously on the calling thread.
#[derive(Debug, Copy, Clone)]
pub struct LocalAiScheduler {
    tenant_id: TenantId,
}

impl LocalAiScheduler {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }
}

impl AiScheduler for LocalAiScheduler {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
