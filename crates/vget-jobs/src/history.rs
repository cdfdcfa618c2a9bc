//! Completion history sink.
//!
//! One-way notification after a job reaches a terminal success. The default
//! sink just logs; a deployment can plug in a durable recorder without the
//! orchestrator knowing.

use async_trait::async_trait;
use tracing::info;

use vget_models::Job;

/// Receives completed jobs for bookkeeping. Failures here never affect the
/// job itself.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record_completed(&self, job: &Job);
}

/// Log-only recorder.
pub struct LogHistory;

#[async_trait]
impl HistoryRecorder for LogHistory {
    async fn record_completed(&self, job: &Job) {
        info!(
            job_id = %job.id,
            kind = job.kind.as_str(),
            tier = %job.tier,
            url = %job.source_url,
            "Job completed"
        );
    }
}
