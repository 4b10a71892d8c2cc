//! Fire-and-forget job dispatch.
//!
//! The caller that starts a job never blocks on its completion; progress
//! is observed by polling the job record. Every spawned run has a
//! mandatory terminal error sink: an orchestrator error is logged, never
//! propagated, and never crashes the host process.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::error;
use uuid::Uuid;

use crate::orchestrator::JobOrchestrator;

/// Start a page-generation job in the background.
///
/// The returned handle lets tests await settlement; callers are free to
/// drop it.
pub fn trigger_generation_job(orchestrator: Arc<JobOrchestrator>, job_id: Uuid) -> JoinHandle<()> {
    spawn_supervised(orchestrator, job_id, "generation")
}

/// Start a hero reference-sheet job in the background.
pub fn trigger_hero_job(orchestrator: Arc<JobOrchestrator>, job_id: Uuid) -> JoinHandle<()> {
    spawn_supervised(orchestrator, job_id, "hero")
}

fn spawn_supervised(
    orchestrator: Arc<JobOrchestrator>,
    job_id: Uuid,
    kind: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_job(job_id).await {
            error!(%job_id, kind, error = %e, "job run ended with error");
        }
    })
}
