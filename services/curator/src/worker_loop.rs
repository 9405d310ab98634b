use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::live::{PreviewKey, RewriteKey};
use crate::orchestrator_job::{preview_of, JobContext};
use crate::rewrite::{RewriteError, StreamUpdate};
use crate::types_jobs::{JobMode, UnitOutcome};

/// One pool worker: claims the next index until the list is exhausted or
/// the job is cancelled, pacing between units.
pub(crate) async fn run_worker(job: std::sync::Arc<JobContext>, worker: usize) {
    debug!(job_id=%job.job_id, worker, "worker: started");

    loop {
        if job.cancel.is_cancelled() {
            break;
        }
        let idx = job.next.fetch_add(1, Ordering::SeqCst);
        let Some(item_id) = job.items.get(idx) else {
            break;
        };

        let outcome = process_unit(&job, item_id).await;
        job.progress.send_modify(|p| p.record(outcome));
        if outcome == UnitOutcome::Cancelled {
            break;
        }

        let more = job.next.load(Ordering::SeqCst) < job.items.len();
        if job.config.pace_ms > 0 && more {
            tokio::select! {
                _ = job.cancel.cancelled() => break,
                _ = sleep(Duration::from_millis(job.config.pace_ms)) => {}
            }
        }
    }

    debug!(job_id=%job.job_id, worker, "worker: exiting");
}

async fn process_unit(job: &JobContext, item_id: &str) -> UnitOutcome {
    let Some(item) = job.store.get(item_id).await else {
        debug!(job_id=%job.job_id, item_id, "unit: record gone, skipping");
        return UnitOutcome::Skipped;
    };

    let target = match job.mode {
        JobMode::Rewrite { target } => Some(target),
        JobMode::Autoscore => None,
    };
    let key = PreviewKey::job(job.job_id, RewriteKey::for_target(item_id, target));
    let mut attempt: u32 = 0;

    loop {
        let previews = job.previews.clone();
        let mut on_delta = |u: StreamUpdate<'_>| previews.publish(&key, preview_of(u));
        let res = match target {
            Some(t) => job.strategy.rewrite(&item, t, &job.cancel, &mut on_delta).await,
            None => job.scorer.score(&item, &job.cancel, &mut on_delta).await,
        };
        job.previews.clear(&key);

        let err = match res {
            Ok(patch) => {
                return if job.store.merge(item_id, &patch).await {
                    UnitOutcome::Updated
                } else {
                    debug!(job_id=%job.job_id, item_id, "unit: record deleted mid-flight");
                    UnitOutcome::Skipped
                };
            }
            Err(RewriteError::Cancelled) => return UnitOutcome::Cancelled,
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= job.config.max_retries {
            error!(job_id=%job.job_id, item_id, attempt, "unit failed: {err}");
            return UnitOutcome::Failed;
        }

        attempt += 1;
        warn!(job_id=%job.job_id, item_id, attempt, max = job.config.max_retries, "unit: retrying after {err}");
        tokio::select! {
            _ = job.cancel.cancelled() => return UnitOutcome::Cancelled,
            _ = sleep(Duration::from_millis(job.config.retry_delay_ms)) => {}
        }
    }
}
