//! Job Orchestrator: runs rewrites or autoscoring over a worklist with a
//! bounded worker pool, and single-item rewrites under a typed cancellation map.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use chrono::Utc;
use dataset::{DatasetStore, RecordId, RecordPatch};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::live::{LivePreview, LivePreviews, PreviewKey, RewriteKey, RewriteRegistry};
use crate::rewrite::{RewriteError, RewriteStrategy, RewriteTarget, StreamUpdate};
use crate::scoring::Scorer;
use crate::types_jobs::{JobConfig, JobMode, JobPhase, JobProgress, JobStatus};
use crate::worker_loop;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job config: {0}")]
    InvalidConfig(String),

    #[error("job task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RewriteOutcome {
    pub patch: RecordPatch,
    /// False when the record was deleted while the rewrite was streaming.
    pub merged: bool,
}

/// State shared by the workers of one job.
pub(crate) struct JobContext {
    pub job_id: Uuid,
    pub items: Vec<RecordId>,
    pub next: AtomicUsize,
    pub mode: JobMode,
    pub config: JobConfig,
    pub cancel: CancellationToken,
    pub progress: watch::Sender<JobProgress>,
    pub store: DatasetStore,
    pub strategy: Arc<RewriteStrategy>,
    pub scorer: Arc<Scorer>,
    pub previews: LivePreviews,
}

pub struct JobHandle {
    pub job_id: Uuid,
    progress: watch::Receiver<JobProgress>,
    cancel: CancellationToken,
    done: JoinHandle<JobStatus>,
}

impl JobHandle {
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// Receiver notified after every finished unit.
    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<JobStatus, JobError> {
        Ok(self.done.await?)
    }
}

struct JobEntry {
    status: JobStatus,
    progress: watch::Receiver<JobProgress>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn current(&self) -> JobStatus {
        let mut status = self.status.clone();
        if status.phase == JobPhase::Running {
            status.progress = self.progress.borrow().clone();
        }
        status
    }
}

/// Finished jobs kept for inspection unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Drops the oldest finished jobs beyond `keep`. Running jobs always stay.
fn prune_finished(jobs: &mut HashMap<Uuid, JobEntry>, keep: usize) {
    let mut finished: Vec<(chrono::DateTime<Utc>, Uuid)> = jobs
        .iter()
        .filter_map(|(id, e)| e.status.finished_at.map(|at| (at, *id)))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    for (_, id) in &finished[..finished.len() - keep] {
        jobs.remove(id);
    }
}

pub(crate) fn preview_of(update: StreamUpdate<'_>) -> LivePreview {
    LivePreview {
        field: update.field,
        extraction: update.extraction.clone(),
        chars: update.accumulated.len(),
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: DatasetStore,
    strategy: Arc<RewriteStrategy>,
    scorer: Arc<Scorer>,
    previews: LivePreviews,
    rewrites: RewriteRegistry,
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(store: DatasetStore, strategy: Arc<RewriteStrategy>, scorer: Arc<Scorer>) -> Self {
        Self {
            store,
            strategy,
            scorer,
            previews: LivePreviews::default(),
            rewrites: RewriteRegistry::default(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Number of finished jobs kept in the registry.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn previews(&self) -> &LivePreviews {
        &self.previews
    }

    /// Starts a job over `items`. Units are claimed in order by up to
    /// `config.concurrency` workers; completion order is unspecified.
    pub async fn run(&self, items: Vec<RecordId>, mode: JobMode, config: JobConfig) -> Result<JobHandle, JobError> {
        config.validate().map_err(JobError::InvalidConfig)?;

        let job_id = Uuid::new_v4();
        let total = items.len();
        let (tx, rx) = watch::channel(JobProgress { total, ..Default::default() });
        let cancel = CancellationToken::new();

        let status = JobStatus {
            job_id,
            mode,
            config: config.clone(),
            phase: JobPhase::Running,
            progress: JobProgress { total, ..Default::default() },
            started_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.write().await.insert(
            job_id,
            JobEntry { status, progress: rx.clone(), cancel: cancel.clone() },
        );
        info!(job_id=%job_id, total, concurrency=config.concurrency, ?mode, "job: started");

        let workers = config.concurrency.min(total);
        let ctx = Arc::new(JobContext {
            job_id,
            items,
            next: AtomicUsize::new(0),
            mode,
            config,
            cancel: cancel.clone(),
            progress: tx,
            store: self.store.clone(),
            strategy: self.strategy.clone(),
            scorer: self.scorer.clone(),
            previews: self.previews.clone(),
        });

        let mut set = JoinSet::new();
        for w in 0..workers {
            set.spawn(worker_loop::run_worker(ctx.clone(), w));
        }

        let jobs = self.jobs.clone();
        let history_limit = self.history_limit;
        let done = tokio::spawn(async move {
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    error!(job_id=%job_id, "job: worker task failed: {e}");
                }
            }

            let progress = ctx.progress.borrow().clone();
            let phase = if ctx.cancel.is_cancelled() && progress.completed < progress.total {
                JobPhase::Cancelled
            } else {
                JobPhase::Completed
            };

            let mut guard = jobs.write().await;
            let status = match guard.get_mut(&job_id) {
                Some(entry) => {
                    entry.status.phase = phase;
                    entry.status.progress = progress.clone();
                    entry.status.finished_at = Some(Utc::now());
                    entry.status.clone()
                }
                None => JobStatus {
                    job_id,
                    mode: ctx.mode,
                    config: ctx.config.clone(),
                    phase,
                    progress: progress.clone(),
                    started_at: Utc::now(),
                    finished_at: Some(Utc::now()),
                },
            };
            prune_finished(&mut guard, history_limit);
            drop(guard);
            info!(
                job_id=%job_id,
                ?phase,
                total = progress.total,
                completed = progress.completed,
                updated = progress.updated,
                skipped = progress.skipped,
                errors = progress.errors,
                "job: finished"
            );
            status
        });

        Ok(JobHandle { job_id, progress: rx, cancel, done })
    }

    pub async fn job_status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs.read().await.get(&job_id).map(JobEntry::current)
    }

    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.jobs.read().await.values().map(JobEntry::current).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Signals every worker of the job to stop. Returns false for unknown jobs.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        match self.jobs.read().await.get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(job_id=%job_id, "job: cancel requested");
                true
            }
            None => false,
        }
    }

    /// Rewrites one record (or one message of it) and merges the result.
    /// A newer request for the same key cancels this one.
    pub async fn rewrite_one(&self, item_id: &str, target: RewriteTarget) -> Result<RewriteOutcome, UnitError> {
        let item = self
            .store
            .get(item_id)
            .await
            .ok_or_else(|| UnitError::NotFound(item_id.to_string()))?;

        let key = RewriteKey::for_target(item_id, Some(target));
        let cancel = CancellationToken::new();
        let ticket = self.rewrites.register(key.clone(), cancel.clone());

        let preview_key = PreviewKey::single(key.clone());
        let previews = self.previews.clone();
        let res = self
            .strategy
            .rewrite(&item, target, &cancel, &mut |u: StreamUpdate<'_>| previews.publish(&preview_key, preview_of(u)))
            .await;

        self.rewrites.finish(&key, ticket);
        self.previews.clear(&preview_key);

        let patch = res?;
        let merged = self.store.merge(item_id, &patch).await;
        Ok(RewriteOutcome { patch, merged })
    }

    pub fn cancel_rewrite(&self, key: &RewriteKey) -> bool {
        self.rewrites.cancel(key)
    }

    pub fn is_rewriting(&self, key: &RewriteKey) -> bool {
        self.rewrites.is_running(key)
    }
}
