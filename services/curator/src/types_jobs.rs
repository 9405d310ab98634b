use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rewrite::RewriteTarget;

/// Pool and retry settings for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub concurrency: usize,
    /// Pause after each unit while work remains.
    pub pace_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { concurrency: 1, pace_ms: 0, max_retries: 2, retry_delay_ms: 2000 }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Per-request overrides of the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfigOverrides {
    pub concurrency: Option<usize>,
    #[serde(alias = "sleep_time")]
    pub pace_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl JobConfigOverrides {
    pub fn apply(&self, base: &JobConfig) -> JobConfig {
        JobConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            pace_ms: self.pace_ms.unwrap_or(base.pace_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobMode {
    Rewrite { target: RewriteTarget },
    Autoscore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    /// Units finished in any way: updated, skipped or failed.
    pub completed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl JobProgress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f32 * 100.0 / self.total as f32
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub mode: JobMode,
    pub config: JobConfig,
    pub phase: JobPhase,
    pub progress: JobProgress,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// How a single unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Updated,
    /// The record was gone before processing or before the merge.
    Skipped,
    Failed,
    Cancelled,
}

impl JobProgress {
    /// Counts a finished unit. Cancelled units are not counted.
    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Updated => self.updated += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Failed => self.errors += 1,
            UnitOutcome::Cancelled => return,
        }
        self.completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_fall_back_to_base() {
        let base = JobConfig::default();
        let cfg = JobConfigOverrides { concurrency: Some(4), ..Default::default() }.apply(&base);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.max_retries, base.max_retries);

        let o: JobConfigOverrides = serde_json::from_str(r#"{"sleep_time": 250}"#).unwrap();
        assert_eq!(o.apply(&base).pace_ms, 250);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let cfg = JobConfig { concurrency: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn progress_counts() {
        let mut p = JobProgress { total: 4, ..Default::default() };
        p.record(UnitOutcome::Updated);
        p.record(UnitOutcome::Skipped);
        p.record(UnitOutcome::Failed);
        p.record(UnitOutcome::Cancelled);
        assert_eq!((p.completed, p.updated, p.skipped, p.errors), (3, 1, 1, 1));
        assert_eq!(p.percent(), 75.0);
    }
}
