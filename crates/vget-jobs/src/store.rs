//! In-process job store with a forward-only state machine.
//!
//! Expiry is a logical predicate checked on every read; physical cleanup is
//! the sweeper's concern. Each applied update bumps a per-job sequence
//! number, and stale progress (below the stored value) is discarded rather
//! than letting the visible state regress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vget_models::{Job, JobError, JobId, JobOutput, JobState};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// Whether an update changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Out-of-order progress detected and dropped.
    Discarded,
}

/// A state-machine update request.
#[derive(Debug)]
pub enum JobUpdate {
    /// `pending -> processing`.
    Started,
    /// `processing -> processing`, progress only.
    Progress(u8),
    /// `processing -> completed`; sets progress to 100.
    Completed(JobOutput),
    /// `pending|processing -> failed`.
    Failed(JobError),
}

impl JobUpdate {
    fn target_state(&self) -> JobState {
        match self {
            JobUpdate::Started | JobUpdate::Progress(_) => JobState::Processing,
            JobUpdate::Completed(_) => JobState::Completed,
            JobUpdate::Failed(_) => JobState::Failed,
        }
    }
}

/// Store retention policy.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Ceiling on how long a non-terminal record may live.
    pub pending_ttl: Duration,
    /// Retention after a terminal transition; bounds artifact availability.
    pub completed_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(2 * 60 * 60),
            completed_ttl: Duration::from_secs(60 * 60),
        }
    }
}

struct Record {
    job: Job,
    deadline: Instant,
    processing_since: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Shared job store. The orchestrator is the only writer. Cheap to clone;
/// clones share storage.
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, Record>>>,
    config: StoreConfig,
}

impl Clone for JobStore {
    fn clone(&self) -> Self {
        Self {
            jobs: Arc::clone(&self.jobs),
            config: self.config.clone(),
        }
    }
}

impl JobStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Insert a freshly created pending job.
    pub async fn insert(&self, job: Job) {
        let record = Record {
            deadline: Instant::now() + self.config.pending_ttl,
            processing_since: None,
            job,
        };
        self.jobs.write().await.insert(record.job.id.clone(), record);
    }

    /// Insert a pending job unless its requester already has `limit` live
    /// non-terminal jobs. Count and insert happen under one lock
    /// acquisition, so racing submits cannot overshoot the ceiling.
    pub async fn insert_if_below(&self, job: Job, limit: usize) -> bool {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        if active_for(&jobs, &job.requester_key, now) >= limit {
            return false;
        }
        let record = Record {
            deadline: now + self.config.pending_ttl,
            processing_since: None,
            job,
        };
        jobs.insert(record.job.id.clone(), record);
        true
    }

    /// Read a job. Expired records behave as missing even before the sweep.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let jobs = self.jobs.read().await;
        let record = jobs.get(id)?;
        if record.is_expired(Instant::now()) {
            return None;
        }
        Some(record.job.clone())
    }

    /// Read a job owned by `requester_key`. An ownership mismatch reads as
    /// missing so foreign callers cannot probe for existence.
    pub async fn get_owned(&self, id: &JobId, requester_key: &str) -> Option<Job> {
        let job = self.get(id).await?;
        if job.requester_key != requester_key {
            return None;
        }
        Some(job)
    }

    /// Apply a state-machine update atomically.
    pub async fn apply(&self, id: &JobId, update: JobUpdate) -> StoreResult<UpdateOutcome> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.is_expired(Instant::now()) {
            return Err(StoreError::NotFound);
        }

        let from = record.job.state;
        let to = update.target_state();

        let valid = matches!(
            (from, &update),
            (JobState::Pending, JobUpdate::Started)
                | (JobState::Pending, JobUpdate::Failed(_))
                | (JobState::Processing, JobUpdate::Progress(_))
                | (JobState::Processing, JobUpdate::Completed(_))
                | (JobState::Processing, JobUpdate::Failed(_))
        );
        if !valid {
            return Err(StoreError::InvalidTransition { from, to });
        }

        match update {
            JobUpdate::Started => {
                record.job.state = JobState::Processing;
                record.processing_since = Some(Instant::now());
            }
            JobUpdate::Progress(percent) => {
                let percent = percent.min(100);
                if percent < record.job.progress {
                    // Stale delivery; keep the visible state monotonic.
                    debug!(job_id = %id, percent, current = record.job.progress,
                        "Discarding stale progress update");
                    return Ok(UpdateOutcome::Discarded);
                }
                record.job.progress = percent;
            }
            JobUpdate::Completed(output) => {
                record.job.state = JobState::Completed;
                record.job.progress = 100;
                record.job.output = Some(output);
                self.refresh_retention(record);
            }
            JobUpdate::Failed(error) => {
                record.job.state = JobState::Failed;
                record.job.error = Some(error);
                self.refresh_retention(record);
            }
        }

        record.job.update_seq += 1;
        record.job.updated_at = chrono::Utc::now();
        Ok(UpdateOutcome::Applied)
    }

    fn refresh_retention(&self, record: &mut Record) {
        record.deadline = Instant::now() + self.config.completed_ttl;
        record.job.expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.completed_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
    }

    /// Count live non-terminal jobs for a requester.
    pub async fn count_active_for(&self, requester_key: &str) -> usize {
        active_for(&*self.jobs.read().await, requester_key, Instant::now())
    }

    /// Ids of jobs stuck in processing longer than `max_duration`.
    pub async fn timed_out_jobs(&self, max_duration: Duration) -> Vec<JobId> {
        let now = Instant::now();
        self.jobs
            .read()
            .await
            .values()
            .filter(|r| {
                !r.is_expired(now)
                    && r.job.state == JobState::Processing
                    && r.processing_since
                        .map(|since| now.duration_since(since) > max_duration)
                        .unwrap_or(false)
            })
            .map(|r| r.job.id.clone())
            .collect()
    }

    /// Force a single record out immediately, returning its artifact path
    /// so the caller can delete the file. Administrative eviction; routine
    /// cleanup goes through [`purge_expired`](Self::purge_expired).
    pub async fn expire(&self, id: &JobId) -> Option<PathBuf> {
        let record = self.jobs.write().await.remove(id)?;
        debug!(job_id = %id, "Expired job on demand");
        match record.job.output {
            Some(JobOutput::Artifact { path, .. }) => Some(path),
            _ => None,
        }
    }

    /// Physically evict expired records. Returns artifact paths so the
    /// caller can delete the files.
    pub async fn purge_expired(&self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut artifacts = Vec::new();
        for id in expired {
            if let Some(record) = jobs.remove(&id) {
                if let Some(JobOutput::Artifact { path, .. }) = record.job.output {
                    artifacts.push(path);
                }
                debug!(job_id = %id, "Evicted expired job");
            }
        }
        artifacts
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn active_for(jobs: &HashMap<JobId, Record>, requester_key: &str, now: Instant) -> usize {
    jobs.values()
        .filter(|r| {
            !r.is_expired(now)
                && r.job.requester_key == requester_key
                && !r.job.state.is_terminal()
        })
        .count()
}

/// Background eviction of expired jobs and their artifacts.
pub struct StoreSweeper {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl StoreSweeper {
    pub fn spawn(store: Arc<JobStore>, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let artifacts = store.purge_expired().await;
                        for path in artifacts {
                            if let Err(e) = tokio::fs::remove_file(&path).await {
                                warn!(path = %path.display(), "Failed to remove artifact: {e}");
                            } else {
                                info!(path = %path.display(), "Removed expired artifact");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
