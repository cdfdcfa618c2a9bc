//! Request-to-job orchestration.
//!
//! Every submission walks the same gauntlet: URL validation, rate limit,
//! tier gate, cache lookup (info only), concurrency ceiling. Survivors get a
//! pending record and a spawned task that drives the extractor and applies
//! state-machine updates back to the store. Task handles are retained so
//! cancellation can abort the underlying work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vget_cache::TtlCache;
use vget_extractor::{progress_channel, DownloadSpec, MediaExtractor, SubtitleSpec};
use vget_limiter::{EndpointClass, RateLimiter};
use vget_models::{
    ErrorKind, Job, JobError, JobId, JobKind, JobOutput, JobView, MediaInfo, ResolutionRank, Tier,
};

use crate::history::HistoryRecorder;
use crate::store::{JobStore, JobUpdate, StoreError};
use crate::validate::validate_source_url;

/// Identity and entitlement of the submitting caller, resolved by the HTTP
/// layer before the orchestrator is involved.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Account id or anonymous session key.
    pub key: String,
    pub tier: Tier,
}

impl Caller {
    pub fn new(key: impl Into<String>, tier: Tier) -> Self {
        Self {
            key: key.into(),
            tier,
        }
    }
}

/// A download submission.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Extractor-native format id to fetch.
    pub format_id: String,
    /// Quality label the client claims the format has; gated against the
    /// caller's tier ceiling when it parses as a resolution.
    pub quality: Option<String>,
}

/// Rejection of a submission before any job exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("{0}")]
    TierRestricted(String),

    #[error("{0}")]
    Internal(String),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Validation(_) => ErrorKind::Validation,
            SubmitError::RateLimited { .. } => ErrorKind::RateLimited,
            SubmitError::TierRestricted(_) => ErrorKind::TierRestricted,
            SubmitError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Accepted submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A job was created; poll for its result.
    Queued(JobView),
    /// Served from cache; the view is already completed.
    Cached(JobView),
}

impl Submission {
    pub fn view(&self) -> &JobView {
        match self {
            Submission::Queued(v) | Submission::Cached(v) => v,
        }
    }
}

/// Why a cancel did nothing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("job not found")]
    NotFound,

    #[error("job already finished")]
    AlreadyTerminal,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long probe results stay cached.
    pub info_cache_ttl: Duration,
    /// How long the supported-sites listing stays cached.
    pub sites_cache_ttl: Duration,
    /// Hard ceiling on extractor work per job, enforced by the watchdog.
    pub max_job_duration: Duration,
    /// Where artifacts are written.
    pub artifact_dir: PathBuf,
    /// Record retention used for the `expires_at` shown to clients.
    pub retention: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            info_cache_ttl: Duration::from_secs(600),
            sites_cache_ttl: Duration::from_secs(24 * 60 * 60),
            max_job_duration: Duration::from_secs(15 * 60),
            artifact_dir: std::env::temp_dir().join("vget-artifacts"),
            retention: chrono::Duration::hours(2),
        }
    }
}

impl OrchestratorConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            info_cache_ttl: secs("VGET_INFO_CACHE_TTL_SECS", defaults.info_cache_ttl),
            sites_cache_ttl: secs("VGET_SITES_CACHE_TTL_SECS", defaults.sites_cache_ttl),
            max_job_duration: secs("VGET_MAX_JOB_DURATION_SECS", defaults.max_job_duration),
            artifact_dir: std::env::var("VGET_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            retention: defaults.retention,
        }
    }
}

/// Turns validated requests into tracked jobs and drives them to a terminal
/// state.
pub struct Orchestrator {
    store: Arc<JobStore>,
    info_cache: TtlCache<MediaInfo>,
    sites_cache: TtlCache<Vec<String>>,
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn MediaExtractor>,
    history: Arc<dyn HistoryRecorder>,
    tasks: Arc<RwLock<HashMap<JobId, JoinHandle<()>>>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        limiter: Arc<RateLimiter>,
        extractor: Arc<dyn MediaExtractor>,
        history: Arc<dyn HistoryRecorder>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            info_cache: TtlCache::new(),
            sites_cache: TtlCache::new(),
            limiter,
            extractor,
            history,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn info_cache(&self) -> &TtlCache<MediaInfo> {
        &self.info_cache
    }

    /// Sites the configured extractor advertises. Long-TTL cached; the list
    /// never varies per caller.
    pub async fn supported_sites(&self) -> Vec<String> {
        if let Some(sites) = self.sites_cache.get("sites").await {
            return sites;
        }
        let sites = self.extractor.supported_sites();
        self.sites_cache
            .insert("sites", sites.clone(), self.config.sites_cache_ttl)
            .await;
        sites
    }

    /// Submit a metadata probe. Cached results short-circuit into an
    /// already-completed view without creating a record.
    pub async fn submit_info(&self, caller: &Caller, url: &str) -> Result<Submission, SubmitError> {
        let url = validate_source_url(url).map_err(SubmitError::Validation)?;
        self.check_rate(caller, EndpointClass::VideoInfo).await?;

        let cache_key = format!("info:{}:{}", url, caller.tier);
        if let Some(info) = self.info_cache.get(&cache_key).await {
            metrics::counter!("vget_info_cache_hits_total").increment(1);
            debug!(url, "Serving cached media info");
            return Ok(Submission::Cached(self.cached_info_view(info)));
        }
        metrics::counter!("vget_info_cache_misses_total").increment(1);

        let job = Job::new(
            JobKind::Info,
            caller.key.clone(),
            caller.tier,
            url.clone(),
            self.config.retention,
        );
        let view = job.view(false);
        let id = job.id.clone();
        self.admit(job, caller).await?;
        metrics::counter!("vget_jobs_submitted_total", &[("kind", "info")]).increment(1);

        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let cache = self.info_cache.clone();
        let cache_ttl = self.config.info_cache_ttl;
        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();

        // Holding the map lock across the spawn keeps the task from
        // removing its handle before it has been inserted.
        let mut task_map = self.tasks.write().await;
        let handle = tokio::spawn(async move {
            run_info(&store, extractor.as_ref(), &task_id, &url, cache, cache_key, cache_ttl)
                .await;
            tasks.write().await.remove(&task_id);
        });
        task_map.insert(id, handle);
        drop(task_map);

        Ok(Submission::Queued(view))
    }

    /// Submit a media download.
    pub async fn submit_download(
        &self,
        caller: &Caller,
        request: DownloadRequest,
    ) -> Result<Submission, SubmitError> {
        let url = validate_source_url(&request.url).map_err(SubmitError::Validation)?;
        if request.format_id.trim().is_empty() {
            return Err(SubmitError::Validation("format_id must not be empty".to_string()));
        }
        self.check_rate(caller, EndpointClass::Download).await?;
        self.check_format_entitlement(caller, &url, &request.format_id, request.quality.as_deref())
            .await?;

        let job = Job::new(
            JobKind::Download,
            caller.key.clone(),
            caller.tier,
            url.clone(),
            self.config.retention,
        )
        .with_format(&request.format_id, request.quality.clone());
        let view = job.view(false);
        let id = job.id.clone();
        self.admit(job, caller).await?;
        metrics::counter!("vget_jobs_submitted_total", &[("kind", "download")]).increment(1);

        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let history = Arc::clone(&self.history);
        let tasks = Arc::clone(&self.tasks);
        let spec = DownloadSpec {
            url,
            format_id: request.format_id,
            dest_dir: self.config.artifact_dir.clone(),
            file_stem: id.as_str().to_string(),
        };
        let task_id = id.clone();

        let mut task_map = self.tasks.write().await;
        let handle = tokio::spawn(async move {
            run_download(&store, extractor.as_ref(), history.as_ref(), &task_id, spec).await;
            tasks.write().await.remove(&task_id);
        });
        task_map.insert(id, handle);
        drop(task_map);

        Ok(Submission::Queued(view))
    }

    /// Submit a subtitle fetch. Shares the download rate class.
    pub async fn submit_subtitles(
        &self,
        caller: &Caller,
        url: &str,
        lang: Option<String>,
    ) -> Result<Submission, SubmitError> {
        let url = validate_source_url(url).map_err(SubmitError::Validation)?;
        self.check_rate(caller, EndpointClass::Download).await?;

        let job = Job::new(
            JobKind::Subtitles,
            caller.key.clone(),
            caller.tier,
            url.clone(),
            self.config.retention,
        );
        let view = job.view(false);
        let id = job.id.clone();
        self.admit(job, caller).await?;
        metrics::counter!("vget_jobs_submitted_total", &[("kind", "subtitles")]).increment(1);

        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let history = Arc::clone(&self.history);
        let tasks = Arc::clone(&self.tasks);
        let spec = SubtitleSpec {
            url,
            lang,
            dest_dir: self.config.artifact_dir.clone(),
            file_stem: id.as_str().to_string(),
        };
        let task_id = id.clone();

        let mut task_map = self.tasks.write().await;
        let handle = tokio::spawn(async move {
            run_subtitles(&store, extractor.as_ref(), history.as_ref(), &task_id, spec).await;
            tasks.write().await.remove(&task_id);
        });
        task_map.insert(id, handle);
        drop(task_map);

        Ok(Submission::Queued(view))
    }

    /// Poll a job owned by `caller`. Foreign or expired jobs read as missing.
    pub async fn status(&self, id: &JobId, caller: &Caller) -> Option<JobView> {
        self.store
            .get_owned(id, &caller.key)
            .await
            .map(|job| job.view(false))
    }

    /// The on-disk artifact of a completed job owned by `caller`.
    pub async fn artifact(&self, id: &JobId, caller: &Caller) -> Option<(PathBuf, String)> {
        let job = self.store.get_owned(id, &caller.key).await?;
        match job.output {
            Some(JobOutput::Artifact { path, content_type }) => Some((path, content_type)),
            _ => None,
        }
    }

    /// Cancel an in-flight job: abort the task and mark the record failed.
    pub async fn cancel(&self, id: &JobId, caller: &Caller) -> Result<JobView, CancelError> {
        self.store
            .get_owned(id, &caller.key)
            .await
            .ok_or(CancelError::NotFound)?;

        let error = JobError::new(ErrorKind::Cancelled, "cancelled by requester");
        match self.store.apply(id, JobUpdate::Failed(error)).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { .. }) => return Err(CancelError::AlreadyTerminal),
            Err(StoreError::NotFound) => return Err(CancelError::NotFound),
        }

        if let Some(handle) = self.tasks.write().await.remove(id) {
            handle.abort();
        }
        info!(job_id = %id, "Job cancelled");
        metrics::counter!("vget_jobs_cancelled_total").increment(1);

        let job = self.store.get(id).await.ok_or(CancelError::NotFound)?;
        Ok(job.view(false))
    }

    async fn check_rate(&self, caller: &Caller, class: EndpointClass) -> Result<(), SubmitError> {
        let decision = self.limiter.check(&caller.key, caller.tier, class).await;
        if decision.allowed {
            return Ok(());
        }
        Err(SubmitError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(Duration::from_secs(1)),
        })
    }

    /// Insert the pending record unless the caller is at their concurrency
    /// ceiling. Count and insert are a single store operation, so racing
    /// submits from one requester cannot overshoot.
    async fn admit(&self, job: Job, caller: &Caller) -> Result<(), SubmitError> {
        let ceiling = caller.tier.limits().max_concurrent_jobs;
        if self.store.insert_if_below(job, ceiling).await {
            return Ok(());
        }
        Err(SubmitError::TierRestricted(format!(
            "the {} tier allows {} concurrent job(s); wait for one to finish",
            caller.tier, ceiling
        )))
    }

    /// Enforce the tier's resolution ceiling on a download request.
    ///
    /// The client-supplied quality label is only trusted to reject early.
    /// Admission for a ceiling-bearing tier requires the format's probed
    /// resolution, so omitting or mislabeling the quality cannot raise the
    /// ceiling. Audio-only and rank-less formats pass every tier.
    async fn check_format_entitlement(
        &self,
        caller: &Caller,
        url: &str,
        format_id: &str,
        quality: Option<&str>,
    ) -> Result<(), SubmitError> {
        let Some(ceiling) = caller.tier.limits().max_resolution else {
            return Ok(());
        };

        if let Some(rank) = quality.and_then(ResolutionRank::from_label) {
            if rank > ceiling {
                return Err(SubmitError::TierRestricted(format!(
                    "the {} tier is limited to {}; {} requires an upgrade",
                    caller.tier,
                    ceiling.as_label(),
                    rank.as_label()
                )));
            }
        }

        let info = self.media_info(caller, url).await?;
        let Some(format) = info.format(format_id) else {
            return Err(SubmitError::Validation(format!(
                "unknown format id: {format_id}"
            )));
        };
        if !caller.tier.allows_format(format) {
            return Err(SubmitError::TierRestricted(format!(
                "the {} tier is limited to {}; format {} exceeds it",
                caller.tier,
                ceiling.as_label(),
                format_id
            )));
        }
        Ok(())
    }

    /// Media info for the caller's tier, probing and caching on a miss.
    async fn media_info(&self, caller: &Caller, url: &str) -> Result<MediaInfo, SubmitError> {
        let cache_key = format!("info:{}:{}", url, caller.tier);
        if let Some(info) = self.info_cache.get(&cache_key).await {
            return Ok(info);
        }
        match self.extractor.probe(url).await {
            Ok(info) => {
                self.info_cache
                    .insert(cache_key, info.clone(), self.config.info_cache_ttl)
                    .await;
                Ok(info)
            }
            Err(e) => Err(SubmitError::Validation(format!(
                "could not verify the requested format: {e}"
            ))),
        }
    }

    /// Synthetic completed view for a cache hit. The id only labels the
    /// response; no record backs it, so it is not pollable afterwards.
    fn cached_info_view(&self, info: MediaInfo) -> JobView {
        let now = chrono::Utc::now();
        JobView {
            job_id: JobId::for_kind(JobKind::Info),
            kind: JobKind::Info,
            status: vget_models::JobState::Completed,
            progress: 100,
            error: None,
            info: Some(info),
            artifact_name: None,
            cache_hit: true,
            created_at: now,
            updated_at: now,
        }
    }
}

async fn run_info(
    store: &JobStore,
    extractor: &dyn MediaExtractor,
    id: &JobId,
    url: &str,
    cache: TtlCache<MediaInfo>,
    cache_key: String,
    cache_ttl: Duration,
) {
    if apply_or_log(store, id, JobUpdate::Started).await.is_err() {
        return;
    }

    match extractor.probe(url).await {
        Ok(info) => {
            cache.insert(cache_key, info.clone(), cache_ttl).await;
            let applied =
                apply_or_log(store, id, JobUpdate::Completed(JobOutput::Info { info })).await;
            if applied.is_ok() {
                metrics::counter!("vget_jobs_completed_total", &[("kind", "info")]).increment(1);
            }
        }
        Err(e) => {
            fail_job(store, id, JobError::new(e.kind(), e.to_string())).await;
        }
    }
}

async fn run_download(
    store: &JobStore,
    extractor: &dyn MediaExtractor,
    history: &dyn HistoryRecorder,
    id: &JobId,
    spec: DownloadSpec,
) {
    if apply_or_log(store, id, JobUpdate::Started).await.is_err() {
        return;
    }
    if let Err(e) = tokio::fs::create_dir_all(&spec.dest_dir).await {
        fail_job(
            store,
            id,
            JobError::new(ErrorKind::Internal, format!("artifact dir unavailable: {e}")),
        )
        .await;
        return;
    }

    // Forward extractor progress into the store as it arrives. Stale or
    // post-terminal updates are the store's problem, not ours.
    let (tx, mut rx) = progress_channel();
    let forwarder = {
        let store_jobs = store.clone();
        let id = id.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let _ = store_jobs.apply(&id, JobUpdate::Progress(update.percent)).await;
            }
        })
    };

    let result = extractor.download(spec, tx).await;
    let _ = forwarder.await;

    match result {
        Ok(artifact) => {
            let applied = apply_or_log(
                store,
                id,
                JobUpdate::Completed(JobOutput::Artifact {
                    path: artifact.path,
                    content_type: artifact.content_type,
                }),
            )
            .await;
            if applied.is_ok() {
                metrics::counter!("vget_jobs_completed_total", &[("kind", "download")])
                    .increment(1);
                if let Some(job) = store.get(id).await {
                    history.record_completed(&job).await;
                }
            }
        }
        Err(e) => {
            fail_job(store, id, JobError::new(e.kind(), e.to_string())).await;
        }
    }
}

async fn run_subtitles(
    store: &JobStore,
    extractor: &dyn MediaExtractor,
    history: &dyn HistoryRecorder,
    id: &JobId,
    spec: SubtitleSpec,
) {
    if apply_or_log(store, id, JobUpdate::Started).await.is_err() {
        return;
    }
    if let Err(e) = tokio::fs::create_dir_all(&spec.dest_dir).await {
        fail_job(
            store,
            id,
            JobError::new(ErrorKind::Internal, format!("artifact dir unavailable: {e}")),
        )
        .await;
        return;
    }

    match extractor.fetch_subtitles(spec).await {
        Ok(artifact) => {
            let applied = apply_or_log(
                store,
                id,
                JobUpdate::Completed(JobOutput::Artifact {
                    path: artifact.path,
                    content_type: artifact.content_type,
                }),
            )
            .await;
            if applied.is_ok() {
                metrics::counter!("vget_jobs_completed_total", &[("kind", "subtitles")])
                    .increment(1);
                if let Some(job) = store.get(id).await {
                    history.record_completed(&job).await;
                }
            }
        }
        Err(e) => {
            fail_job(store, id, JobError::new(e.kind(), e.to_string())).await;
        }
    }
}

async fn apply_or_log(store: &JobStore, id: &JobId, update: JobUpdate) -> Result<(), StoreError> {
    match store.apply(id, update).await {
        Ok(_) => Ok(()),
        Err(e) => {
            // Expected when a cancel or the watchdog won the race.
            debug!(job_id = %id, "Update not applied: {e}");
            Err(e)
        }
    }
}

async fn fail_job(store: &JobStore, id: &JobId, error: JobError) {
    warn!(job_id = %id, kind = error.kind.as_str(), "Job failed: {}", error.message);
    metrics::counter!(
        "vget_jobs_failed_total",
        &[("kind", error.kind.as_str().to_string())]
    )
    .increment(1);
    let _ = apply_or_log(store, id, JobUpdate::Failed(error)).await;
}
