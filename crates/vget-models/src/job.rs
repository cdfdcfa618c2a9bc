//! Job records for download orchestration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::format::MediaInfo;
use crate::tier::Tier;

/// Prefix that keeps subtitle job ids disjoint from video job ids.
const SUBTITLE_ID_PREFIX: &str = "sub-";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new id in the namespace of the given kind.
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Subtitles => Self(format!("{}{}", SUBTITLE_ID_PREFIX, Uuid::new_v4())),
            _ => Self(Uuid::new_v4().to_string()),
        }
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to the subtitle namespace.
    pub fn is_subtitle(&self) -> bool {
        self.0.starts_with(SUBTITLE_ID_PREFIX)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Metadata probe; result is cacheable.
    Info,
    /// Produce a media artifact; never cached.
    Download,
    /// Produce a subtitle artifact; separate id namespace.
    Subtitles,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Info => "info",
            JobKind::Download => "download",
            JobKind::Subtitles => "subtitles",
        }
    }
}

/// Job lifecycle state. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet picked up by its task.
    #[default]
    Pending,
    /// Extractor work in flight.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JobOutput {
    /// Metadata payload (info jobs).
    Info { info: MediaInfo },
    /// A file on disk (download and subtitle jobs).
    Artifact {
        path: PathBuf,
        content_type: String,
    },
}

/// A tracked unit of asynchronous work.
///
/// `requester_key` and `tier` are snapshots taken at creation and never
/// change afterwards, even if the account's tier does.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique id, immutable.
    pub id: JobId,
    /// What this job produces.
    pub kind: JobKind,
    /// Account id or anonymous session key of the submitter.
    pub requester_key: String,
    /// Entitlement class at creation time.
    pub tier: Tier,
    /// Source URL, validated before creation.
    pub source_url: String,
    /// Requested format id (download jobs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_format_id: Option<String>,
    /// Requested quality label (download jobs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_quality: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub state: JobState,
    /// Progress 0-100, non-decreasing.
    #[serde(default)]
    pub progress: u8,
    /// Terminal error, present only when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Result, present only when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the record (and any artifact) stops being retrievable.
    pub expires_at: DateTime<Utc>,
    /// Sequence number bumped on every applied update, for ordering.
    #[serde(default)]
    pub update_seq: u64,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        kind: JobKind,
        requester_key: impl Into<String>,
        tier: Tier,
        source_url: impl Into<String>,
        retention: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::for_kind(kind),
            kind,
            requester_key: requester_key.into(),
            tier,
            source_url: source_url.into(),
            requested_format_id: None,
            requested_quality: None,
            state: JobState::Pending,
            progress: 0,
            error: None,
            output: None,
            created_at: now,
            updated_at: now,
            expires_at: now + retention,
            update_seq: 0,
        }
    }

    /// Set the requested format (download jobs).
    pub fn with_format(mut self, format_id: impl Into<String>, quality: Option<String>) -> Self {
        self.requested_format_id = Some(format_id.into());
        self.requested_quality = quality;
        self
    }

    /// Caller-facing snapshot of this job.
    pub fn view(&self, cache_hit: bool) -> JobView {
        let (info, artifact_name) = match &self.output {
            Some(JobOutput::Info { info }) => (Some(info.clone()), None),
            Some(JobOutput::Artifact { path, .. }) => (
                None,
                path.file_name().map(|n| n.to_string_lossy().into_owned()),
            ),
            None => (None, None),
        };
        JobView {
            job_id: self.id.clone(),
            kind: self.kind,
            status: self.state,
            progress: self.progress,
            error: self.error.clone(),
            info,
            artifact_name,
            cache_hit,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What pollers see. Never exposes the requester key or on-disk paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobView {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<MediaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
