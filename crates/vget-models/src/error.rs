//! Stable error kinds shared across the service boundary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Machine-readable error classification.
///
/// The string form of each kind is part of the API contract; clients match
/// on it, so variants are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed URL or format in the request.
    Validation,
    /// Too many requests for the caller's window.
    RateLimited,
    /// Requested quality/format above the caller's tier ceiling.
    TierRestricted,
    /// Unknown job id, or a job owned by another caller.
    NotFound,
    /// Artifact requested before the job completed.
    NotReady,
    /// The source rejected or removed the content.
    SourceUnavailable,
    /// The extractor does not support this site.
    UnsupportedSite,
    /// Transient network failure while extracting.
    NetworkError,
    /// Unclassified extractor failure.
    Unknown,
    /// Job exceeded the maximum processing duration.
    Timeout,
    /// Job cancelled by the caller.
    Cancelled,
    /// Store or service failure; details are logged, not surfaced.
    Internal,
}

impl ErrorKind {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TierRestricted => "tier_restricted",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::UnsupportedSite => "unsupported_site",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// True for the extractor-failure family.
    pub fn is_extractor_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::SourceUnavailable
                | ErrorKind::UnsupportedSite
                | ErrorKind::NetworkError
                | ErrorKind::Unknown
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(ErrorKind::RateLimited.as_str(), "rate_limited");
        assert_eq!(ErrorKind::TierRestricted.as_str(), "tier_restricted");
        assert_eq!(ErrorKind::SourceUnavailable.as_str(), "source_unavailable");
        assert_eq!(ErrorKind::NotReady.as_str(), "not_ready");
    }

    #[test]
    fn test_extractor_failure_family() {
        assert!(ErrorKind::UnsupportedSite.is_extractor_failure());
        assert!(ErrorKind::NetworkError.is_extractor_failure());
        assert!(!ErrorKind::Timeout.is_extractor_failure());
        assert!(!ErrorKind::Cancelled.is_extractor_failure());
    }

    #[test]
    fn test_serde_uses_stable_strings() {
        let json = serde_json::to_string(&ErrorKind::TierRestricted).unwrap();
        assert_eq!(json, "\"tier_restricted\"");
    }
}
