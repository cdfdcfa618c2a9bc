//! Extractor failure classification.

use thiserror::Error;
use vget_models::ErrorKind;

pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// Failure reported by the external extraction tool.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The source rejected, removed, or geo-blocked the content.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// No extractor handles this site.
    #[error("unsupported site: {0}")]
    UnsupportedSite(String),

    /// Transient network failure while talking to the source.
    #[error("network error: {0}")]
    Network(String),

    /// The tool itself is missing or broken.
    #[error("extractor unavailable: {0}")]
    ToolUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything the stderr heuristics could not place.
    #[error("extraction failed: {0}")]
    Other(String),
}

impl ExtractorError {
    /// Map to the stable error-kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractorError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            ExtractorError::UnsupportedSite(_) => ErrorKind::UnsupportedSite,
            ExtractorError::Network(_) => ErrorKind::NetworkError,
            ExtractorError::ToolUnavailable(_) => ErrorKind::Internal,
            ExtractorError::Io(_) | ExtractorError::Other(_) => ErrorKind::Unknown,
        }
    }
}

/// Classify a yt-dlp stderr dump into a failure family.
pub fn classify_stderr(stderr: &str) -> ExtractorError {
    let lower = stderr.to_lowercase();

    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("not available in your country")
        || lower.contains("members-only")
    {
        return ExtractorError::SourceUnavailable(first_error_line(stderr));
    }

    if lower.contains("unsupported url")
        || lower.contains("is not a valid url")
        || lower.contains("no suitable extractor")
    {
        return ExtractorError::UnsupportedSite(first_error_line(stderr));
    }

    if lower.contains("unable to download")
        || lower.contains("timed out")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("http error 5")
    {
        return ExtractorError::Network(first_error_line(stderr));
    }

    ExtractorError::Other(first_error_line(stderr))
}

/// First ERROR line from stderr, or a truncated fallback.
fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| l.contains("ERROR"))
        .unwrap_or_else(|| stderr.lines().next().unwrap_or("extractor failed"))
        .chars()
        .take(300)
        .collect()
}
