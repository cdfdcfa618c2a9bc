//! Media extraction port.
//!
//! The service treats the extraction engine as a black box behind the
//! [`MediaExtractor`] trait: given a URL it returns format metadata, or
//! writes a media/subtitle file and streams progress back over a channel.
//! The production backend shells out to yt-dlp; tests use
//! [`testing::ScriptedExtractor`].

pub mod error;
pub mod progress;
pub mod testing;
pub mod ytdlp;

pub use error::{classify_stderr, ExtractorError, ExtractorResult};
pub use progress::{parse_progress_line, progress_channel, ProgressSender, ProgressUpdate};
pub use ytdlp::YtDlpExtractor;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vget_models::MediaInfo;

/// A file the extractor produced.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub content_type: String,
}

/// One download request handed to the extractor.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    /// Validated source URL.
    pub url: String,
    /// Extractor-native format id.
    pub format_id: String,
    /// Directory to write into; the file name is up to the extractor.
    pub dest_dir: PathBuf,
    /// File stem the artifact must use, so callers can find it.
    pub file_stem: String,
}

/// Subtitle fetch request.
#[derive(Debug, Clone)]
pub struct SubtitleSpec {
    pub url: String,
    /// Language code; `None` means the source default.
    pub lang: Option<String>,
    pub dest_dir: PathBuf,
    pub file_stem: String,
}

/// The external extraction engine.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Inspect a URL and return format metadata without downloading.
    async fn probe(&self, url: &str) -> ExtractorResult<MediaInfo>;

    /// Download one format, reporting progress over `progress`.
    async fn download(
        &self,
        spec: DownloadSpec,
        progress: ProgressSender,
    ) -> ExtractorResult<Artifact>;

    /// Fetch a subtitle track as a file.
    async fn fetch_subtitles(&self, spec: SubtitleSpec) -> ExtractorResult<Artifact>;

    /// Sites this extractor supports, for the public sites listing.
    fn supported_sites(&self) -> Vec<String>;
}

/// Content type for a produced file, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("opus") | Some("ogg") => "audio/ogg",
        Some("vtt") => "text/vtt",
        Some("srt") => "application/x-subrip",
        _ => "application/octet-stream",
    }
}
