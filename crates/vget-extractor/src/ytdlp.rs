//! yt-dlp backed extractor.
//!
//! Shells out to the yt-dlp binary: `-J` for probing, `--newline` progress
//! parsing for downloads. stderr is classified into the stable failure
//! families on non-zero exit.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use vget_models::{FormatInfo, MediaInfo, ResolutionRank, SubtitleTrack};

use crate::error::{classify_stderr, ExtractorError, ExtractorResult};
use crate::progress::{parse_progress_line, ProgressSender};
use crate::{content_type_for, Artifact, DownloadSpec, MediaExtractor, SubtitleSpec};

/// Sites the deployment advertises. yt-dlp handles far more; this is the
/// curated public list.
const SUPPORTED_SITES: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "tiktok.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "twitch.tv",
    "streamable.com",
    "soundcloud.com",
];

/// Extractor backed by the yt-dlp executable.
pub struct YtDlpExtractor {
    binary: PathBuf,
}

impl YtDlpExtractor {
    /// Use a specific binary path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate yt-dlp on PATH.
    pub fn detect() -> ExtractorResult<Self> {
        let binary = which::which("yt-dlp")
            .map_err(|e| ExtractorError::ToolUnavailable(format!("yt-dlp not found: {e}")))?;
        info!(binary = %binary.display(), "Using yt-dlp");
        Ok(Self { binary })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-warnings")
            .arg("--no-playlist")
            .kill_on_drop(true)
            .stdin(Stdio::null());
        cmd
    }

    /// Find the file the tool wrote for `stem` inside `dir`.
    async fn find_artifact(dir: &Path, stem: &str) -> ExtractorResult<PathBuf> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(stem))
                .unwrap_or(false);
            if matches && path.is_file() {
                return Ok(path);
            }
        }
        Err(ExtractorError::Other(format!(
            "extractor exited successfully but produced no file for {stem}"
        )))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn probe(&self, url: &str) -> ExtractorResult<MediaInfo> {
        debug!(url, "Probing media info");
        let output = self.base_command().arg("-J").arg(url).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractorError::Other(format!("unparseable probe output: {e}")))?;
        Ok(parse_media_info(&value))
    }

    async fn download(
        &self,
        spec: DownloadSpec,
        progress: ProgressSender,
    ) -> ExtractorResult<Artifact> {
        let template = spec.dest_dir.join(format!("{}.%(ext)s", spec.file_stem));
        debug!(url = %spec.url, format = %spec.format_id, "Starting download");

        let mut child = self
            .base_command()
            .arg("-f")
            .arg(&spec.format_id)
            .arg("--newline")
            .arg("-o")
            .arg(&template)
            .arg(&spec.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Forward progress lines as they arrive; stderr is drained
        // concurrently so the child never blocks on a full pipe.
        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");

        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = parse_progress_line(&line) {
                    // A closed receiver just means the job was cancelled.
                    if progress.send(update).await.is_err() {
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let status = child.wait().await?;
        let _ = progress_task.await;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            warn!(url = %spec.url, "yt-dlp download failed");
            return Err(classify_stderr(&stderr));
        }

        let path = Self::find_artifact(&spec.dest_dir, &spec.file_stem).await?;
        let content_type = content_type_for(&path).to_string();
        info!(path = %path.display(), "Download complete");
        Ok(Artifact { path, content_type })
    }

    async fn fetch_subtitles(&self, spec: SubtitleSpec) -> ExtractorResult<Artifact> {
        let template = spec.dest_dir.join(format!("{}.%(ext)s", spec.file_stem));
        let lang = spec.lang.as_deref().unwrap_or("en");

        let output = self
            .base_command()
            .arg("--skip-download")
            .arg("--write-subs")
            .arg("--write-auto-subs")
            .arg("--sub-langs")
            .arg(lang)
            .arg("-o")
            .arg(&template)
            .arg(&spec.url)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr));
        }

        let path = Self::find_artifact(&spec.dest_dir, &spec.file_stem).await?;
        let content_type = content_type_for(&path).to_string();
        Ok(Artifact { path, content_type })
    }

    fn supported_sites(&self) -> Vec<String> {
        SUPPORTED_SITES.iter().map(|s| s.to_string()).collect()
    }
}

/// Map yt-dlp's `-J` output onto [`MediaInfo`].
fn parse_media_info(value: &serde_json::Value) -> MediaInfo {
    let formats = value["formats"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(parse_format)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let subtitles = value["subtitles"]
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(lang, tracks)| SubtitleTrack {
                    lang: lang.clone(),
                    name: tracks[0]["name"].as_str().map(String::from),
                    auto_generated: false,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    MediaInfo {
        title: value["title"].as_str().unwrap_or("untitled").to_string(),
        webpage_url: value["webpage_url"]
            .as_str()
            .or_else(|| value["original_url"].as_str())
            .unwrap_or_default()
            .to_string(),
        uploader: value["uploader"].as_str().map(String::from),
        duration_secs: value["duration"].as_f64(),
        thumbnail: value["thumbnail"].as_str().map(String::from),
        formats,
        subtitles,
    }
}

fn parse_format(value: &serde_json::Value) -> Option<FormatInfo> {
    let format_id = value["format_id"].as_str()?.to_string();
    let ext = value["ext"].as_str().unwrap_or("mp4").to_string();
    let height = value["height"].as_u64().map(|h| h as u32);
    let audio_only = value["vcodec"].as_str() == Some("none");

    let resolution = if audio_only {
        None
    } else {
        height.and_then(ResolutionRank::from_height)
    };

    let label = match (audio_only, resolution) {
        (true, _) => "audio".to_string(),
        (false, Some(rank)) => rank.as_label().to_string(),
        (false, None) => value["format_note"].as_str().unwrap_or("unknown").to_string(),
    };

    Some(FormatInfo {
        format_id,
        label,
        resolution,
        ext,
        filesize: value["filesize"]
            .as_u64()
            .or_else(|| value["filesize_approx"].as_u64()),
        audio_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let value = serde_json::json!({
            "title": "Test Video",
            "webpage_url": "https://youtube.com/watch?v=abc",
            "uploader": "someone",
            "duration": 212.5,
            "formats": [
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a"},
                {"format_id": "22", "ext": "mp4", "height": 720, "vcodec": "avc1", "filesize": 1000},
                {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1"},
            ],
            "subtitles": {"en": [{"name": "English", "ext": "vtt"}]},
        });

        let info = parse_media_info(&value);
        assert_eq!(info.title, "Test Video");
        assert_eq!(info.formats.len(), 3);
        assert!(info.formats[0].audio_only);
        assert_eq!(info.formats[1].resolution, Some(ResolutionRank::P720));
        assert_eq!(info.formats[2].resolution, Some(ResolutionRank::P1080));
        assert_eq!(info.subtitles[0].lang, "en");
    }

    #[test]
    fn test_parse_format_skips_entries_without_id() {
        assert!(parse_format(&serde_json::json!({"ext": "mp4"})).is_none());
    }

    #[test]
    fn test_supported_sites_nonempty() {
        let extractor = YtDlpExtractor::new("/usr/bin/yt-dlp");
        let sites = extractor.supported_sites();
        assert!(sites.iter().any(|s| s == "youtube.com"));
    }
}
