//! Resolution ranks and format metadata returned by the extractor.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ordinal ranking of quality labels.
///
/// Ordering is derived from the declaration order, so `P360 < P720 < K4`
/// holds and tier ceilings are plain comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionRank {
    P144,
    P240,
    P360,
    P480,
    P720,
    P1080,
    K4,
    K8,
}

impl ResolutionRank {
    /// Parse a quality label like `720p`, `1080p`, `4K`.
    ///
    /// Returns `None` for audio-only or unrecognized labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "144p" | "144" => Some(Self::P144),
            "240p" | "240" => Some(Self::P240),
            "360p" | "360" => Some(Self::P360),
            "480p" | "480" => Some(Self::P480),
            "720p" | "720" | "hd" => Some(Self::P720),
            "1080p" | "1080" | "fhd" => Some(Self::P1080),
            "4k" | "2160p" | "2160" => Some(Self::K4),
            "8k" | "4320p" | "4320" => Some(Self::K8),
            _ => None,
        }
    }

    /// Derive a rank from a pixel height reported by the extractor.
    pub fn from_height(height: u32) -> Option<Self> {
        match height {
            0 => None,
            h if h <= 144 => Some(Self::P144),
            h if h <= 240 => Some(Self::P240),
            h if h <= 360 => Some(Self::P360),
            h if h <= 480 => Some(Self::P480),
            h if h <= 720 => Some(Self::P720),
            h if h <= 1080 => Some(Self::P1080),
            h if h <= 2160 => Some(Self::K4),
            _ => Some(Self::K8),
        }
    }

    /// Canonical label for this rank.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::P144 => "144p",
            Self::P240 => "240p",
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::K4 => "4K",
            Self::K8 => "8K",
        }
    }
}

impl std::fmt::Display for ResolutionRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// A single downloadable format advertised by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormatInfo {
    /// Extractor-native format identifier.
    pub format_id: String,
    /// Human quality label (`720p`, `audio`, ...).
    pub label: String,
    /// Resolution rank, `None` for audio-only formats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionRank>,
    /// Container extension (`mp4`, `webm`, `m4a`, ...).
    pub ext: String,
    /// Approximate size in bytes, when the source reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    /// True for audio-only formats.
    #[serde(default)]
    pub audio_only: bool,
}

impl FormatInfo {
    /// Build a video format from a label.
    pub fn video(format_id: impl Into<String>, label: &str, ext: impl Into<String>) -> Self {
        Self {
            format_id: format_id.into(),
            label: label.to_string(),
            resolution: ResolutionRank::from_label(label),
            ext: ext.into(),
            filesize: None,
            audio_only: false,
        }
    }

    /// Build an audio-only format.
    pub fn audio(format_id: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            format_id: format_id.into(),
            label: "audio".to_string(),
            resolution: None,
            ext: ext.into(),
            filesize: None,
            audio_only: true,
        }
    }
}

/// A subtitle track advertised by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubtitleTrack {
    /// Language code (`en`, `de`, ...).
    pub lang: String,
    /// Display name, when the source provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// True for auto-generated captions.
    #[serde(default)]
    pub auto_generated: bool,
}

/// Metadata for a single source URL, as probed by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaInfo {
    /// Title reported by the source.
    pub title: String,
    /// Canonical page URL.
    pub webpage_url: String,
    /// Uploader/channel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Thumbnail URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Available formats, best first.
    pub formats: Vec<FormatInfo>,
    /// Available subtitle tracks.
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

impl MediaInfo {
    /// Look up a format by its extractor-native id.
    pub fn format(&self, format_id: &str) -> Option<&FormatInfo> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(ResolutionRank::P360 < ResolutionRank::P720);
        assert!(ResolutionRank::P1080 < ResolutionRank::K4);
        assert!(ResolutionRank::K4 < ResolutionRank::K8);
    }

    #[test]
    fn test_rank_from_label() {
        assert_eq!(ResolutionRank::from_label("720p"), Some(ResolutionRank::P720));
        assert_eq!(ResolutionRank::from_label("4K"), Some(ResolutionRank::K4));
        assert_eq!(ResolutionRank::from_label("2160p"), Some(ResolutionRank::K4));
        assert_eq!(ResolutionRank::from_label("audio"), None);
    }

    #[test]
    fn test_rank_from_height() {
        assert_eq!(ResolutionRank::from_height(720), Some(ResolutionRank::P720));
        assert_eq!(ResolutionRank::from_height(608), Some(ResolutionRank::P720));
        assert_eq!(ResolutionRank::from_height(4320), Some(ResolutionRank::K8));
        assert_eq!(ResolutionRank::from_height(0), None);
    }

    #[test]
    fn test_format_constructors() {
        let f = FormatInfo::video("137", "1080p", "mp4");
        assert_eq!(f.resolution, Some(ResolutionRank::P1080));
        assert!(!f.audio_only);

        let a = FormatInfo::audio("140", "m4a");
        assert_eq!(a.resolution, None);
        assert!(a.audio_only);
    }
}
