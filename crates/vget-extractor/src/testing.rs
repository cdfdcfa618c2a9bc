//! Scripted extractor double for tests.
//!
//! Probe results are consumed from a queue, download runs follow a step
//! script, and an optional gate lets a test hold a download between steps
//! so pollers can observe each intermediate state deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use vget_models::{FormatInfo, MediaInfo};

use crate::error::{ExtractorError, ExtractorResult};
use crate::progress::{ProgressSender, ProgressUpdate};
use crate::{Artifact, DownloadSpec, MediaExtractor, SubtitleSpec};

/// One step of a scripted download.
pub enum ScriptStep {
    /// Report progress.
    Progress(u8),
    /// Fail with this error and stop.
    Fail(ExtractorError),
    /// Write the artifact file and return it.
    Finish,
}

/// Extractor double driven by queues of scripted results.
pub struct ScriptedExtractor {
    probe_results: Mutex<VecDeque<ExtractorResult<MediaInfo>>>,
    probe_fallback: Option<MediaInfo>,
    download_scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    gate: Option<Arc<Semaphore>>,
    probe_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl ScriptedExtractor {
    /// No scripted results; probes fail as unscripted.
    pub fn new() -> Self {
        Self {
            probe_results: Mutex::new(VecDeque::new()),
            probe_fallback: None,
            download_scripts: Mutex::new(VecDeque::new()),
            gate: None,
            probe_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    /// Probes succeed with `info` once scripted results run out.
    pub fn with_probe_fallback(mut self, info: MediaInfo) -> Self {
        self.probe_fallback = Some(info);
        self
    }

    /// Queue one probe result.
    pub async fn push_probe(&self, result: ExtractorResult<MediaInfo>) {
        self.probe_results.lock().await.push_back(result);
    }

    /// Queue one download script.
    pub async fn push_download(&self, steps: Vec<ScriptStep>) {
        self.download_scripts.lock().await.push_back(steps);
    }

    /// Gate download steps: each step waits for one [`Self::release`] permit.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Allow `n` gated steps to proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate never closed");
            permit.forget();
        }
    }
}

impl Default for ScriptedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    async fn probe(&self, _url: &str) -> ExtractorResult<MediaInfo> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.probe_results.lock().await.pop_front() {
            return result;
        }
        match &self.probe_fallback {
            Some(info) => Ok(info.clone()),
            None => Err(ExtractorError::Other("unscripted probe".to_string())),
        }
    }

    async fn download(
        &self,
        spec: DownloadSpec,
        progress: ProgressSender,
    ) -> ExtractorResult<Artifact> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .download_scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| vec![ScriptStep::Finish]);

        for step in steps {
            self.wait_gate().await;
            match step {
                ScriptStep::Progress(percent) => {
                    let _ = progress.send(ProgressUpdate { percent }).await;
                }
                ScriptStep::Fail(error) => return Err(error),
                ScriptStep::Finish => {
                    let path = spec.dest_dir.join(format!("{}.mp4", spec.file_stem));
                    tokio::fs::write(&path, b"scripted media bytes").await?;
                    return Ok(Artifact {
                        path,
                        content_type: "video/mp4".to_string(),
                    });
                }
            }
        }

        Err(ExtractorError::Other("script ended without finish".to_string()))
    }

    async fn fetch_subtitles(&self, spec: SubtitleSpec) -> ExtractorResult<Artifact> {
        self.wait_gate().await;
        let lang = spec.lang.as_deref().unwrap_or("en");
        let path = spec.dest_dir.join(format!("{}.{}.vtt", spec.file_stem, lang));
        tokio::fs::write(&path, b"WEBVTT\n\n00:00.000 --> 00:01.000\nhello\n").await?;
        Ok(Artifact {
            path,
            content_type: "text/vtt".to_string(),
        })
    }

    fn supported_sites(&self) -> Vec<String> {
        vec!["youtube.com".to_string(), "vimeo.com".to_string()]
    }
}

/// Media info fixture with one format per rank commonly used in tests.
pub fn sample_info(url: &str) -> MediaInfo {
    MediaInfo {
        title: "Sample".to_string(),
        webpage_url: url.to_string(),
        uploader: Some("uploader".to_string()),
        duration_secs: Some(120.0),
        thumbnail: None,
        formats: vec![
            FormatInfo::video("18", "360p", "mp4"),
            FormatInfo::video("22", "720p", "mp4"),
            FormatInfo::video("137", "1080p", "mp4"),
            FormatInfo::video("313", "4K", "webm"),
            FormatInfo::audio("140", "m4a"),
        ],
        subtitles: vec![],
    }
}
