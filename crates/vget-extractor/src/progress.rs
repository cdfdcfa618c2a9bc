//! Progress signal forwarded from the extractor into the job store.

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;

/// A single progress report, 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
}

/// Sending half handed to the extractor for one job.
pub type ProgressSender = mpsc::Sender<ProgressUpdate>;

/// Receiving half consumed by the orchestrator task.
pub type ProgressReceiver = mpsc::Receiver<ProgressUpdate>;

/// Channel capacity; progress is lossy-tolerant, a small buffer suffices.
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Create a progress channel for one job.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::channel(PROGRESS_CHANNEL_CAPACITY)
}

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})(?:\.\d+)?%").expect("valid regex"));

/// Parse a percent out of a yt-dlp `--newline` progress line.
///
/// Lines look like `[download]  42.5% of 10.00MiB at 1.00MiB/s`.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    if !line.contains("[download]") {
        return None;
    }
    let caps = PERCENT_RE.captures(line)?;
    let percent: u8 = caps.get(1)?.as_str().parse().ok()?;
    Some(ProgressUpdate {
        percent: percent.min(100),
    })
}
