//! Stuck-job detection.
//!
//! A processing job whose extractor hangs would otherwise stay visible as
//! in-flight forever and hold a slot against its requester's concurrency
//! ceiling. The watchdog force-fails anything processing longer than the
//! configured maximum.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use vget_models::{ErrorKind, JobError};

use crate::store::{JobStore, JobUpdate};

pub struct Watchdog {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn(store: Arc<JobStore>, max_duration: Duration, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let failed = check_once(&store, max_duration).await;
                        if failed > 0 {
                            info!(failed, "Watchdog failed stuck jobs");
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

/// One detection pass. Returns how many jobs were failed.
pub async fn check_once(store: &JobStore, max_duration: Duration) -> usize {
    let stuck = store.timed_out_jobs(max_duration).await;
    let mut failed = 0;
    for id in stuck {
        warn!(job_id = %id, "Job exceeded maximum processing time");
        let error = JobError::new(
            ErrorKind::Timeout,
            format!(
                "job exceeded the maximum processing time of {}s",
                max_duration.as_secs()
            ),
        );
        // A completion can race the watchdog; losing that race is fine.
        match store.apply(&id, JobUpdate::Failed(error)).await {
            Ok(_) => failed += 1,
            Err(e) => warn!(job_id = %id, "Could not fail stuck job: {e}"),
        }
    }
    failed
}
