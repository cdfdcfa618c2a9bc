//! End-to-end orchestration through a scripted extractor.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vget_extractor::testing::{sample_info, ScriptStep, ScriptedExtractor};
use vget_extractor::ExtractorError;
use vget_jobs::store::StoreConfig;
use vget_jobs::{
    Caller, CancelError, DownloadRequest, JobStore, LogHistory, Orchestrator, OrchestratorConfig,
    Submission, SubmitError,
};
use vget_limiter::RateLimiter;
use vget_models::{ErrorKind, JobState, JobView, Tier};

const URL: &str = "https://youtube.com/watch?v=abc123xyz";

struct Harness {
    orchestrator: Orchestrator,
    extractor: Arc<ScriptedExtractor>,
    _artifacts: TempDir,
}

fn harness(extractor: ScriptedExtractor) -> Harness {
    let artifacts = TempDir::new().unwrap();
    let extractor = Arc::new(extractor);
    let config = OrchestratorConfig {
        artifact_dir: artifacts.path().to_path_buf(),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(
        Arc::new(JobStore::new(StoreConfig::default())),
        Arc::new(RateLimiter::new()),
        Arc::clone(&extractor) as Arc<dyn vget_extractor::MediaExtractor>,
        Arc::new(LogHistory),
        config,
    );
    Harness {
        orchestrator,
        extractor,
        _artifacts: artifacts,
    }
}

fn queued(submission: Submission) -> JobView {
    match submission {
        Submission::Queued(view) => view,
        Submission::Cached(_) => panic!("expected a queued job"),
    }
}

/// Poll a job until `predicate` holds or five seconds pass.
async fn wait_for(
    orchestrator: &Orchestrator,
    caller: &Caller,
    view: &JobView,
    predicate: impl Fn(&JobView) -> bool,
) -> JobView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(current) = orchestrator.status(&view.job_id, caller).await {
                if predicate(&current) {
                    return current;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never reached the expected state")
}

#[tokio::test]
async fn test_info_job_completes_and_populates_cache() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("user-1", Tier::Free);

    let view = queued(h.orchestrator.submit_info(&caller, URL).await.unwrap());
    assert_eq!(view.status, JobState::Pending);
    assert!(!view.cache_hit);

    let done = wait_for(&h.orchestrator, &caller, &view, |v| v.status.is_terminal()).await;
    assert_eq!(done.status, JobState::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.info.unwrap().title, "Sample");
}

#[tokio::test]
async fn test_second_info_request_is_served_from_cache() {
    let extractor = ScriptedExtractor::new();
    extractor.push_probe(Ok(sample_info(URL))).await;
    // A second probe would fail; the cache must prevent it from happening.
    extractor
        .push_probe(Err(ExtractorError::Network("source went down".to_string())))
        .await;
    let h = harness(extractor);
    let caller = Caller::new("user-1", Tier::Free);

    let first = queued(h.orchestrator.submit_info(&caller, URL).await.unwrap());
    wait_for(&h.orchestrator, &caller, &first, |v| v.status.is_terminal()).await;

    match h.orchestrator.submit_info(&caller, URL).await.unwrap() {
        Submission::Cached(view) => {
            assert_eq!(view.status, JobState::Completed);
            assert!(view.cache_hit);
            // The synthetic view is terminal in-band only; its id is not
            // backed by a record and cannot be polled.
            assert!(h.orchestrator.status(&view.job_id, &caller).await.is_none());
            assert_eq!(view.info.unwrap().title, "Sample");
        }
        Submission::Queued(_) => panic!("expected a cache hit"),
    }
    assert_eq!(h.extractor.probe_calls(), 1);
}

#[tokio::test]
async fn test_info_cache_is_tier_scoped() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let free = Caller::new("user-1", Tier::Free);
    let pro = Caller::new("user-2", Tier::Pro);

    let view = queued(h.orchestrator.submit_info(&free, URL).await.unwrap());
    wait_for(&h.orchestrator, &free, &view, |v| v.status.is_terminal()).await;

    // A different tier misses and probes again.
    let view = queued(h.orchestrator.submit_info(&pro, URL).await.unwrap());
    wait_for(&h.orchestrator, &pro, &view, |v| v.status.is_terminal()).await;
    assert_eq!(h.extractor.probe_calls(), 2);
}

#[tokio::test]
async fn test_download_reports_monotonic_progress_and_artifact() {
    let extractor = ScriptedExtractor::new().gated();
    extractor
        .push_download(vec![
            ScriptStep::Progress(10),
            ScriptStep::Progress(50),
            ScriptStep::Finish,
        ])
        .await;
    let h = harness(extractor);
    let caller = Caller::new("user-1", Tier::Pro);

    let view = queued(
        h.orchestrator
            .submit_download(
                &caller,
                DownloadRequest {
                    url: URL.to_string(),
                    format_id: "137".to_string(),
                    quality: Some("1080p".to_string()),
                },
            )
            .await
            .unwrap(),
    );

    h.extractor.release(1);
    let at_10 = wait_for(&h.orchestrator, &caller, &view, |v| v.progress >= 10).await;
    assert_eq!(at_10.status, JobState::Processing);

    h.extractor.release(1);
    let at_50 = wait_for(&h.orchestrator, &caller, &view, |v| v.progress >= 50).await;
    assert_eq!(at_50.status, JobState::Processing);

    h.extractor.release(1);
    let done = wait_for(&h.orchestrator, &caller, &view, |v| v.status.is_terminal()).await;
    assert_eq!(done.status, JobState::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.artifact_name.is_some());

    let (path, content_type) = h.orchestrator.artifact(&view.job_id, &caller).await.unwrap();
    assert!(path.exists());
    assert_eq!(content_type, "video/mp4");
}

#[tokio::test]
async fn test_failed_download_carries_classified_error() {
    let extractor = ScriptedExtractor::new().with_probe_fallback(sample_info(URL));
    extractor
        .push_download(vec![
            ScriptStep::Progress(30),
            ScriptStep::Fail(ExtractorError::SourceUnavailable("removed".to_string())),
        ])
        .await;
    let h = harness(extractor);
    let caller = Caller::new("user-1", Tier::Free);

    let view = queued(
        h.orchestrator
            .submit_download(
                &caller,
                DownloadRequest {
                    url: URL.to_string(),
                    format_id: "22".to_string(),
                    quality: None,
                },
            )
            .await
            .unwrap(),
    );

    let done = wait_for(&h.orchestrator, &caller, &view, |v| v.status.is_terminal()).await;
    assert_eq!(done.status, JobState::Failed);
    assert_eq!(done.error.unwrap().kind, ErrorKind::SourceUnavailable);
    assert!(h.orchestrator.artifact(&view.job_id, &caller).await.is_none());

    // The terminal state is stable: repeated reads see the same view and
    // the record's sequence number stops moving.
    let first = h.orchestrator.status(&view.job_id, &caller).await.unwrap();
    let second = h.orchestrator.status(&view.job_id, &caller).await.unwrap();
    assert_eq!(first.status, JobState::Failed);
    assert_eq!(second.status, JobState::Failed);
    assert_eq!(first.progress, second.progress);
    assert_eq!(
        first.error.unwrap().kind,
        second.error.unwrap().kind
    );
    let seq_a = h.orchestrator.store().get(&view.job_id).await.unwrap().update_seq;
    let seq_b = h.orchestrator.store().get(&view.job_id).await.unwrap().update_seq;
    assert_eq!(seq_a, seq_b);
}

#[tokio::test]
async fn test_anonymous_tier_cannot_request_1080p() {
    let h = harness(ScriptedExtractor::new());
    let caller = Caller::new("session-1", Tier::Anonymous);

    let err = h
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: URL.to_string(),
                format_id: "137".to_string(),
                quality: Some("1080p".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::TierRestricted(_)));
    assert_eq!(err.kind(), ErrorKind::TierRestricted);
    // Nothing was enqueued.
    assert_eq!(h.extractor.download_calls(), 0);
}

#[tokio::test]
async fn test_audio_quality_passes_every_tier_gate() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("session-1", Tier::Anonymous);

    let submission = h
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: URL.to_string(),
                format_id: "140".to_string(),
                quality: Some("audio".to_string()),
            },
        )
        .await;
    assert!(submission.is_ok());
}

#[tokio::test]
async fn test_invalid_url_is_rejected_before_any_job_exists() {
    let h = harness(ScriptedExtractor::new());
    let caller = Caller::new("user-1", Tier::Free);

    for url in ["not a url", "ftp://example.com/x", "http://127.0.0.1/x"] {
        let err = h.orchestrator.submit_info(&caller, url).await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)), "{url}");
    }
    assert!(h.orchestrator.store().is_empty().await);
}

#[tokio::test]
async fn test_omitted_quality_still_hits_the_tier_ceiling() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("session-1", Tier::Anonymous);

    // No quality label; the format's probed resolution (4K) decides.
    let err = h
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: URL.to_string(),
                format_id: "313".to_string(),
                quality: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::TierRestricted(_)));
    assert_eq!(h.extractor.download_calls(), 0);
    assert!(h.orchestrator.store().is_empty().await);
}

#[tokio::test]
async fn test_mislabeled_quality_cannot_raise_the_ceiling() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("session-1", Tier::Anonymous);

    // The label claims 480p but format 137 is 1080p.
    let err = h
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: URL.to_string(),
                format_id: "137".to_string(),
                quality: Some("480p".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::TierRestricted(_)));
    assert_eq!(h.extractor.download_calls(), 0);
}

#[tokio::test]
async fn test_unknown_format_id_is_rejected_for_gated_tiers() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("user-1", Tier::Free);

    let err = h
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: URL.to_string(),
                format_id: "no-such-format".to_string(),
                quality: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Validation(_)));
}

#[tokio::test]
async fn test_concurrency_ceiling_blocks_second_anonymous_job() {
    // Gated with no release: the first download never finishes.
    let h = harness(
        ScriptedExtractor::new()
            .with_probe_fallback(sample_info(URL))
            .gated(),
    );
    let caller = Caller::new("session-1", Tier::Anonymous);

    let request = DownloadRequest {
        url: URL.to_string(),
        format_id: "22".to_string(),
        quality: Some("720p".to_string()),
    };
    h.orchestrator
        .submit_download(&caller, request.clone())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .submit_download(&caller, request)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::TierRestricted(_)));
}

#[tokio::test]
async fn test_rate_limit_applies_even_to_cache_hits() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let caller = Caller::new("user-1", Tier::Free);

    let view = queued(h.orchestrator.submit_info(&caller, URL).await.unwrap());
    wait_for(&h.orchestrator, &caller, &view, |v| v.status.is_terminal()).await;

    // Burn through the video-info budget with cached responses.
    let mut limited = None;
    for _ in 0..100 {
        match h.orchestrator.submit_info(&caller, URL).await {
            Ok(_) => {}
            Err(e) => {
                limited = Some(e);
                break;
            }
        }
    }
    let err = limited.expect("limit never reached");
    assert!(matches!(err, SubmitError::RateLimited { .. }));
    if let SubmitError::RateLimited { retry_after } = err {
        assert!(retry_after > Duration::ZERO);
    }
}

#[tokio::test]
async fn test_cancel_aborts_an_in_flight_download() {
    let h = harness(
        ScriptedExtractor::new()
            .with_probe_fallback(sample_info(URL))
            .gated(),
    );
    let caller = Caller::new("user-1", Tier::Free);

    let view = queued(
        h.orchestrator
            .submit_download(
                &caller,
                DownloadRequest {
                    url: URL.to_string(),
                    format_id: "22".to_string(),
                    quality: None,
                },
            )
            .await
            .unwrap(),
    );

    let cancelled = h.orchestrator.cancel(&view.job_id, &caller).await.unwrap();
    assert_eq!(cancelled.status, JobState::Failed);
    assert_eq!(cancelled.error.unwrap().kind, ErrorKind::Cancelled);

    // Cancelling again reports the terminal state.
    assert_eq!(
        h.orchestrator.cancel(&view.job_id, &caller).await,
        Err(CancelError::AlreadyTerminal)
    );
}

#[tokio::test]
async fn test_foreign_jobs_read_as_missing() {
    let h = harness(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));
    let owner = Caller::new("user-1", Tier::Free);
    let stranger = Caller::new("user-2", Tier::Free);

    let view = queued(h.orchestrator.submit_info(&owner, URL).await.unwrap());

    assert!(h.orchestrator.status(&view.job_id, &stranger).await.is_none());
    assert!(h.orchestrator.artifact(&view.job_id, &stranger).await.is_none());
    assert_eq!(
        h.orchestrator.cancel(&view.job_id, &stranger).await,
        Err(CancelError::NotFound)
    );
    assert!(h.orchestrator.status(&view.job_id, &owner).await.is_some());
}

#[tokio::test]
async fn test_subtitle_jobs_get_their_own_namespace() {
    let h = harness(ScriptedExtractor::new());
    let caller = Caller::new("user-1", Tier::Free);

    let view = queued(
        h.orchestrator
            .submit_subtitles(&caller, URL, Some("en".to_string()))
            .await
            .unwrap(),
    );
    assert!(view.job_id.is_subtitle());

    let done = wait_for(&h.orchestrator, &caller, &view, |v| v.status.is_terminal()).await;
    assert_eq!(done.status, JobState::Completed);
    let name = done.artifact_name.unwrap();
    assert!(name.ends_with(".en.vtt"), "{name}");
}
