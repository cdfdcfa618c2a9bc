//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vget_api::{create_router, ApiConfig, AppState, StaticDirectory};
use vget_extractor::testing::{sample_info, ScriptStep, ScriptedExtractor};
use vget_extractor::ExtractorError;
use vget_models::Tier;

const URL: &str = "https://youtube.com/watch?v=abc123xyz";

fn app(extractor: ScriptedExtractor) -> (Router, Arc<ScriptedExtractor>) {
    let extractor = Arc::new(extractor);
    let mut keys = HashMap::new();
    keys.insert("key-free".to_string(), Tier::Free);
    keys.insert("key-pro".to_string(), Tier::Pro);

    let state = AppState::with_parts(
        ApiConfig::default(),
        Arc::clone(&extractor) as Arc<dyn vget_extractor::MediaExtractor>,
        Arc::new(StaticDirectory::new(keys)),
    );
    (create_router(state, None), extractor)
}

fn json_request(method: &str, uri: &str, auth: (&str, &str), body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(auth.0, auth.1)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, auth: (&str, &str)) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(auth.0, auth.1)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const SESSION: (&str, &str) = ("X-Session-Id", "sess-1");
const FREE_KEY: (&str, &str) = ("Authorization", "Bearer key-free");
const PRO_KEY: (&str, &str) = ("Authorization", "Bearer key-pro");

/// Poll a job's status until the predicate holds.
async fn poll_until(
    app: &Router,
    auth: (&str, &str),
    job_id: &str,
    predicate: impl Fn(&Value) -> bool,
) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/api/jobs/{job_id}/status"), auth))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                let body = body_json(response).await;
                if predicate(&body) {
                    return body;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never reached the expected state")
}

#[tokio::test]
async fn test_health_endpoints() {
    let (app, _) = app(ScriptedExtractor::new());
    for uri in ["/health", "/healthz"] {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_sites_listing() {
    let (app, _) = app(ScriptedExtractor::new());
    let response = app
        .oneshot(get_request("/api/sites", SESSION))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["sites"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "youtube.com"));
}

#[tokio::test]
async fn test_unknown_api_key_is_rejected() {
    let (app, _) = app(ScriptedExtractor::new());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/videos/info",
            ("Authorization", "Bearer no-such-key"),
            json!({"url": URL}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_info_flow_with_cache_header() {
    let (app, extractor) =
        app(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/videos/info", FREE_KEY, json!({"url": URL})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers().get("X-Cache").unwrap(), "MISS");
    let view = body_json(response).await;
    let job_id = view["job_id"].as_str().unwrap().to_string();

    let done = poll_until(&app, FREE_KEY, &job_id, |v| {
        v["status"] == "completed" || v["status"] == "failed"
    })
    .await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["info"]["title"], "Sample");

    // Second submission is a terminal cache hit.
    let response = app
        .oneshot(json_request("POST", "/api/videos/info", FREE_KEY, json!({"url": URL})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-Cache").unwrap(), "HIT");
    let cached = body_json(response).await;
    assert_eq!(cached["status"], "completed");
    assert_eq!(cached["cache_hit"], true);
    assert_eq!(extractor.probe_calls(), 1);
}

#[tokio::test]
async fn test_status_for_unknown_and_malformed_ids() {
    let (app, _) = app(ScriptedExtractor::new());

    let response = app
        .clone()
        .oneshot(get_request(
            "/api/jobs/550e8400-e29b-41d4-a716-446655440000/status",
            SESSION,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["kind"], "not_found");

    let response = app
        .oneshot(get_request("/api/jobs/%2e%2e/status", SESSION))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_artifact_before_completion_is_not_ready() {
    let (app, _) = app(ScriptedExtractor::new()
        .with_probe_fallback(sample_info(URL))
        .gated());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/videos/download",
            FREE_KEY,
            json!({"url": URL, "format_id": "22", "quality": "720p"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/api/jobs/{job_id}/artifact"), FREE_KEY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "not_ready");
}

#[tokio::test]
async fn test_artifact_delivery_with_ranges() {
    let (app, _) = app(ScriptedExtractor::new());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/videos/download",
            PRO_KEY,
            json!({"url": URL, "format_id": "137", "quality": "1080p"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    poll_until(&app, PRO_KEY, &job_id, |v| v["status"] == "completed").await;

    // Full body. The scripted artifact is 20 bytes.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/jobs/{job_id}/artifact"), PRO_KEY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"scripted media bytes");

    // Partial body.
    let mut request = get_request(&format!("/api/jobs/{job_id}/artifact"), PRO_KEY);
    request
        .headers_mut()
        .insert(header::RANGE, "bytes=0-8".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-8/20"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"scripted ");

    // Unsatisfiable range.
    let mut request = get_request(&format!("/api/jobs/{job_id}/artifact"), PRO_KEY);
    request
        .headers_mut()
        .insert(header::RANGE, "bytes=500-".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */20"
    );
}

#[tokio::test]
async fn test_anonymous_download_above_ceiling_is_forbidden() {
    let (app, _) = app(ScriptedExtractor::new());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/videos/download",
            SESSION,
            json!({"url": URL, "format_id": "137", "quality": "1080p"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "tier_restricted");
}

#[tokio::test]
async fn test_rate_limited_submission_carries_retry_after() {
    let (app, _) = app(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));

    // Prime the cache so repeat submissions bypass the concurrency ceiling.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/videos/info", SESSION, json!({"url": URL})))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();
    poll_until(&app, SESSION, &job_id, |v| v["status"] == "completed").await;

    let mut limited = None;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/videos/info", SESSION, json!({"url": URL})))
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited = Some(response);
            break;
        }
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = limited.expect("limit never reached");
    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    assert_eq!(body_json(response).await["kind"], "rate_limited");
}

#[tokio::test]
async fn test_failed_job_artifact_is_not_ready() {
    let extractor = ScriptedExtractor::new().with_probe_fallback(sample_info(URL));
    extractor
        .push_download(vec![ScriptStep::Fail(ExtractorError::SourceUnavailable(
            "removed".to_string(),
        ))])
        .await;
    let (app, _) = app(extractor);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/videos/download",
            FREE_KEY,
            json!({"url": URL, "format_id": "22"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    poll_until(&app, FREE_KEY, &job_id, |v| v["status"] == "failed").await;

    // A failed job never becomes retrievable, but it is still a known job:
    // the artifact endpoint answers not_ready rather than not_found.
    let response = app
        .oneshot(get_request(&format!("/api/jobs/{job_id}/artifact"), FREE_KEY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "not_ready");
}

#[tokio::test]
async fn test_cancel_and_double_cancel() {
    let (app, _) = app(ScriptedExtractor::new()
        .with_probe_fallback(sample_info(URL))
        .gated());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/videos/download",
            FREE_KEY,
            json!({"url": URL, "format_id": "22"}),
        ))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/jobs/{job_id}"))
                .header(FREE_KEY.0, FREE_KEY.1)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["kind"], "cancelled");

    let response = app
        .oneshot(
            Request::delete(format!("/api/jobs/{job_id}"))
                .header(FREE_KEY.0, FREE_KEY.1)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_jobs_are_private_to_their_requester() {
    let (app, _) = app(ScriptedExtractor::new().with_probe_fallback(sample_info(URL)));

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/videos/info", FREE_KEY, json!({"url": URL})))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/api/jobs/{job_id}/status"), PRO_KEY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subtitle_flow() {
    let (app, _) = app(ScriptedExtractor::new());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/videos/subtitles",
            FREE_KEY,
            json!({"url": URL, "lang": "en"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let view = body_json(response).await;
    let job_id = view["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("sub-"));

    poll_until(&app, FREE_KEY, &job_id, |v| v["status"] == "completed").await;

    // The video artifact endpoint does not serve subtitle jobs.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/jobs/{job_id}/artifact"), FREE_KEY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request(
            &format!("/api/subtitles/{job_id}/artifact"),
            FREE_KEY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/vtt");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"WEBVTT"));
}

#[tokio::test]
async fn test_invalid_url_shape_is_bad_request() {
    let (app, _) = app(ScriptedExtractor::new());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/videos/info",
            SESSION,
            json!({"url": "not a url"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "validation");
}
