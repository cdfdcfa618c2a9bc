//! Source URL and job id validation.
//!
//! Runs before any job record exists, so every rejection here is free.
//! Private-network and metadata addresses are blocked outright; which sites
//! the extractor can actually handle is its own concern.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Longest URL accepted from a client.
const MAX_URL_LENGTH: usize = 2048;

/// Host patterns that must never reach the extractor.
static BLOCKED_HOSTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^localhost$",
        r"^127\.",
        r"^0\.0\.0\.0$",
        r"^10\.",
        r"^172\.(1[6-9]|2[0-9]|3[0-1])\.",
        r"^192\.168\.",
        r"^169\.254\.",
        r"^\[::1\]$",
        r"^::1$",
        r"^metadata\.google\.internal$",
        r"^metadata\.",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sub-)?[A-Za-z0-9-]{8,64}$").expect("static pattern"));

/// Validate and normalize a client-supplied source URL.
///
/// Returns the normalized form (as serialized by the parser) so cache keys
/// for trivially different spellings of the same URL collide.
pub fn validate_source_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("url must not be empty".to_string());
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(format!("url exceeds {MAX_URL_LENGTH} characters"));
    }

    let url = Url::parse(trimmed).map_err(|e| format!("invalid url: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported url scheme: {other}")),
    }

    let host = url
        .host_str()
        .ok_or_else(|| "url has no host".to_string())?
        .to_lowercase();

    if BLOCKED_HOSTS.iter().any(|re| re.is_match(&host)) {
        return Err("url points at a blocked address".to_string());
    }

    Ok(url.to_string())
}

/// Whether a path parameter is shaped like one of our job ids.
pub fn is_valid_job_id(id: &str) -> bool {
    JOB_ID_RE.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_http_urls() {
        assert!(validate_source_url("https://youtube.com/watch?v=abc").is_ok());
        assert!(validate_source_url("http://vimeo.com/12345").is_ok());
        assert!(validate_source_url("  https://youtu.be/abc  ").is_ok());
    }

    #[test]
    fn test_normalization_is_stable() {
        let a = validate_source_url("https://YouTube.com/watch?v=abc").unwrap();
        let b = validate_source_url("https://youtube.com/watch?v=abc").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_schemes() {
        assert!(validate_source_url("ftp://example.com/file").is_err());
        assert!(validate_source_url("file:///etc/passwd").is_err());
        assert!(validate_source_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn test_rejects_private_and_metadata_hosts() {
        for url in [
            "http://localhost/x",
            "http://127.0.0.1/x",
            "http://10.0.0.5/x",
            "http://172.16.0.1/x",
            "http://192.168.1.1/x",
            "http://169.254.169.254/latest/meta-data",
            "http://metadata.google.internal/computeMetadata",
            "http://[::1]/x",
        ] {
            assert!(validate_source_url(url).is_err(), "{url} should be blocked");
        }
        // 172.32 is outside the private block.
        assert!(validate_source_url("http://172.32.0.1/x").is_ok());
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert!(validate_source_url("").is_err());
        assert!(validate_source_url("   ").is_err());
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(validate_source_url(&long).is_err());
    }

    #[test]
    fn test_job_id_shapes() {
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_job_id("sub-550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_job_id("short"));
        assert!(!is_valid_job_id("../../etc/passwd"));
        assert!(!is_valid_job_id(""));
    }
}
