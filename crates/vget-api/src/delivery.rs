//! Artifact delivery with HTTP range support.
//!
//! Artifacts are served straight off disk. Single byte ranges are honored
//! with 206 responses; multi-range requests fall back to the full body, and
//! an unsatisfiable range is a 416 with the total size in `Content-Range`.

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::metrics::record_artifact_bytes;

/// A parsed `Range: bytes=...` header, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a range header against a body of `size` bytes.
///
/// `Ok(None)` means "serve the whole body": either no header, a shape we do
/// not support (multiple ranges), or an unparseable value. `Err` is reserved
/// for ranges that are syntactically fine but unsatisfiable.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, ()> {
    let Some(raw) = header else {
        return Ok(None);
    };
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start_s, end_s)) = spec.split_once('-') else {
        return Ok(None);
    };

    if size == 0 {
        return Err(());
    }

    let range = match (start_s.trim(), end_s.trim()) {
        // bytes=-N: the final N bytes.
        ("", suffix) => {
            let Ok(n) = suffix.parse::<u64>() else {
                return Ok(None);
            };
            if n == 0 {
                return Err(());
            }
            ByteRange {
                start: size.saturating_sub(n),
                end: size - 1,
            }
        }
        // bytes=N-: from N to the end.
        (start, "") => {
            let Ok(start) = start.parse::<u64>() else {
                return Ok(None);
            };
            if start >= size {
                return Err(());
            }
            ByteRange {
                start,
                end: size - 1,
            }
        }
        // bytes=N-M, clamped to the body.
        (start, end) => {
            let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                return Ok(None);
            };
            if start > end || start >= size {
                return Err(());
            }
            ByteRange {
                start,
                end: end.min(size - 1),
            }
        }
    };

    Ok(Some(range))
}

/// Serve a file, honoring an optional range header.
pub async fn serve_file(
    path: &Path,
    content_type: &str,
    range_header: Option<&str>,
) -> Result<Response, ApiError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::not_found("Artifact no longer available"))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to stat artifact: {e}")))?
        .len();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());

    let range = parse_range(range_header, size)
        .map_err(|_| ApiError::RangeNotSatisfiable { size })?;

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        );

    let response = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| ApiError::internal(format!("Failed to seek artifact: {e}")))?;
            record_artifact_bytes(range.len());
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, range.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, size),
                )
                .body(Body::from_stream(ReaderStream::new(file.take(range.len()))))
        }
        None => {
            record_artifact_bytes(size);
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size)
                .body(Body::from_stream(ReaderStream::new(file)))
        }
    };

    response.map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}
