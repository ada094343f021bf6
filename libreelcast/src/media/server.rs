//! HTTP front end: `GET`/`HEAD /m/{token}`

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::range::{parse_range_header, RangeRequest};
use super::MediaExposure;
use crate::error::{MediaError, Result};
use crate::shutdown::ShutdownSignal;

pub fn router(media: Arc<MediaExposure>) -> Router {
    // `get` also answers HEAD; the handler tells them apart
    Router::new()
        .route("/m/{token}", get(serve_media))
        .with_state(media)
}

/// Bind and serve until `shutdown` fires
pub async fn serve(media: Arc<MediaExposure>, bind: &str, shutdown: ShutdownSignal) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(MediaError::Io)?;
    info!("Serving media on http://{} (root={})", bind, media.root().display());

    axum::serve(listener, router(media))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(MediaError::Io)?;

    Ok(())
}

/// Purge dead tokens every `interval` until shutdown
pub fn spawn_sweeper(
    media: Arc<MediaExposure>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while shutdown.sleep(interval).await {
            match media.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Swept dead media tokens"),
                Err(e) => warn!("Token sweep failed: {}", e),
            }
        }
    })
}

async fn serve_media(
    State(media): State<Arc<MediaExposure>>,
    Path(token): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match respond(&media, &token, &method, &headers).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to serve media: {}", e);
            status_only(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn respond(
    media: &MediaExposure,
    token: &str,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response> {
    let file = match media.lookup(token).await? {
        Some(file) => file,
        None => return Ok(status_only(StatusCode::NOT_FOUND)),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(|value| parse_range_header(value, file.size))
        .unwrap_or(RangeRequest::Full);

    if range == RangeRequest::Unsatisfiable {
        let mut response = status_only(StatusCode::RANGE_NOT_SATISFIABLE);
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", file.size)) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        return Ok(response);
    }

    let head_only = method == Method::HEAD;
    if !head_only && !media.consume_use(token).await? {
        // Last use spent by a concurrent fetch
        return Ok(status_only(StatusCode::NOT_FOUND));
    }

    let mut source = match tokio::fs::File::open(&file.path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            media.revoke(token).await?;
            return Ok(status_only(StatusCode::NOT_FOUND));
        }
        Err(e) => return Err(MediaError::Io(e).into()),
    };

    let mime = content_type_for(&file.path);

    let (status, length, content_range) = match range {
        RangeRequest::Partial(byte_range) => (
            StatusCode::PARTIAL_CONTENT,
            byte_range.length(),
            Some(byte_range.content_range(file.size)),
        ),
        _ => (StatusCode::OK, file.size, None),
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(value) = content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
        response_headers.insert(header::CONTENT_RANGE, value);
    }
    insert_no_cache(&mut response_headers);

    info!(
        rel_path = %file.rel_path,
        method = %method,
        status = status.as_u16(),
        bytes = length,
        "Serving media"
    );

    if head_only {
        return Ok((status, response_headers, Body::empty()).into_response());
    }

    let body = match range {
        RangeRequest::Partial(byte_range) => {
            source
                .seek(SeekFrom::Start(byte_range.start))
                .await
                .map_err(MediaError::Io)?;
            Body::from_stream(ReaderStream::new(source.take(byte_range.length())))
        }
        _ => Body::from_stream(ReaderStream::new(source)),
    };

    Ok((status, response_headers, body).into_response())
}

fn status_only(status: StatusCode) -> Response {
    let mut headers = HeaderMap::new();
    insert_no_cache(&mut headers);
    (status, headers, Body::empty()).into_response()
}

fn insert_no_cache(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("mp4") => "video/mp4",
        Some("m4v") => "video/x-m4v",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
