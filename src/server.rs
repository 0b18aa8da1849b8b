//!
//! tileserver HTTP server
//! ----------------------
//! Axum-based request pipeline for serving a rooted, read-only directory of
//! streaming 3D-tile, glTF and imagery assets.
//!
//! Responsibilities:
//! - Method gate: GET/HEAD/OPTIONS only, checked before any filesystem I/O.
//! - Sandboxed path resolution against the configured asset root.
//! - Conditional requests (weak ETag / Last-Modified string match).
//! - Byte-range delivery with lenient parsing and clamping.
//! - CORS headers on every response, including errors.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ServeError, ServeResult};

pub mod assets;
pub mod range;

use assets::{content_descriptor, resolve_under_root, AssetMeta, ContentDescriptor};
use range::RangeOutcome;

const CACHE_CONTROL: &str = "public, max-age=604800, immutable, no-transform";

/// Start the server with configuration resolved from flags and environment.
pub async fn run() -> anyhow::Result<()> {
    let cfg = Config::from_env_and_args()?;
    run_with_config(cfg).await
}

/// Bind the configured port and serve until the process is stopped.
pub async fn run_with_config(cfg: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("tile asset server on http://{}", listener.local_addr()?);
    info!("serving directory: {}", cfg.root.display());
    serve_on_listener(listener, cfg).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first and read its address.
pub async fn serve_on_listener(listener: TcpListener, cfg: Config) -> anyhow::Result<()> {
    axum::serve(listener, router(cfg)).await?;
    Ok(())
}

/// Build the application router: every path falls through to the asset
/// handler, and the CORS middleware stamps all responses.
pub fn router(cfg: Config) -> Router {
    Router::new()
        .fallback(serve_asset)
        .layer(middleware::from_fn(cors_headers))
        .with_state(Arc::new(cfg))
}

/// CORS negotiation headers carried by every response, error or success.
async fn cors_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let h = resp.headers_mut();
    h.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept, Range"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,OPTIONS"),
    );
    h.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range"),
    );
    h.insert(header::VARY, HeaderValue::from_static("Origin"));
    resp
}

async fn serve_asset(State(cfg): State<Arc<Config>>, req: Request) -> Response {
    // The request is consumed by `respond` so its future stays Send; keep
    // the path for the rejection log.
    let path = req.uri().path().to_owned();
    match respond(&cfg, req).await {
        Ok(resp) => resp,
        Err(err) => {
            debug!(path = %path, status = %err.http_status(), "request rejected");
            err.into_response()
        }
    }
}

/// One request through the full state machine:
/// method gate -> path resolve -> stat -> conditional check -> range parse ->
/// stream. Every failure is terminal and maps to a `ServeError`; headers are
/// fully computed before any body byte is handed to the transport.
async fn respond(cfg: &Config, req: Request) -> ServeResult<Response> {
    let method = req.method();
    if method == Method::OPTIONS {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if method != Method::GET && method != Method::HEAD {
        return Err(ServeError::MethodNotAllowed);
    }
    let head_only = method == Method::HEAD;

    let path = resolve_under_root(&cfg.root, req.uri().path())?;
    let meta = AssetMeta::lookup(&path).await?;

    // Conditional check preempts range handling entirely. Both validators
    // compare by exact string equality; clients echo our own header values
    // back, so equality is the compatibility-preserving comparison here.
    if validators_match(req.headers(), &meta) {
        debug!(path = %path.display(), "not modified");
        return Ok(not_modified(&meta));
    }

    let content = content_descriptor(&path);
    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    match range::evaluate(range_header, meta.size) {
        RangeOutcome::Unsatisfiable => Err(ServeError::RangeNotSatisfiable { size: meta.size }),
        RangeOutcome::Slice { start, end } => {
            debug!(path = %path.display(), start, end, size = meta.size, "partial content");
            partial_response(&path, &meta, &content, start, end, head_only).await
        }
        RangeOutcome::Full => {
            debug!(path = %path.display(), size = meta.size, "full content");
            full_response(&path, &meta, &content, head_only).await
        }
    }
}

fn validators_match(headers: &HeaderMap, meta: &AssetMeta) -> bool {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok());
    if_none_match == Some(meta.etag.as_str())
        || if_modified_since == Some(meta.last_modified.as_str())
}

/// 304 refreshes the client's cache entry: validators and cache policy, no
/// body, no content headers.
fn not_modified(meta: &AssetMeta) -> Response {
    let mut headers = HeaderMap::new();
    insert_str(&mut headers, header::ETAG, &meta.etag);
    insert_str(&mut headers, header::LAST_MODIFIED, &meta.last_modified);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    (StatusCode::NOT_MODIFIED, headers).into_response()
}

/// Headers common to 200 and 206 responses.
fn success_headers(meta: &AssetMeta, content: &ContentDescriptor) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content.media_type),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    insert_str(&mut headers, header::ETAG, &meta.etag);
    insert_str(&mut headers, header::LAST_MODIFIED, &meta.last_modified);
    if let Some(encoding) = content.encoding {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
    }
    headers
}

async fn full_response(
    path: &Path,
    meta: &AssetMeta,
    content: &ContentDescriptor,
    head_only: bool,
) -> ServeResult<Response> {
    let mut headers = success_headers(meta, content);
    insert_str(&mut headers, header::CONTENT_LENGTH, &meta.size.to_string());
    if head_only {
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ServeError::NotFound)?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn partial_response(
    path: &Path,
    meta: &AssetMeta,
    content: &ContentDescriptor,
    start: u64,
    end: u64,
    head_only: bool,
) -> ServeResult<Response> {
    let len = RangeOutcome::slice_len(start, end);
    let mut headers = success_headers(meta, content);
    insert_str(&mut headers, header::CONTENT_LENGTH, &len.to_string());
    insert_str(
        &mut headers,
        header::CONTENT_RANGE,
        &format!("bytes {}-{}/{}", start, end, meta.size),
    );
    if head_only {
        return Ok((StatusCode::PARTIAL_CONTENT, headers, Body::empty()).into_response());
    }
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ServeError::NotFound)?;
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|_| ServeError::NotFound)?;
    // Bounded reader: the transport pulls chunks until the interval is
    // exhausted or the client goes away, which drops the stream and the
    // file handle with it.
    let body = Body::from_stream(ReaderStream::new(file.take(len)));
    Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
}

fn insert_str(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
