//! Request error model and HTTP mapping.
//! Every failure a request can hit is resolved locally into one of these
//! variants and rendered as a terminal HTTP response; nothing propagates as
//! a process-level failure.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServeError {
    /// Malformed request path: percent-decoding failed or the decoded path
    /// escapes the asset root. The filesystem is never touched.
    #[error("malformed request path")]
    ClientProtocol,
    /// Method outside GET/HEAD/OPTIONS.
    #[error("method not allowed")]
    MethodNotAllowed,
    /// Stat failure or non-regular-file target. The two are deliberately
    /// indistinguishable so responses never leak filesystem topology.
    #[error("not found")]
    NotFound,
    /// Requested interval starts past its end after clamping.
    #[error("range not satisfiable for size {size}")]
    RangeNotSatisfiable { size: u64 },
}

impl ServeError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ServeError::ClientProtocol => StatusCode::BAD_REQUEST,
            ServeError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServeError::NotFound => StatusCode::NOT_FOUND,
            ServeError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match self {
            ServeError::ClientProtocol => (StatusCode::BAD_REQUEST, "Bad Request").into_response(),
            ServeError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
            }
            ServeError::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            ServeError::RangeNotSatisfiable { size } => {
                // 416 carries the total size and no body.
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
                (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response()
            }
        }
    }
}

pub type ServeResult<T> = Result<T, ServeError>;
