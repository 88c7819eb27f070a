//! Response construction: error bodies and object headers.

use crate::headers::replay_stored_headers;
use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reef_common::{BucketObject, Error};
use serde_json::json;
use std::time::SystemTime;

/// Handler result: a finished response or a taxonomy error
pub type ApiResult = Result<Response, ApiError>;

/// Wrapper giving the error taxonomy an HTTP rendering
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = error.code(), error = %error, "request failed");
        } else {
            tracing::debug!(code = error.code(), error = %error, "request failed");
        }

        let body = Json(json!({
            "code": error.code(),
            "message": error.to_string(),
        }));
        let mut response = (status, body).into_response();

        if let Some(seconds) = error.retry_after() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&seconds.to_string()).unwrap(),
            );
        }
        if let Error::RangeNotSatisfiable {
            content_range: Some(range),
        } = &error
        {
            if let Ok(value) = HeaderValue::from_str(range) {
                response
                    .headers_mut()
                    .insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

/// Format a timestamp as an HTTP date
pub fn http_date(time: chrono::DateTime<chrono::Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(time))
}

/// Standard read-response headers for an object record, including the
/// replayed stored subset.
pub fn object_read_headers(
    object: &BucketObject,
    origin: Option<&str>,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut out = vec![
        (header::ETAG, value(&object.id.to_string())),
        (
            HeaderName::from_static("content-md5"),
            value(&object.content_md5),
        ),
        (header::CONTENT_TYPE, value(&object.content_type)),
        (
            header::LAST_MODIFIED,
            value(&http_date(object.modified)),
        ),
        (
            HeaderName::from_static("durability-level"),
            value(&object.durability_level().to_string()),
        ),
        (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
    ];
    if !object.roles.is_empty() {
        out.push((
            HeaderName::from_static("role-tag"),
            value(&object.roles.join(", ")),
        ));
    }
    for (name, stored_value) in replay_stored_headers(&object.headers, origin) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            out.push((name, value(stored_value)));
        }
    }
    out
}

/// The header subset a 304 carries: identity and freshness only
pub fn not_modified_headers(object: &BucketObject) -> Vec<(HeaderName, HeaderValue)> {
    vec![
        (header::ETAG, value(&object.id.to_string())),
        (
            header::LAST_MODIFIED,
            value(&http_date(object.modified)),
        ),
    ]
}

fn value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

/// Attach headers to a response builder-less response
pub fn with_headers(mut response: Response, headers: Vec<(HeaderName, HeaderValue)>) -> Response {
    for (name, value) in headers {
        response.headers_mut().insert(name, value);
    }
    response
}
