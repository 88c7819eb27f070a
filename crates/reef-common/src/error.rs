//! The externally visible error taxonomy.
//!
//! Every error a request can surface is a value of [`Error`]. Each variant
//! maps to a stable string code and an HTTP status; upstream shard and
//! storage errors are translated into the taxonomy by name, and anything
//! unrecognized collapses to `Internal` with the original message kept for
//! the log.

use crate::types::{BucketNameError, ObjectNameError};
use thiserror::Error;

/// Common result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error taxonomy
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Client input
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("{0}")]
    InvalidObjectName(#[from] ObjectNameError),

    #[error("Content-Length or max-content-length required")]
    ContentLengthRequired,

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    MaxContentLengthExceeded { max_bytes: u64 },

    #[error("user metadata exceeds {max_bytes} bytes")]
    UserMetadataTooLarge { max_bytes: usize },

    #[error("Content-MD5 invalid: {0}")]
    InvalidContentMd5(String),

    #[error("computed MD5 {computed} does not match {expected}")]
    ChecksumMismatch { expected: String, computed: String },

    // Auth
    #[error("authentication required")]
    Unauthenticated,

    #[error("{actor} is not allowed to {action} {resource}")]
    Forbidden {
        actor: String,
        action: String,
        resource: String,
    },

    // Not found / conflicts
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("bucket {0} already exists")]
    BucketAlreadyExists(String),

    #[error("bucket {0} is not empty")]
    BucketNotEmpty(String),

    #[error("object {path} does not exist")]
    ObjectNotFound { path: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("concurrent request conflict: {0}")]
    ConcurrentRequest(String),

    #[error("requested range not satisfiable")]
    RangeNotSatisfiable {
        /// `Content-Range` value reported by the storage node, replayed
        /// verbatim to the client
        content_range: Option<String>,
    },

    // Streaming
    #[error("upload idle for too long")]
    UploadTimeout,

    #[error("client abandoned the upload")]
    UploadAbandoned,

    #[error("request aborted by client")]
    ClientClosed,

    // Capacity / availability
    #[error("no storage nodes available for a {copies}-copy write")]
    SharksExhausted { copies: usize },

    #[error("not enough free storage capacity")]
    NotEnoughSpace,

    #[error("server is overloaded")]
    Throttled,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("request timed out")]
    Timeout,

    // Catch-all
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a bad-request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// The stable, externally visible error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::InvalidContentMd5(_) => "BadRequestError",
            Self::InvalidBucketName(_) => "InvalidBucketNameError",
            Self::InvalidObjectName(_) => "InvalidObjectNameError",
            Self::ContentLengthRequired => "ContentLengthRequiredError",
            Self::MaxContentLengthExceeded { .. } => "MaxContentLengthExceededError",
            Self::UserMetadataTooLarge { .. } => "UserMetadataTooLargeError",
            Self::ChecksumMismatch { .. } => "ChecksumError",
            Self::Unauthenticated => "AuthenticationError",
            Self::Forbidden { .. } => "AuthorizationError",
            Self::BucketNotFound(_) => "BucketNotFoundError",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExistsError",
            Self::BucketNotEmpty(_) => "BucketNotEmptyError",
            Self::ObjectNotFound { .. } => "ObjectNotFoundError",
            Self::PreconditionFailed(_) => "PreconditionFailedError",
            Self::ConcurrentRequest(_) => "ConcurrentRequestError",
            Self::RangeNotSatisfiable { .. } => "RequestedRangeNotSatisfiableError",
            Self::UploadTimeout => "UploadTimeoutError",
            Self::UploadAbandoned => "UploadAbandonedError",
            Self::ClientClosed => "RequestAbortedError",
            Self::SharksExhausted { .. } => "SharksExhaustedError",
            Self::NotEnoughSpace => "NotEnoughSpaceError",
            Self::Throttled => "ThrottledError",
            Self::ServiceUnavailable(_) => "ServiceUnavailableError",
            Self::Timeout => "RequestTimeoutError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP status the error maps to
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_)
            | Self::InvalidContentMd5(_)
            | Self::ChecksumMismatch { .. }
            | Self::UserMetadataTooLarge { .. } => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden { .. } => 403,
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } => 404,
            Self::Timeout | Self::UploadTimeout => 408,
            Self::BucketAlreadyExists(_)
            | Self::BucketNotEmpty(_)
            | Self::ConcurrentRequest(_) => 409,
            Self::ContentLengthRequired => 411,
            Self::PreconditionFailed(_) => 412,
            Self::MaxContentLengthExceeded { .. } => 413,
            Self::RangeNotSatisfiable { .. } => 416,
            Self::InvalidBucketName(_) | Self::InvalidObjectName(_) => 422,
            Self::UploadAbandoned | Self::ClientClosed => 499,
            Self::Internal(_) => 500,
            Self::SharksExhausted { .. } | Self::Throttled | Self::ServiceUnavailable(_) => 503,
            Self::NotEnoughSpace => 507,
        }
    }

    /// `Retry-After` seconds, for errors that advertise one
    #[must_use]
    pub fn retry_after(&self) -> Option<u32> {
        match self {
            Self::SharksExhausted { .. } => Some(30),
            _ => None,
        }
    }

    /// Translate an upstream shard or storage error, identified by name,
    /// into the taxonomy.
    ///
    /// `name` is the leading identifier of the upstream message; `context`
    /// is the remainder. Unknown names collapse to `Internal` with the
    /// original text preserved.
    #[must_use]
    pub fn from_upstream(name: &str, context: &str) -> Self {
        match name {
            "BucketAlreadyExists" => Self::BucketAlreadyExists(context.to_string()),
            "BucketNotFound" => Self::BucketNotFound(context.to_string()),
            "BucketNotEmpty" => Self::BucketNotEmpty(context.to_string()),
            "ObjectNotFound" => Self::ObjectNotFound {
                path: context.to_string(),
            },
            "PreconditionFailed" => Self::PreconditionFailed(context.to_string()),
            "EtagConflict" | "UniqueAttribute" => Self::ConcurrentRequest(context.to_string()),
            "RequestedRangeNotSatisfiable" => Self::RangeNotSatisfiable {
                content_range: None,
            },
            "NoDatabasePeers" => {
                if context.to_ascii_lowercase().contains("overloaded") {
                    Self::ServiceUnavailable(context.to_string())
                } else {
                    Self::Internal(format!("NoDatabasePeers: {context}"))
                }
            }
            "Throttled" => Self::Throttled,
            _ => Self::Internal(format!("{name}: {context}")),
        }
    }

    /// Split an upstream message of the form `Name: detail` and translate
    /// it. Messages with no recognizable name collapse to `Internal`.
    #[must_use]
    pub fn from_upstream_message(message: &str) -> Self {
        let (name, context) = match message.split_once(':') {
            Some((n, c)) => (n.trim(), c.trim()),
            None => (message.trim(), ""),
        };
        if name.chars().all(|c| c.is_ascii_alphanumeric()) && !name.is_empty() {
            Self::from_upstream(name, context)
        } else {
            Self::Internal(message.to_string())
        }
    }

    /// True for errors the client may reasonably retry against another
    /// gateway instance
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled
                | Self::ServiceUnavailable(_)
                | Self::SharksExhausted { .. }
                | Self::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_translation_table() {
        let cases = [
            ("BucketAlreadyExists", "BucketAlreadyExistsError", 409),
            ("BucketNotFound", "BucketNotFoundError", 404),
            ("ObjectNotFound", "ObjectNotFoundError", 404),
            ("PreconditionFailed", "PreconditionFailedError", 412),
            ("EtagConflict", "ConcurrentRequestError", 409),
            ("UniqueAttribute", "ConcurrentRequestError", 409),
            (
                "RequestedRangeNotSatisfiable",
                "RequestedRangeNotSatisfiableError",
                416,
            ),
            ("Throttled", "ThrottledError", 503),
            ("SomethingNovel", "InternalError", 500),
        ];
        for (name, code, status) in cases {
            let err = Error::from_upstream(name, "ctx");
            assert_eq!(err.code(), code, "{name}");
            assert_eq!(err.http_status(), status, "{name}");
        }
    }

    #[test]
    fn test_no_database_peers_split() {
        let overloaded = Error::from_upstream("NoDatabasePeers", "shard 2 overloaded");
        assert_eq!(overloaded.code(), "ServiceUnavailableError");
        assert_eq!(overloaded.http_status(), 503);

        let other = Error::from_upstream("NoDatabasePeers", "no peers discovered");
        assert_eq!(other.code(), "InternalError");
        assert_eq!(other.http_status(), 500);
    }

    #[test]
    fn test_upstream_message_parsing() {
        let err = Error::from_upstream_message("BucketNotFound: mybucket");
        assert_eq!(err.code(), "BucketNotFoundError");

        let err = Error::from_upstream_message("transport error");
        assert_eq!(err.code(), "InternalError");
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(Error::SharksExhausted { copies: 2 }.retry_after(), Some(30));
        assert_eq!(Error::Throttled.retry_after(), None);
    }

    #[test]
    fn test_validation_statuses() {
        let err: Error = BucketNameError::TooShort.into();
        assert_eq!(err.http_status(), 422);
        let err: Error = ObjectNameError::Empty.into();
        assert_eq!(err.http_status(), 422);
    }
}
