//! Conditional request handling.
//!
//! `If-*` headers are parsed once per request. The gateway itself only
//! evaluates the read-side conditions (`If-None-Match`,
//! `If-Modified-Since`), converting a fresh 200 into a 304; the remaining
//! conditions ride along to the metadata tier, which evaluates them
//! atomically with the operation and answers `PreconditionFailed`.

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use reef_common::BucketObject;
use reef_proto::metadata as pb;

/// Parsed `If-*` headers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions {
    pub if_match: Vec<String>,
    pub if_none_match: Vec<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Conditions {
    /// Parse the conditional headers off a request. Unparseable dates are
    /// ignored, per HTTP semantics.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            if_match: parse_etag_list(headers, "if-match"),
            if_none_match: parse_etag_list(headers, "if-none-match"),
            if_modified_since: parse_http_date(headers, "if-modified-since"),
            if_unmodified_since: parse_http_date(headers, "if-unmodified-since"),
        }
    }

    /// True when the request carried any conditional header
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        !self.if_match.is_empty()
            || !self.if_none_match.is_empty()
            || self.if_modified_since.is_some()
            || self.if_unmodified_since.is_some()
    }

    /// The subset the metadata tier accepts on writes: `If-Match`,
    /// `If-None-Match`, `If-Unmodified-Since`.
    #[must_use]
    pub fn to_shard_write(&self) -> Option<pb::Conditions> {
        if !self.is_conditional() {
            return None;
        }
        Some(pb::Conditions {
            if_match: self.if_match.clone(),
            if_none_match: self.if_none_match.clone(),
            if_modified_since_ms: None,
            if_unmodified_since_ms: self
                .if_unmodified_since
                .map(|t| t.timestamp_millis() as u64),
        })
    }

    /// The subset forwarded on reads: `If-Match`, `If-Unmodified-Since`.
    /// The rest is evaluated at the gateway against the fetched record.
    #[must_use]
    pub fn to_shard_read(&self) -> Option<pb::Conditions> {
        if self.if_match.is_empty() && self.if_unmodified_since.is_none() {
            return None;
        }
        Some(pb::Conditions {
            if_match: self.if_match.clone(),
            if_none_match: Vec::new(),
            if_modified_since_ms: None,
            if_unmodified_since_ms: self
                .if_unmodified_since
                .map(|t| t.timestamp_millis() as u64),
        })
    }

    /// Gateway-side read evaluation: should this GET/HEAD answer 304?
    #[must_use]
    pub fn not_modified(&self, object: &BucketObject) -> bool {
        let etag = object.id.to_string();
        if !self.if_none_match.is_empty() {
            return self
                .if_none_match
                .iter()
                .any(|candidate| candidate == "*" || *candidate == etag);
        }
        if let Some(since) = self.if_modified_since {
            // HTTP dates carry second precision; compare at that grain.
            let modified = Utc
                .timestamp_opt(object.modified.timestamp(), 0)
                .single()
                .unwrap_or(object.modified);
            return modified <= since;
        }
        false
    }
}

/// Parse a comma-separated etag list, stripping weak prefixes and quotes
fn parse_etag_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let part = part.strip_prefix("W/").unwrap_or(part);
            part.trim_matches('"').to_string()
        })
        .collect()
}

fn parse_http_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    let value = headers.get(name)?.to_str().ok()?;
    let system_time = httpdate::parse_http_date(value).ok()?;
    Some(DateTime::<Utc>::from(system_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_common::{ObjectId, StorageLayoutVersion};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn object(etag: &str, modified: DateTime<Utc>) -> BucketObject {
        BucketObject {
            id: ObjectId::from_uuid(etag.parse().unwrap()),
            name: "k1".to_string(),
            name_hash: "00".to_string(),
            bucket_id: Uuid::nil(),
            owner: Uuid::nil(),
            content_length: 1,
            content_md5: "x".to_string(),
            content_type: "text/plain".to_string(),
            headers: BTreeMap::new(),
            sharks: Vec::new(),
            storage_layout_version: StorageLayoutVersion::V2,
            created: modified,
            modified,
            roles: Vec::new(),
        }
    }

    const ETAG: &str = "9e8f3a52-7a64-4cda-a316-6a166f68d315";

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_etag_list_parsing() {
        let conditions = Conditions::from_headers(&headers(&[(
            "if-none-match",
            "W/\"abc\", \"def\" , ghi",
        )]));
        assert_eq!(conditions.if_none_match, vec!["abc", "def", "ghi"]);
    }

    #[test]
    fn test_if_none_match_star_is_not_modified() {
        let conditions = Conditions::from_headers(&headers(&[("if-none-match", "*")]));
        assert!(conditions.not_modified(&object(ETAG, Utc::now())));
    }

    #[test]
    fn test_if_none_match_current_etag() {
        let conditions = Conditions::from_headers(&headers(&[("if-none-match", ETAG)]));
        assert!(conditions.not_modified(&object(ETAG, Utc::now())));

        let other = Conditions::from_headers(&headers(&[("if-none-match", "\"someother\"")]));
        assert!(!other.not_modified(&object(ETAG, Utc::now())));
    }

    #[test]
    fn test_if_modified_since() {
        let modified = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let object = object(ETAG, modified);

        // Header date strictly after the modification: not modified.
        let later = Conditions::from_headers(&headers(&[(
            "if-modified-since",
            "Sun, 01 Jun 2025 13:00:00 GMT",
        )]));
        assert!(later.not_modified(&object));

        // Header date before the modification: modified.
        let earlier = Conditions::from_headers(&headers(&[(
            "if-modified-since",
            "Sun, 01 Jun 2025 11:00:00 GMT",
        )]));
        assert!(!earlier.not_modified(&object));
    }

    #[test]
    fn test_if_none_match_mismatch_skips_date_check() {
        let modified = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let object = object(ETAG, modified);
        let conditions = Conditions::from_headers(&headers(&[
            ("if-none-match", "\"someother\""),
            ("if-modified-since", "Sun, 01 Jun 2025 13:00:00 GMT"),
        ]));
        assert!(!conditions.not_modified(&object));
    }

    #[test]
    fn test_shard_subsets() {
        let conditions = Conditions::from_headers(&headers(&[
            ("if-match", "\"a\""),
            ("if-none-match", "*"),
            ("if-unmodified-since", "Sun, 01 Jun 2025 12:00:00 GMT"),
            ("if-modified-since", "Sun, 01 Jun 2025 12:00:00 GMT"),
        ]));

        let write = conditions.to_shard_write().unwrap();
        assert_eq!(write.if_match, vec!["a"]);
        assert_eq!(write.if_none_match, vec!["*"]);
        assert!(write.if_unmodified_since_ms.is_some());
        assert!(write.if_modified_since_ms.is_none());

        let read = conditions.to_shard_read().unwrap();
        assert_eq!(read.if_match, vec!["a"]);
        assert!(read.if_none_match.is_empty());
    }

    #[test]
    fn test_unconditional_request() {
        let conditions = Conditions::from_headers(&HeaderMap::new());
        assert!(!conditions.is_conditional());
        assert!(conditions.to_shard_write().is_none());
        assert!(conditions.to_shard_read().is_none());
    }
}
