//! Stored header filtering and replay.
//!
//! Objects carry a filtered subset of their creation headers: `m-*` user
//! metadata, `Cache-Control`, `Surrogate-Key`, and the
//! `access-control-*` CORS set. CORS headers are a first-class subset,
//! not user metadata: on read they are replayed only when the request
//! origin matches the stored policy.

use axum::http::HeaderMap;
use reef_common::{Error, Result};
use std::collections::BTreeMap;

const USER_METADATA_PREFIX: &str = "m-";
const CORS_PREFIX: &str = "access-control-";
const PLAIN_STORED: [&str; 2] = ["cache-control", "surrogate-key"];

/// Extract the storable header subset from a create or metadata-update
/// request. The `m-*` total is capped at `max_user_metadata_bytes`.
pub fn filter_stored_headers(
    headers: &HeaderMap,
    max_user_metadata_bytes: usize,
) -> Result<BTreeMap<String, String>> {
    let mut stored = BTreeMap::new();
    let mut metadata_bytes = 0usize;

    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        let keep = name.starts_with(USER_METADATA_PREFIX)
            || name.starts_with(CORS_PREFIX)
            || PLAIN_STORED.contains(&name.as_str());
        if !keep {
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| Error::bad_request(format!("header {name} is not valid UTF-8")))?;
        if name.starts_with(USER_METADATA_PREFIX) {
            metadata_bytes += name.len() + value.len();
            if metadata_bytes > max_user_metadata_bytes {
                return Err(Error::UserMetadataTooLarge {
                    max_bytes: max_user_metadata_bytes,
                });
            }
        }
        stored.insert(name, value.to_string());
    }
    Ok(stored)
}

/// Stored headers to replay on a read, given the request `Origin`.
pub fn replay_stored_headers<'a>(
    stored: &'a BTreeMap<String, String>,
    origin: Option<&str>,
) -> Vec<(&'a str, &'a str)> {
    let cors_allowed = origin_matches(stored, origin);
    stored
        .iter()
        .filter(|(name, _)| {
            if name.starts_with(CORS_PREFIX) {
                cors_allowed
            } else {
                true
            }
        })
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

/// Role tags from a comma-separated `Role-Tag` header. Absent or empty
/// means the record carries no tags.
pub fn parse_role_tags(headers: &HeaderMap) -> Vec<String> {
    let Some(value) = headers.get("role-tag").and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn origin_matches(stored: &BTreeMap<String, String>, origin: Option<&str>) -> bool {
    let Some(allowed) = stored.get("access-control-allow-origin") else {
        return false;
    };
    if allowed == "*" {
        return true;
    }
    match origin {
        Some(origin) => allowed.split(',').any(|a| a.trim() == origin),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_filter_keeps_stored_subset() {
        let stored = filter_stored_headers(
            &request_headers(&[
                ("m-color", "teal"),
                ("Cache-Control", "max-age=60"),
                ("Surrogate-Key", "k1"),
                ("Access-Control-Allow-Origin", "https://app.example"),
                ("Content-Type", "text/plain"),
                ("Authorization", "Signature x"),
            ]),
            4096,
        )
        .unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored.get("m-color").unwrap(), "teal");
        assert!(!stored.contains_key("content-type"));
        assert!(!stored.contains_key("authorization"));
    }

    #[test]
    fn test_user_metadata_cap() {
        let big = "v".repeat(64);
        let headers = request_headers(&[("m-a", &big), ("m-b", &big)]);
        assert!(filter_stored_headers(&headers, 4096).is_ok());
        let err = filter_stored_headers(&headers, 100).unwrap_err();
        assert_eq!(err.code(), "UserMetadataTooLargeError");
    }

    #[test]
    fn test_cors_replay_requires_origin_match() {
        let stored: BTreeMap<String, String> = [
            ("m-color".to_string(), "teal".to_string()),
            (
                "access-control-allow-origin".to_string(),
                "https://app.example".to_string(),
            ),
            (
                "access-control-expose-headers".to_string(),
                "etag".to_string(),
            ),
        ]
        .into_iter()
        .collect();

        let matched = replay_stored_headers(&stored, Some("https://app.example"));
        assert_eq!(matched.len(), 3);

        let unmatched = replay_stored_headers(&stored, Some("https://evil.example"));
        assert_eq!(unmatched, vec![("m-color", "teal")]);

        let no_origin = replay_stored_headers(&stored, None);
        assert_eq!(no_origin, vec![("m-color", "teal")]);
    }

    #[test]
    fn test_role_tag_parsing() {
        let headers = request_headers(&[("Role-Tag", "ops, audit ,")]);
        assert_eq!(parse_role_tags(&headers), vec!["ops", "audit"]);
        assert!(parse_role_tags(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn test_cors_wildcard_replays_without_origin_match() {
        let stored: BTreeMap<String, String> =
            [("access-control-allow-origin".to_string(), "*".to_string())]
                .into_iter()
                .collect();
        assert_eq!(replay_stored_headers(&stored, None).len(), 1);
    }
}
