//! Listing glue: query validation, merge construction, NDJSON rendering.
//!
//! A list request fans one limit-marker stream out per vnode, merges them
//! under the global limit, and streams entries back as one JSON document
//! per line. `Next-Marker` is set exactly when the merge stopped before
//! exhausting every stream.

use crate::pipeline::RequestCtx;
use crate::response::ApiResult;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use reef_client::listing::{BucketPageSource, ObjectPageSource};
use reef_common::{Bucket, BucketObject, Error, Result};
use reef_stream::{LimitMarkerStream, ListEntry, ListRecord, MergePaginator, PageSource};
use serde::Deserialize;
use serde_json::json;

const MAX_LIST_LIMIT: usize = 1024;

/// Raw query parameters of a list request
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub marker: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
}

/// Validated list parameters
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub limit: usize,
    pub marker: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<char>,
}

impl ListQuery {
    /// Validate raw parameters: `limit` in 1-1024 (default 1024),
    /// `delimiter` a single character.
    pub fn validate(params: ListParams) -> Result<Self> {
        let limit = match params.limit {
            None => MAX_LIST_LIMIT,
            Some(n) if (1..=MAX_LIST_LIMIT as u32).contains(&n) => n as usize,
            Some(n) => {
                return Err(Error::bad_request(format!(
                    "limit must be between 1 and {MAX_LIST_LIMIT}, got {n}"
                )))
            }
        };
        let delimiter = match params.delimiter.as_deref() {
            None | Some("") => None,
            Some(d) => {
                let mut chars = d.chars();
                let first = chars.next().unwrap();
                if chars.next().is_some() {
                    return Err(Error::bad_request("delimiter must be a single character"));
                }
                Some(first)
            }
        };
        Ok(Self {
            limit,
            marker: params.marker.filter(|m| !m.is_empty()),
            prefix: params.prefix.filter(|p| !p.is_empty()),
            delimiter,
        })
    }

    /// Inclusive resume key the vnode streams start from. The wire
    /// `marker` is exclusive, so its successor (`marker + NUL`) is used;
    /// the prefix wins when it starts later in the keyspace.
    #[must_use]
    pub fn start_marker(&self) -> String {
        let prefix_start = self.prefix.clone().unwrap_or_default();
        match &self.marker {
            Some(marker) => {
                let after_marker = format!("{marker}\0");
                if after_marker > prefix_start {
                    after_marker
                } else {
                    prefix_start
                }
            }
            None => prefix_start,
        }
    }

    fn page_limit(&self) -> u32 {
        self.limit as u32
    }
}

/// One limit-marker stream per vnode over the owner's buckets
pub fn bucket_streams(
    ctx: &RequestCtx,
    query: &ListQuery,
) -> Vec<(u32, LimitMarkerStream<BucketPageSource>)> {
    let start = query.start_marker();
    ctx.ring
        .all_nodes()
        .into_iter()
        .map(|node| {
            let source = BucketPageSource {
                pool: ctx.state.shards.clone(),
                pnode: node.pnode,
                vnode: node.vnode,
                owner: ctx.identity.owner,
                prefix: query.prefix.clone().unwrap_or_default(),
            };
            (
                node.vnode,
                LimitMarkerStream::new(source, start.clone(), query.page_limit()),
            )
        })
        .collect()
}

/// One limit-marker stream per vnode over a bucket's objects
pub fn object_streams(
    ctx: &RequestCtx,
    query: &ListQuery,
) -> Result<Vec<(u32, LimitMarkerStream<ObjectPageSource>)>> {
    let bucket_id = ctx.require_bucket()?.id;
    let start = query.start_marker();
    Ok(ctx
        .ring
        .all_nodes()
        .into_iter()
        .map(|node| {
            let source = ObjectPageSource {
                pool: ctx.state.shards.clone(),
                pnode: node.pnode,
                vnode: node.vnode,
                owner: ctx.identity.owner,
                bucket_id,
                prefix: query.prefix.clone().unwrap_or_default(),
            };
            (
                node.vnode,
                LimitMarkerStream::new(source, start.clone(), query.page_limit()),
            )
        })
        .collect())
}

/// Drive a merge to completion, rendering records with `to_json`.
/// Returns the NDJSON lines and the `Next-Marker` value, present iff the
/// merge stopped early.
pub async fn run_merge<P, F>(
    mut merge: MergePaginator<P>,
    mut to_json: F,
) -> Result<(Vec<String>, Option<String>)>
where
    P: PageSource,
    F: FnMut(&P::Record) -> serde_json::Value,
{
    let mut lines = Vec::new();
    let mut resume: Option<String> = None;
    while let Some(entry) = merge.next_entry().await {
        match &entry {
            ListEntry::Record(record) => {
                resume = Some(record.key().to_string());
                lines.push(to_json(record).to_string());
            }
            ListEntry::Group { name, next_marker } => {
                resume = Some(next_marker.clone());
                lines.push(
                    json!({
                        "name": name,
                        "type": "group",
                        "nextMarker": next_marker,
                    })
                    .to_string(),
                );
            }
        }
    }
    let outcome = merge.finish().await?;
    Ok((lines, if outcome.finished { None } else { resume }))
}

/// Listing entry for a bucket record
pub fn bucket_entry_json(bucket: &Bucket) -> serde_json::Value {
    json!({
        "name": bucket.name,
        "type": "bucket",
        "mtime": bucket.created.to_rfc3339(),
    })
}

/// Listing entry for an object record
pub fn object_entry_json(object: &BucketObject) -> serde_json::Value {
    json!({
        "name": object.name,
        "type": "bucketobject",
        "etag": object.id.to_string(),
        "size": object.content_length,
        "contentType": object.content_type,
        "contentMD5": object.content_md5,
        "mtime": object.modified.to_rfc3339(),
        "roles": object.roles,
    })
}

/// Assemble the NDJSON response
pub fn ndjson_response(lines: Vec<String>, next_marker: Option<String>) -> ApiResult {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from(body))
        .map_err(|e| Error::internal(format!("response build: {e}")))?;
    if let Some(marker) = next_marker {
        if let Ok(value) = HeaderValue::from_str(&marker) {
            response.headers_mut().insert("next-marker", value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_validation() {
        assert_eq!(ListQuery::validate(ListParams::default()).unwrap().limit, 1024);
        assert_eq!(
            ListQuery::validate(ListParams {
                limit: Some(5),
                ..Default::default()
            })
            .unwrap()
            .limit,
            5
        );
        assert!(ListQuery::validate(ListParams {
            limit: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(ListQuery::validate(ListParams {
            limit: Some(1025),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_delimiter_must_be_single_char() {
        assert!(ListQuery::validate(ListParams {
            delimiter: Some("/".to_string()),
            ..Default::default()
        })
        .is_ok());
        assert!(ListQuery::validate(ListParams {
            delimiter: Some("//".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_start_marker_combination() {
        let query = ListQuery::validate(ListParams {
            prefix: Some("dir/".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.start_marker(), "dir/");

        // The wire marker is exclusive: resume just past it.
        let query = ListQuery::validate(ListParams {
            prefix: Some("dir/".to_string()),
            marker: Some("dir/m".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.start_marker(), "dir/m\0");

        // A marker before the prefix loses to the prefix.
        let query = ListQuery::validate(ListParams {
            prefix: Some("dir/".to_string()),
            marker: Some("aaa".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.start_marker(), "dir/");
    }
}
