//! Bucket handlers: OPTIONS, list, create, head, delete.

use crate::listing::{
    bucket_entry_json, bucket_streams, ndjson_response, object_streams, run_merge, ListParams,
    ListQuery,
};
use crate::pipeline::{AppState, RequestCtx};
use crate::response::{ApiError, ApiResult};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use reef_client::shard_error;
use reef_common::{Error, Result};
use reef_proto::metadata as pb;
use reef_stream::MergePaginator;
use std::sync::Arc;

fn empty_status(status: StatusCode) -> ApiResult {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))
}

/// `OPTIONS /:login/buckets`
pub async fn options_buckets(Path(_login): Path<String>) -> ApiResult {
    let response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ALLOW, "OPTIONS, GET")
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?;
    Ok(response)
}

/// `GET /:login/buckets` — merged NDJSON listing across every vnode
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ApiResult {
    let ctx = RequestCtx::load(state, login, None, None, &headers, "listbuckets").await?;
    ctx.authorize().await?;

    let query = ListQuery::validate(params)?;
    let merge = MergePaginator::new(
        bucket_streams(&ctx, &query),
        query.limit,
        query.prefix.clone(),
        query.delimiter,
    );
    let (lines, next_marker) = run_merge(merge, bucket_entry_json).await?;
    ndjson_response(lines, next_marker)
}

/// `PUT /:login/buckets/:bucket`
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path((login, bucket)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        None,
        &headers,
        "createbucket",
    )
    .await?;
    ctx.authorize().await?;

    let location = ctx.bucket_location()?;
    let mut client = ctx.shard(&location)?;
    client
        .create_bucket(pb::CreateBucketRequest {
            owner: ctx.identity.owner.to_string(),
            name: ctx.require_bucket_name()?.as_str().to_string(),
            vnode: location.vnode,
        })
        .await
        .map_err(shard_error)?;

    empty_status(StatusCode::NO_CONTENT)
}

/// `HEAD /:login/buckets/:bucket`
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    Path((login, bucket)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx =
        RequestCtx::load(state, login, Some(bucket), None, &headers, "getbucket").await?;
    ctx.authorize().await?;
    ctx.fetch_bucket().await?;
    empty_status(StatusCode::NO_CONTENT)
}

/// `DELETE /:login/buckets/:bucket`
///
/// Destruction requires emptiness, which is established by a one-entry
/// merged listing before the shard is asked to drop the row.
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path((login, bucket)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx =
        RequestCtx::load(state, login, Some(bucket), None, &headers, "deletebucket").await?;
    ctx.authorize().await?;
    ctx.fetch_bucket().await?;

    if !bucket_is_empty(&ctx).await? {
        return Err(ApiError(Error::BucketNotEmpty(
            ctx.require_bucket_name()?.as_str().to_string(),
        )));
    }

    let location = ctx.bucket_location()?;
    let mut client = ctx.shard(&location)?;
    client
        .delete_bucket(pb::DeleteBucketRequest {
            owner: ctx.identity.owner.to_string(),
            name: ctx.require_bucket_name()?.as_str().to_string(),
            vnode: location.vnode,
        })
        .await
        .map_err(shard_error)?;

    empty_status(StatusCode::NO_CONTENT)
}

/// A bucket is empty when a limit-1 merged listing yields nothing
async fn bucket_is_empty(ctx: &RequestCtx) -> Result<bool> {
    let probe = ListQuery {
        limit: 1,
        marker: None,
        prefix: None,
        delimiter: None,
    };
    let mut merge = MergePaginator::new(object_streams(ctx, &probe)?, 1, None, None);
    match merge.next_entry().await {
        Some(_) => Ok(false),
        None => {
            // Surface shard failures rather than treating them as
            // emptiness.
            merge.finish().await?;
            Ok(true)
        }
    }
}
