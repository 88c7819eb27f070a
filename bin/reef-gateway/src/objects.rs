//! Object handlers: create, get, head, delete, metadata update, list.

use crate::headers::{filter_stored_headers, parse_role_tags};
use crate::listing::{
    ndjson_response, object_entry_json, object_streams, run_merge, ListParams, ListQuery,
};
use crate::pipeline::{AppState, Flow, RequestCtx};
use crate::response::{
    not_modified_headers, object_read_headers, with_headers, ApiError, ApiResult,
};
use crate::upload::{write_object_body, WritePlan, WriteResult};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reef_client::convert::{object_from_proto, sharks_to_proto};
use reef_client::{body_path, shard_error};
use reef_common::{
    BucketObject, Error, ObjectId, Result, StorageLayoutVersion, ZERO_BYTE_MD5,
};
use reef_proto::metadata as pb;
use reef_stream::MergePaginator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

/// `GET /:login/buckets/:bucket/objects`
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path((login, bucket)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx =
        RequestCtx::load(state, login, Some(bucket), None, &headers, "listobjects").await?;
    ctx.fetch_bucket().await?;
    ctx.authorize().await?;

    let query = ListQuery::validate(params)?;
    let merge = MergePaginator::new(
        object_streams(&ctx, &query)?,
        query.limit,
        query.prefix.clone(),
        query.delimiter,
    );
    let (lines, next_marker) = run_merge(merge, object_entry_json).await?;
    ndjson_response(lines, next_marker)
}

/// Stage `parse_arguments` for a create: size, durability, digest,
/// stored headers, and the fresh object id.
struct CreateArgs {
    plan: WritePlan,
    content_type: String,
    stored_headers: BTreeMap<String, String>,
    roles: Vec<String>,
}

fn parse_write_args(ctx: &RequestCtx, headers: &HeaderMap) -> Result<CreateArgs> {
    let limits = &ctx.state.config.limits;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::bad_request("Content-Type is required"))?;

    let content_length = match headers.get(header::CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| Error::bad_request("Content-Length invalid"))?,
        ),
        None => None,
    };

    let chunked = headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    // Declared size for sized uploads; the client-advertised ceiling for
    // chunked ones, clamped by the configured maximum either way.
    let max_bytes = match content_length {
        Some(len) => {
            if len > limits.max_object_size {
                return Err(Error::MaxContentLengthExceeded {
                    max_bytes: limits.max_object_size,
                });
            }
            len
        }
        None if chunked => headers
            .get("max-content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.min(limits.max_object_size))
            .unwrap_or(limits.max_object_size),
        None => return Err(Error::ContentLengthRequired),
    };

    let durability = match headers.get("durability-level") {
        None => limits.default_durability,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| Error::bad_request("Durability-Level invalid"))?
            .clamp(1, limits.max_object_copies),
    };

    let client_md5 = match headers.get("content-md5") {
        None => None,
        Some(value) => {
            let text = value
                .to_str()
                .map_err(|_| Error::InvalidContentMd5("not valid UTF-8".to_string()))?;
            let decoded = BASE64
                .decode(text)
                .map_err(|_| Error::InvalidContentMd5("not valid base64".to_string()))?;
            if decoded.len() != 16 {
                return Err(Error::InvalidContentMd5("not an MD5 digest".to_string()));
            }
            Some(text.to_string())
        }
    };

    let stored_headers = filter_stored_headers(headers, limits.max_user_metadata_bytes)?;

    Ok(CreateArgs {
        plan: WritePlan {
            object_id: ObjectId::new(),
            name_hash: ctx.require_object_name()?.name_hash(),
            content_length,
            max_bytes,
            durability,
            client_md5,
        },
        content_type,
        stored_headers,
        roles: parse_role_tags(headers),
    })
}

/// `PUT /:login/buckets/:bucket/objects/:object`
pub async fn create_object(
    State(state): State<Arc<AppState>>,
    Path((login, bucket, object)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult {
    let mut ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        Some(object),
        &headers,
        "putobject",
    )
    .await?;
    ctx.fetch_bucket().await?;
    ctx.authorize().await?;

    // Conditional peek happens strictly before any body byte moves.
    ctx.maybe_peek_object().await?;

    let args = parse_write_args(&ctx, &headers)?;
    let written = if args.plan.content_length == Some(0) {
        zero_byte_write(&args.plan)?
    } else {
        let probes = ctx.state.probes.clone();
        let client_body = body.into_data_stream().map(move |chunk| {
            chunk.map_err(|e| {
                probes.on_client_close();
                warn!(error = %e, "client body failed");
                Error::UploadAbandoned
            })
        });
        write_object_body(&ctx.state, &ctx.identity.owner, &args.plan, client_body).await?
    };

    let location = ctx.object_location()?;
    let mut client = ctx.shard(&location)?;
    client
        .create_object(pb::CreateObjectRequest {
            owner: ctx.identity.owner.to_string(),
            bucket_id: ctx.require_bucket()?.id.to_string(),
            name: ctx.require_object_name()?.as_str().to_string(),
            vnode: location.vnode,
            id: args.plan.object_id.to_string(),
            name_hash: args.plan.name_hash.clone(),
            content_length: written.summary.bytes,
            content_md5: written.summary.md5_base64.clone(),
            content_type: args.content_type.clone(),
            headers: args.stored_headers.clone().into_iter().collect(),
            sharks: sharks_to_proto(&written.sharks),
            storage_layout_version: StorageLayoutVersion::CURRENT.as_u32(),
            conditions: ctx.conditions.to_shard_write(),
            roles: args.roles.clone(),
        })
        .await
        .map_err(shard_error)?;

    let response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ETAG, args.plan.object_id.to_string())
        .header("computed-md5", written.summary.md5_base64)
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?;
    Ok(response)
}

/// Zero-byte fast path: no storage nodes are involved and the canonical
/// empty digest is recorded.
fn zero_byte_write(plan: &WritePlan) -> Result<WriteResult> {
    if let Some(client_md5) = &plan.client_md5 {
        if client_md5 != ZERO_BYTE_MD5 {
            return Err(Error::ChecksumMismatch {
                expected: client_md5.clone(),
                computed: ZERO_BYTE_MD5.to_string(),
            });
        }
    }
    Ok(WriteResult {
        summary: reef_stream::CheckSummary {
            md5_base64: ZERO_BYTE_MD5.to_string(),
            bytes: 0,
        },
        sharks: Vec::new(),
    })
}

/// Shared read front half: fetch the record and settle conditionals
async fn read_object(ctx: &mut RequestCtx) -> Result<(BucketObject, Flow)> {
    ctx.fetch_bucket().await?;
    ctx.authorize().await?;
    let object = ctx.get_object(ctx.conditions.to_shard_read()).await?;

    if ctx.conditions.not_modified(&object) {
        let response = with_headers(
            Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .map_err(|e| Error::internal(format!("response build: {e}")))?,
            not_modified_headers(&object),
        );
        return Ok((object, Flow::Respond(response)));
    }
    Ok((object, Flow::Continue))
}

/// `HEAD /:login/buckets/:bucket/objects/:object`
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((login, bucket, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        Some(object),
        &headers,
        "getobject",
    )
    .await?;
    let (record, flow) = read_object(&mut ctx).await?;
    if let Flow::Respond(response) = flow {
        return Ok(response);
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let response = with_headers(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, record.content_length)
            .body(Body::empty())
            .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?,
        object_read_headers(&record, origin),
    );
    Ok(response)
}

/// `GET /:login/buckets/:bucket/objects/:object`
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((login, bucket, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        Some(object),
        &headers,
        "getobject",
    )
    .await?;
    let (record, flow) = read_object(&mut ctx).await?;
    if let Flow::Respond(response) = flow {
        return Ok(response);
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let read_headers = object_read_headers(&record, origin);

    if record.is_zero_byte() {
        let response = with_headers(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, 0)
                .body(Body::empty())
                .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?,
            read_headers,
        );
        return Ok(response);
    }

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let path = body_path(
        record.storage_layout_version,
        &ctx.identity.owner,
        &record.id,
        &record.name_hash,
    );

    // Replica failover: the first node that answers serves the read.
    let mut replica = None;
    let mut last_error = None;
    for shark in &record.sharks {
        match ctx.state.sharks.get_body(shark, &path, range).await {
            Ok(response) => {
                replica = Some(response);
                break;
            }
            Err(e @ Error::RangeNotSatisfiable { .. }) => return Err(ApiError(e)),
            Err(e) => {
                warn!(shark = %shark.storage_id, error = %e, "replica read failed; trying next");
                last_error = Some(e);
            }
        }
    }
    let replica = match replica {
        Some(replica) => replica,
        None => {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "object has no replicas".to_string());
            return Err(ApiError(Error::ServiceUnavailable(format!(
                "no replica available: {cause}"
            ))));
        }
    };

    let status =
        StatusCode::from_u16(replica.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(content_range) = &replica.content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    let length = replica
        .content_length
        .unwrap_or(record.content_length);
    builder = builder.header(header::CONTENT_LENGTH, length);

    let guarded = guarded_body_stream(
        replica.stream,
        ctx.state.config.limits.socket_timeout(),
        ctx.state.probes.clone(),
    )
    .boxed();

    // Whole-body reads are verified end-to-end; range reads cannot be.
    let body = if status == StatusCode::OK {
        Body::from_stream(verified_stream(guarded, record.content_md5.clone()))
    } else {
        Body::from_stream(guarded)
    };

    let response = with_headers(
        builder
            .body(body)
            .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?,
        read_headers,
    );
    Ok(response)
}

/// Wrap an outbound replica stream with the socket idle timeout and the
/// client-disconnect probe. Dropping the stream before its natural end
/// (the client went away) fires `on_client_close` and tears down the
/// upstream replica read with it.
fn guarded_body_stream<S>(
    inner: S,
    idle_timeout: std::time::Duration,
    probes: Arc<dyn crate::probes::Probes>,
) -> impl Stream<Item = Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    struct Guard {
        probes: Arc<dyn crate::probes::Probes>,
        completed: bool,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            if !self.completed {
                self.probes.on_client_close();
            }
        }
    }

    let guard = Guard {
        probes: probes.clone(),
        completed: false,
    };
    futures::stream::unfold(
        (inner, guard, probes, idle_timeout, false),
        |(mut inner, mut guard, probes, idle_timeout, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(idle_timeout, inner.next()).await {
                Err(_) => {
                    probes.on_socket_timeout();
                    guard.completed = true;
                    Some((
                        Err(Error::Timeout),
                        (inner, guard, probes, idle_timeout, true),
                    ))
                }
                Ok(None) => {
                    guard.completed = true;
                    None
                }
                Ok(Some(item)) => {
                    let failed = item.is_err();
                    if failed {
                        guard.completed = true;
                    }
                    Some((item, (inner, guard, probes, idle_timeout, failed)))
                }
            }
        },
    )
}

/// Wrap a replica stream with an MD5 check. A mismatch surfaces as a
/// stream error after the last byte, closing the connection so the
/// client cannot mistake a corrupt body for a complete one.
fn verified_stream<S>(inner: S, expected_md5: String) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    struct Verify<S> {
        inner: S,
        context: md5::Context,
        expected: String,
        finished: bool,
    }
    futures::stream::unfold(
        Verify {
            inner,
            context: md5::Context::new(),
            expected: expected_md5,
            finished: false,
        },
        |mut v| async move {
            if v.finished {
                return None;
            }
            match v.inner.next().await {
                Some(Ok(chunk)) => {
                    v.context.consume(&chunk);
                    Some((Ok(chunk), v))
                }
                Some(Err(e)) => {
                    v.finished = true;
                    Some((Err(e), v))
                }
                None => {
                    v.finished = true;
                    let digest = BASE64.encode(v.context.clone().compute().0);
                    if digest == v.expected {
                        None
                    } else {
                        error!(
                            expected = %v.expected,
                            computed = %digest,
                            "replica body failed checksum verification"
                        );
                        Some((
                            Err(Error::internal("replica body failed checksum")),
                            v,
                        ))
                    }
                }
            }
        },
    )
}

/// `DELETE /:login/buckets/:bucket/objects/:object`
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((login, bucket, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        Some(object),
        &headers,
        "deleteobject",
    )
    .await?;
    ctx.fetch_bucket().await?;
    ctx.authorize().await?;

    let location = ctx.object_location()?;
    let mut client = ctx.shard(&location)?;
    let response = client
        .delete_object(pb::DeleteObjectRequest {
            owner: ctx.identity.owner.to_string(),
            bucket_id: ctx.require_bucket()?.id.to_string(),
            name: ctx.require_object_name()?.as_str().to_string(),
            vnode: location.vnode,
            conditions: ctx.conditions.to_shard_write(),
        })
        .await
        .map_err(shard_error)?
        .into_inner();

    if let Some(record) = response.record {
        ctx.state.metrics.add_deleted_bytes(record.content_length);
    }

    let response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?;
    Ok(response)
}

/// `PUT /:login/buckets/:bucket/objects/:object/metadata`
///
/// Replaces the stored header subset (and optionally the content type)
/// without touching the body or the sharks.
pub async fn update_object_metadata(
    State(state): State<Arc<AppState>>,
    Path((login, bucket, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let mut ctx = RequestCtx::load(
        state,
        login,
        Some(bucket),
        Some(object),
        &headers,
        "putobjectmetadata",
    )
    .await?;
    ctx.fetch_bucket().await?;
    ctx.authorize().await?;

    let stored_headers =
        filter_stored_headers(&headers, ctx.state.config.limits.max_user_metadata_bytes)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let location = ctx.object_location()?;
    let mut client = ctx.shard(&location)?;
    let updated = client
        .update_object(pb::UpdateObjectRequest {
            owner: ctx.identity.owner.to_string(),
            bucket_id: ctx.require_bucket()?.id.to_string(),
            name: ctx.require_object_name()?.as_str().to_string(),
            vnode: location.vnode,
            content_type,
            headers: stored_headers.into_iter().collect(),
            conditions: ctx.conditions.to_shard_write(),
            roles: parse_role_tags(&headers),
        })
        .await
        .map_err(shard_error)?
        .into_inner();
    let record = object_from_proto(updated)?;

    let response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ETAG, record.id.to_string())
        .header(header::LAST_MODIFIED, crate::response::http_date(record.modified))
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(format!("response build: {e}"))))?;
    Ok(response)
}
