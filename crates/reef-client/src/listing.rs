//! Page sources backed by the shard listing RPCs.
//!
//! Each source is bound to one vnode and opens one server-streamed page
//! per call; the limit-marker stream in `reef-stream` drives repagination.

use crate::convert::{bucket_from_proto, object_from_proto};
use crate::shard::{shard_error, ShardPool};
use async_trait::async_trait;
use futures::StreamExt;
use reef_common::{Bucket, BucketObject, Result};
use reef_proto::metadata as pb;
use reef_stream::{PageSource, RecordStream};
use std::sync::Arc;
use uuid::Uuid;

/// Bucket listing over one vnode
pub struct BucketPageSource {
    pub pool: Arc<ShardPool>,
    pub pnode: String,
    pub vnode: u32,
    pub owner: Uuid,
    pub prefix: String,
}

#[async_trait]
impl PageSource for BucketPageSource {
    type Record = Bucket;

    async fn open_page(&mut self, marker: &str, limit: u32) -> Result<RecordStream<Bucket>> {
        let mut client = self.pool.client(&self.pnode)?;
        let stream = client
            .list_buckets(pb::ListBucketsRequest {
                owner: self.owner.to_string(),
                vnode: self.vnode,
                marker: marker.to_string(),
                limit,
                prefix: self.prefix.clone(),
            })
            .await
            .map_err(shard_error)?
            .into_inner();
        Ok(stream
            .map(|item| item.map_err(shard_error).and_then(bucket_from_proto))
            .boxed())
    }
}

/// Object listing over one vnode of a bucket
pub struct ObjectPageSource {
    pub pool: Arc<ShardPool>,
    pub pnode: String,
    pub vnode: u32,
    pub owner: Uuid,
    pub bucket_id: Uuid,
    pub prefix: String,
}

#[async_trait]
impl PageSource for ObjectPageSource {
    type Record = BucketObject;

    async fn open_page(&mut self, marker: &str, limit: u32) -> Result<RecordStream<BucketObject>> {
        let mut client = self.pool.client(&self.pnode)?;
        let stream = client
            .list_objects(pb::ListObjectsRequest {
                owner: self.owner.to_string(),
                bucket_id: self.bucket_id.to_string(),
                vnode: self.vnode,
                marker: marker.to_string(),
                limit,
                prefix: self.prefix.clone(),
            })
            .await
            .map_err(shard_error)?
            .into_inner();
        Ok(stream
            .map(|item| item.map_err(shard_error).and_then(object_from_proto))
            .boxed())
    }
}
