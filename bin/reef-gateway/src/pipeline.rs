//! Per-request context and the stages every verb composes.
//!
//! Each stage either advances (`Flow::Continue`), short-circuits with a
//! finished response (`Flow::Respond`), or fails with a taxonomy error.
//! Handlers are thin drivers that run their verb's stages in order.

use crate::auth::{AuthAgent, Identity};
use crate::conditional::Conditions;
use crate::metrics::Metrics;
use crate::probes::Probes;
use axum::http::HeaderMap;
use axum::response::Response;
use reef_client::convert::{bucket_from_proto, object_from_proto};
use reef_client::{shard_error, SharkChooser, SharkClient, ShardPool};
use reef_common::types::{bucket_routing_key, object_routing_key};
use reef_common::{Bucket, BucketName, BucketObject, Error, GatewayConfig, ObjectName, Result};
use reef_proto::metadata as pb;
use reef_proto::metadata::metadata_service_client::MetadataServiceClient;
use reef_ring::{Location, Ring, RingSnapshot};
use std::sync::Arc;
use tonic::transport::Channel;

/// Process-wide dependencies threaded to every stage
pub struct AppState {
    pub config: GatewayConfig,
    pub ring: Arc<Ring>,
    pub shards: Arc<ShardPool>,
    pub sharks: SharkClient,
    pub chooser: Arc<dyn SharkChooser>,
    pub auth: Arc<dyn AuthAgent>,
    pub probes: Arc<dyn Probes>,
    pub metrics: Arc<Metrics>,
}

/// Outcome of a pipeline stage
pub enum Flow {
    /// Proceed to the next stage
    Continue,
    /// The request is finished; send this response
    Respond(Response),
}

/// Everything a request accumulates as it moves through its stages
pub struct RequestCtx {
    pub state: Arc<AppState>,
    /// Ring captured at request entry; used for every lookup within the
    /// request so placement stays consistent
    pub ring: Arc<RingSnapshot>,
    pub identity: Identity,
    pub login: String,
    pub action: &'static str,
    pub bucket_name: Option<BucketName>,
    pub object_name: Option<ObjectName>,
    pub conditions: Conditions,
    /// Filled by [`RequestCtx::fetch_bucket`]
    pub bucket: Option<Bucket>,
}

impl RequestCtx {
    /// Stage `load_request`: validate the addressed names, parse the
    /// conditional headers, and authenticate the caller.
    pub async fn load(
        state: Arc<AppState>,
        login: String,
        bucket_name: Option<String>,
        object_name: Option<String>,
        headers: &HeaderMap,
        action: &'static str,
    ) -> Result<Self> {
        let bucket_name = bucket_name.map(BucketName::new).transpose()?;
        let object_name = object_name.map(ObjectName::new).transpose()?;
        let conditions = Conditions::from_headers(headers);
        let identity = state.auth.authenticate(&login, headers).await?;
        let ring = state.ring.snapshot();
        Ok(Self {
            state,
            ring,
            identity,
            login,
            action,
            bucket_name,
            object_name,
            conditions,
            bucket: None,
        })
    }

    /// The resource path authorization decisions are made against
    #[must_use]
    pub fn resource(&self) -> String {
        let mut resource = format!("/{}/buckets", self.login);
        if let Some(bucket) = &self.bucket_name {
            resource.push('/');
            resource.push_str(bucket.as_str());
            if let Some(object) = &self.object_name {
                resource.push_str("/objects/");
                resource.push_str(object.as_str());
            }
        }
        resource
    }

    /// Stage `authorize`
    pub async fn authorize(&self) -> Result<()> {
        self.state
            .auth
            .authorize(&self.identity, self.action, &self.resource())
            .await
    }

    /// The addressed bucket name
    pub fn require_bucket_name(&self) -> Result<&BucketName> {
        self.bucket_name
            .as_ref()
            .ok_or_else(|| Error::internal("stage requires a bucket name"))
    }

    /// The addressed object name
    pub fn require_object_name(&self) -> Result<&ObjectName> {
        self.object_name
            .as_ref()
            .ok_or_else(|| Error::internal("stage requires an object name"))
    }

    /// The bucket record fetched by `fetch_bucket`
    pub fn require_bucket(&self) -> Result<&Bucket> {
        self.bucket
            .as_ref()
            .ok_or_else(|| Error::internal("stage requires the bucket record"))
    }

    /// Placement of the bucket record itself
    pub fn bucket_location(&self) -> Result<Location> {
        let key = bucket_routing_key(&self.identity.owner, self.require_bucket_name()?.as_str());
        self.ring.locate(&key)
    }

    /// Placement of the addressed object's record
    pub fn object_location(&self) -> Result<Location> {
        let key = object_routing_key(
            &self.identity.owner,
            &self.require_bucket()?.id,
            self.require_object_name()?,
        );
        self.ring.locate(&key)
    }

    /// Shard client for a placement. `ensure` covers pnodes that joined
    /// the ring after startup.
    pub fn shard(&self, location: &Location) -> Result<MetadataServiceClient<Channel>> {
        self.state.shards.ensure(&location.pnode)
    }

    /// Stage `get_bucket_if_exists`: resolve the bucket record and keep
    /// it on the context for later stages.
    pub async fn fetch_bucket(&mut self) -> Result<()> {
        let location = self.bucket_location()?;
        let mut client = self.shard(&location)?;
        let record = client
            .get_bucket(pb::GetBucketRequest {
                owner: self.identity.owner.to_string(),
                name: self.require_bucket_name()?.as_str().to_string(),
                vnode: location.vnode,
            })
            .await
            .map_err(shard_error)?
            .into_inner();
        self.bucket = Some(bucket_from_proto(record)?);
        Ok(())
    }

    /// Fetch the addressed object's record, forwarding `conditions` for
    /// the metadata tier to evaluate.
    pub async fn get_object(&self, conditions: Option<pb::Conditions>) -> Result<BucketObject> {
        let location = self.object_location()?;
        let mut client = self.shard(&location)?;
        let record = client
            .get_object(pb::GetObjectRequest {
                owner: self.identity.owner.to_string(),
                bucket_id: self.require_bucket()?.id.to_string(),
                name: self.require_object_name()?.as_str().to_string(),
                vnode: location.vnode,
                conditions,
            })
            .await
            .map_err(shard_error)?
            .into_inner();
        object_from_proto(record)
    }

    /// Stage `maybe_get_object`: the conditional peek before a create.
    /// `ObjectNotFound` is swallowed (the create may proceed); a failed
    /// precondition surfaces.
    pub async fn maybe_peek_object(&self) -> Result<()> {
        if !self.conditions.is_conditional() {
            return Ok(());
        }
        match self.get_object(self.conditions.to_shard_write()).await {
            Ok(_) => Ok(()),
            Err(Error::ObjectNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
